//! Prometheus metrics for blobrelay.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "blobrelay_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "blobrelay_http_request_duration_seconds";

/// Completed uploads (counter). Labels: path (simple, stream, chunked).
pub const UPLOADS_TOTAL: &str = "blobrelay_uploads_total";

/// Blocks staged on the object store (counter). Labels: path.
pub const BLOCKS_STAGED_TOTAL: &str = "blobrelay_blocks_staged_total";

/// Block-list commits (counter). Labels: outcome (ok, error).
pub const COMMITS_TOTAL: &str = "blobrelay_commits_total";

/// Upload payload bytes received (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "blobrelay_bytes_received_total";

/// Signed URLs issued (counter). Labels: permission (upload, read).
pub const GRANTS_ISSUED_TOTAL: &str = "blobrelay_grants_issued_total";

/// Chunked sessions currently tracked (gauge).
pub const SESSIONS_ACTIVE: &str = "blobrelay_sessions_active";

/// Chunked sessions dropped by the sweeper (counter).
pub const SESSIONS_EXPIRED_TOTAL: &str = "blobrelay_sessions_expired_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(UPLOADS_TOTAL, "Completed uploads by path");
    describe_counter!(BLOCKS_STAGED_TOTAL, "Blocks staged on the object store");
    describe_counter!(COMMITS_TOTAL, "Block-list commits by outcome");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Upload payload bytes received");
    describe_counter!(GRANTS_ISSUED_TOTAL, "Signed URLs issued by permission set");
    describe_gauge!(SESSIONS_ACTIVE, "Chunked upload sessions currently tracked");
    describe_counter!(SESSIONS_EXPIRED_TOTAL, "Chunked upload sessions expired by the sweeper");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Routes served by the router; used verbatim as the `path` label.
const KNOWN_ROUTES: &[&str] = &[
    "/health",
    "/openapi.json",
    "/metrics",
    "/blob/upload",
    "/blob/upload-large",
    "/blob/stream-upload",
    "/blob/upload-session",
    "/blob/upload-chunk",
    "/blob/finalize",
    "/blob/get-upload-url",
    "/blob/sas",
    "/blob/download",
    "/blob/download-bytes",
    "/blob/list",
    "/blob/delete",
    "/blob/verify-checksum",
];

/// Known routes keep their path as the label; anything else collapses to
/// `/{other}` so unknown paths cannot blow up label cardinality.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match KNOWN_ROUTES.iter().find(|r| **r == trimmed) {
        Some(route) => route.to_string(),
        None => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; version=0.0.4")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}

// -- Tests --------------------------------------------------------------------
