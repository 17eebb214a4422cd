//! Axum router construction.
//!
//! The [`app`] function wires every `/blob/*` endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::errors::generate_request_id;
use crate::handlers::{blob, chunked, grant};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the blobrelay API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "blobrelay",
        version = "0.1.0",
        description = "Chunked upload coordinator for block-blob storage"
    ),
    paths(
        health_check,
        blob::upload,
        blob::upload_large,
        blob::stream_upload,
        blob::download,
        blob::download_bytes,
        blob::list,
        blob::delete,
        blob::verify_checksum,
        chunked::begin_session,
        chunked::session_status,
        chunked::upload_chunk,
        chunked::finalize,
        grant::get_upload_url,
        grant::get_read_url,
    ),
    components(schemas(crate::errors::ErrorEnvelope, crate::errors::ErrorBody)),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Blob", description = "Whole-blob uploads, downloads and listing"),
        (name = "Chunked", description = "Chunked upload sessions"),
        (name = "Grant", description = "Signed URLs for direct access"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with every route.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let observability = &state.config.observability;

    let mut router = Router::new()
        .route("/openapi.json", get(openapi_json))
        .route("/blob/upload", post(blob::upload))
        .route("/blob/upload-large", post(blob::upload_large))
        .route("/blob/stream-upload", post(blob::stream_upload))
        .route(
            "/blob/upload-session",
            post(chunked::begin_session).get(chunked::session_status),
        )
        .route("/blob/upload-chunk", post(chunked::upload_chunk))
        .route("/blob/finalize", post(chunked::finalize))
        .route("/blob/get-upload-url", post(grant::get_upload_url))
        .route("/blob/sas", get(grant::get_read_url))
        .route("/blob/download", get(blob::download))
        .route("/blob/download-bytes", get(blob::download_bytes))
        .route("/blob/list", get(blob::list))
        .route("/blob/delete", delete(blob::delete))
        .route("/blob/verify-checksum", post(blob::verify_checksum));

    if observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // Inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Bodies are streamed or bounded by the handlers themselves.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (unless the error renderer already set one) and
/// `server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }
    headers.insert("server", HeaderValue::from_static("blobrelay"));

    response
}

// -- Infrastructure endpoints -------------------------------------------------

/// `GET /health`
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json`
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
