//! Upload error types.
//!
//! Every variant maps to a stable error kind and an HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(UploadError::NoSuchSession { .. })`; the body is
//! `{"error": {"kind", "message", "requestId"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::storage::backend::StoreError;
use crate::upload::block_id::BlockIdError;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Failures surfaced by the upload API.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Container name fails `^[a-z0-9-]+$` or the 3..=63 length rule.
    #[error("Invalid container name '{name}': use 3-63 lowercase letters, digits or hyphens")]
    InvalidContainerName { name: String },

    /// Empty chunk, index out of range, or a total that disagrees with the session.
    #[error("Chunk rejected: {0}")]
    ChunkRejected(String),

    #[error("Invalid block id: {0}")]
    InvalidBlockId(#[from] BlockIdError),

    /// Container or object name missing.
    #[error("{0}")]
    MissingUploadTarget(String),

    /// A form field, header or query value could not be parsed.
    #[error("{0}")]
    InvalidArgument(String),

    /// No live session for this derived object name.
    #[error("No upload session for '{object_name}' in container '{container}'")]
    NoSuchSession {
        container: String,
        object_name: String,
    },

    /// Finalize requested before every chunk was staged.
    #[error("Upload '{object_name}' is missing {missing} of {total} chunks")]
    SessionIncomplete {
        object_name: String,
        missing: u32,
        total: u32,
    },

    #[error("{0}")]
    BlobNotFound(String),

    #[error("Payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("Checksum mismatch for '{blob}': expected {expected}, stored {}", .actual.as_deref().unwrap_or("none"))]
    ChecksumMismatch {
        blob: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Upload cancelled before completion")]
    UploadCancelled,

    #[error("Object store unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Object store rejected the request: {0}")]
    BackendRejected(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl UploadError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidContainerName { .. } => "InvalidContainerName",
            UploadError::ChunkRejected(_) => "ChunkRejected",
            UploadError::InvalidBlockId(_) => "InvalidBlockId",
            UploadError::MissingUploadTarget(_) => "MissingUploadTarget",
            UploadError::InvalidArgument(_) => "InvalidArgument",
            UploadError::NoSuchSession { .. } => "NoSuchSession",
            UploadError::SessionIncomplete { .. } => "SessionIncomplete",
            UploadError::BlobNotFound(_) => "BlobNotFound",
            UploadError::PayloadTooLarge { .. } => "PayloadTooLarge",
            UploadError::ChecksumMismatch { .. } => "ChecksumMismatch",
            UploadError::UploadCancelled => "UploadCancelled",
            UploadError::BackendUnavailable(_) => "BackendUnavailable",
            UploadError::BackendRejected(_) => "BackendRejected",
            UploadError::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::InvalidContainerName { .. } => StatusCode::BAD_REQUEST,
            UploadError::ChunkRejected(_) => StatusCode::BAD_REQUEST,
            UploadError::InvalidBlockId(_) => StatusCode::BAD_REQUEST,
            UploadError::MissingUploadTarget(_) => StatusCode::BAD_REQUEST,
            UploadError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            UploadError::NoSuchSession { .. } => StatusCode::NOT_FOUND,
            UploadError::SessionIncomplete { .. } => StatusCode::CONFLICT,
            UploadError::BlobNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::ChecksumMismatch { .. } => StatusCode::CONFLICT,
            UploadError::UploadCancelled => StatusCode::SERVICE_UNAVAILABLE,
            UploadError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            UploadError::BackendRejected(_) => StatusCode::BAD_GATEWAY,
            UploadError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ContainerNotFound { .. } | StoreError::BlobNotFound { .. } => {
                UploadError::BlobNotFound(err.to_string())
            }
            StoreError::Unavailable(message) => UploadError::BackendUnavailable(message),
            StoreError::Rejected { .. } => UploadError::BackendRejected(err.to_string()),
            StoreError::Credentials(message) => {
                UploadError::InternalError(anyhow::anyhow!("object store credentials: {message}"))
            }
        }
    }
}

/// JSON error envelope.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(kind = self.kind(), request_id = %request_id, "{}", self);
        } else {
            tracing::debug!(kind = self.kind(), request_id = %request_id, "{}", self);
        }

        let body = ErrorEnvelope {
            error: ErrorBody {
                kind: self.kind().to_string(),
                message: self.to_string(),
                request_id: request_id.clone(),
            },
        };

        (status, [("x-request-id", request_id)], Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_status_table() {
        let cases = [
            (
                UploadError::InvalidContainerName {
                    name: "Bad".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (UploadError::ChunkRejected("empty".to_string()), StatusCode::BAD_REQUEST),
            (
                UploadError::NoSuchSession {
                    container: "c".to_string(),
                    object_name: "o".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                UploadError::SessionIncomplete {
                    object_name: "o".to_string(),
                    missing: 1,
                    total: 3,
                },
                StatusCode::CONFLICT,
            ),
            (UploadError::PayloadTooLarge { limit: 1 }, StatusCode::PAYLOAD_TOO_LARGE),
            (UploadError::UploadCancelled, StatusCode::SERVICE_UNAVAILABLE),
            (UploadError::BackendRejected("x".to_string()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{}", err.kind());
        }
    }

    #[test]
    fn test_store_error_mapping() {
        let err: UploadError = StoreError::BlobNotFound {
            container: "c".to_string(),
            blob: "b".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "BlobNotFound");

        let err: UploadError = StoreError::Unavailable("timeout".to_string()).into();
        assert_eq!(err.kind(), "BackendUnavailable");

        let err: UploadError = StoreError::Rejected {
            operation: "put_block",
            status: 403,
            message: "AuthenticationFailed".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "BackendRejected");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err: UploadError = StoreError::Credentials("no key".to_string()).into();
        assert_eq!(err.kind(), "InternalError");
    }

    #[test]
    fn test_block_id_error_converts() {
        let err: UploadError = BlockIdError::IndexOutOfRange(1_000_000).into();
        assert_eq!(err.kind(), "InvalidBlockId");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_json_body() {
        let resp = UploadError::MissingUploadTarget("Container-Name header is required".to_string())
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.headers().contains_key("x-request-id"));

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["kind"], "MissingUploadTarget");
        assert_eq!(json["error"]["message"], "Container-Name header is required");
        assert_eq!(json["error"]["requestId"].as_str().unwrap().len(), 16);
    }
}
