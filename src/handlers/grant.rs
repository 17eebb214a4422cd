//! Signed-URL handlers.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use super::{json_body, query_params};
use crate::errors::UploadError;
use crate::upload::grant::{self, SignedReadUrl, SignedUploadGrant};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub file_name: String,
    pub content_type: Option<String>,
}

#[utoipa::path(
    post,
    path = "/blob/get-upload-url",
    tag = "Grant",
    operation_id = "GetUploadUrl",
    request_body = UploadUrlRequest,
    responses(
        (status = 200, description = "Create+write URL for a derived object name", body = SignedUploadGrant),
        (status = 400, description = "Invalid container or missing file name", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn get_upload_url(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UploadUrlRequest>, JsonRejection>,
) -> Result<Json<SignedUploadGrant>, UploadError> {
    let request = json_body(payload)?;
    let grant = grant::issue_upload_grant(
        state.store.as_ref(),
        &state.names,
        &state.config.grants,
        &request.container_name,
        &request.file_name,
        request.content_type.as_deref(),
    )
    .await?;
    Ok(Json(grant))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SasQuery {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub blob_name: String,
    /// RFC 3339 expiry.
    pub expiry_time: Option<String>,
}

#[utoipa::path(
    get,
    path = "/blob/sas",
    tag = "Grant",
    operation_id = "GetReadUrl",
    params(
        ("containerName" = String, Query, description = "Container name"),
        ("blobName" = String, Query, description = "Blob name"),
        ("expiryTime" = Option<String>, Query, description = "RFC 3339 expiry; the configured read validity when absent"),
    ),
    responses(
        (status = 200, description = "Read-only URL", body = SignedReadUrl),
        (status = 400, description = "Invalid container or expiry", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn get_read_url(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SasQuery>, QueryRejection>,
) -> Result<Json<SignedReadUrl>, UploadError> {
    let query = query_params(query)?;
    let expires_on = query
        .expiry_time
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(parse_expiry)
        .transpose()?;
    let url = grant::issue_read_url(
        state.store.as_ref(),
        &state.config.grants,
        &query.container_name,
        &query.blob_name,
        expires_on,
    )
    .await?;
    Ok(Json(url))
}

fn parse_expiry(value: &str) -> Result<DateTime<Utc>, UploadError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| UploadError::InvalidArgument(format!("expiryTime '{value}' is not RFC 3339: {e}")))
}
