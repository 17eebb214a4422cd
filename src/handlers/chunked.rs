//! Chunked upload handlers.

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Query, State};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{bytes_field, json_body, multipart_body, next_field, parse_field, query_params, text_field};
use crate::errors::UploadError;
use crate::upload::session::{ChunkUpload, FinalizeOutcome, SessionInfo, SessionStatus};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BeginSessionRequest {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub blob_name: String,
    pub total_chunks: u32,
    pub content_type: Option<String>,
}

#[utoipa::path(
    post,
    path = "/blob/upload-session",
    tag = "Chunked",
    operation_id = "BeginUploadSession",
    request_body = BeginSessionRequest,
    responses(
        (status = 200, description = "Session opened; echo `objectName` on every chunk", body = SessionInfo),
        (status = 400, description = "Invalid container, name or chunk count", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn begin_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BeginSessionRequest>, JsonRejection>,
) -> Result<Json<SessionInfo>, UploadError> {
    let request = json_body(payload)?;
    let info = state
        .sessions
        .begin(
            &request.container_name,
            &request.blob_name,
            request.total_chunks,
            request.content_type.as_deref(),
        )
        .await?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub object_name: String,
}

#[utoipa::path(
    get,
    path = "/blob/upload-session",
    tag = "Chunked",
    operation_id = "GetUploadSession",
    params(
        ("containerName" = String, Query, description = "Container name"),
        ("objectName" = String, Query, description = "Derived object name returned when the session opened"),
    ),
    responses(
        (status = 200, description = "Received and missing chunk indices", body = SessionStatus),
        (status = 404, description = "Unknown or expired session", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<SessionStatus>, UploadError> {
    let query = query_params(query)?;
    let status = state
        .sessions
        .status(&query.container_name, &query.object_name)
        .await?;
    Ok(Json(status))
}

/// Reply to one chunk.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    /// Derived name to echo on the remaining chunks.
    pub object_name: String,
    pub chunk_index: u32,
    pub accepted: bool,
    pub is_last_index: bool,
    pub received: u32,
    pub total: u32,
    pub complete: bool,
    /// Present when this chunk completed the upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized: Option<FinalizeOutcome>,
}

#[utoipa::path(
    post,
    path = "/blob/upload-chunk",
    tag = "Chunked",
    operation_id = "UploadChunk",
    request_body(
        content_type = "multipart/form-data",
        description = "`chunk` file part plus `containerName`, `blobName`, `chunkIndex`, `totalChunks` and, after the first chunk, `objectName`"
    ),
    responses(
        (status = 200, description = "Chunk staged; committed when it completed the set", body = ChunkResponse),
        (status = 400, description = "Invalid container or rejected chunk", body = crate::errors::ErrorEnvelope),
        (status = 404, description = "Echoed objectName has no live session", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ChunkResponse>, UploadError> {
    let mut multipart = multipart_body(multipart)?;
    let limit = state.config.server.max_simple_upload_size;

    let mut container = String::new();
    let mut blob_name = String::new();
    let mut object_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut chunk_index: Option<String> = None;
    let mut total_chunks: Option<String> = None;
    let mut data = Bytes::new();

    while let Some(field) = next_field(&mut multipart).await? {
        let part = field.name().map(str::to_owned);
        match part.as_deref() {
            Some("containerName") => container = text_field(field).await?,
            Some("blobName") => blob_name = text_field(field).await?,
            Some("objectName") => object_name = Some(text_field(field).await?),
            Some("contentType") => content_type = Some(text_field(field).await?),
            Some("chunkIndex") => chunk_index = Some(text_field(field).await?),
            Some("totalChunks") => total_chunks = Some(text_field(field).await?),
            Some("chunk") => data = bytes_field(field, limit).await?,
            _ => {}
        }
    }

    let chunk_index: u32 = parse_field("chunkIndex", chunk_index.as_deref())?;
    let total_chunks: u32 = parse_field("totalChunks", total_chunks.as_deref())?;

    let outcome = state
        .sessions
        .upload_chunk(ChunkUpload {
            container: container.trim(),
            final_object_name: blob_name.trim(),
            object_name: object_name.as_deref().map(str::trim),
            chunk_index,
            total_chunks,
            content_type: content_type.as_deref(),
            data,
        })
        .await?;

    let receipt = outcome.receipt;
    Ok(Json(ChunkResponse {
        object_name: outcome.object_name,
        chunk_index: receipt.chunk_index,
        accepted: receipt.accepted,
        is_last_index: receipt.is_last_index,
        received: receipt.received,
        total: receipt.total,
        complete: receipt.complete,
        finalized: outcome.finalized,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub object_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub container: String,
    pub object_name: String,
    pub outcome: FinalizeOutcome,
}

#[utoipa::path(
    post,
    path = "/blob/finalize",
    tag = "Chunked",
    operation_id = "FinalizeUpload",
    request_body = FinalizeRequest,
    responses(
        (status = 200, description = "Committed, already committed, or commit in progress", body = FinalizeResponse),
        (status = 404, description = "Unknown or expired session", body = crate::errors::ErrorEnvelope),
        (status = 409, description = "Chunks still missing", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn finalize(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<Json<FinalizeResponse>, UploadError> {
    let request = json_body(payload)?;
    let outcome = state
        .sessions
        .finalize(&request.container_name, &request.object_name)
        .await?;
    Ok(Json(FinalizeResponse {
        container: request.container_name,
        object_name: request.object_name,
        outcome,
    }))
}
