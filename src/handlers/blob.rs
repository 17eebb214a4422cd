//! Whole-blob handlers: uploads, downloads, listing, deletion and checksum checks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{bytes_field, json_body, multipart_body, next_field, query_params, text_field, BlobQuery};
use crate::errors::UploadError;
use crate::metrics::{BYTES_RECEIVED_TOTAL, UPLOADS_TOTAL};
use crate::upload::splitter::{self, StreamTarget, UploadSummary};
use crate::upload::{checksum, content_type, grant, naming};
use crate::AppState;

// -- Uploads ------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/blob/upload",
    tag = "Blob",
    operation_id = "UploadBlob",
    request_body(content_type = "multipart/form-data", description = "`containerName`, `blobName` and a `file` part"),
    responses(
        (status = 200, description = "Blob stored", body = UploadSummary),
        (status = 400, description = "Missing or invalid field", body = crate::errors::ErrorEnvelope),
        (status = 413, description = "File exceeds the simple upload limit", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadSummary>, UploadError> {
    let mut multipart = multipart_body(multipart)?;
    let limit = state.config.server.max_simple_upload_size;

    let mut container = String::new();
    let mut blob_name = String::new();
    let mut file: Option<(Option<String>, Option<String>, bytes::Bytes)> = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let part = field.name().map(str::to_owned);
        match part.as_deref() {
            Some("containerName") => container = text_field(field).await?,
            Some("blobName") => blob_name = text_field(field).await?,
            Some("file") => {
                let file_name = field.file_name().map(str::to_owned);
                let part_type = field.content_type().map(str::to_owned);
                let data = bytes_field(field, limit).await?;
                file = Some((file_name, part_type, data));
            }
            _ => {}
        }
    }

    let (file_name, part_type, data) = file
        .ok_or_else(|| UploadError::MissingUploadTarget("file part is required".to_string()))?;
    let logical_name = pick_name(&blob_name, file_name.as_deref())?;
    naming::validate_container_name(&container)?;

    state.store.create_container_if_absent(&container).await?;
    let object_name = state.names.allocate(&container, logical_name, Utc::now());
    let content_type = resolve_part_type(part_type.as_deref(), logical_name);
    let size = data.len() as u64;
    let content_md5 = base64::engine::general_purpose::STANDARD.encode(Md5::digest(&data));

    state
        .store
        .put_blob(&container, &object_name, data, &content_type)
        .await?;
    counter!(UPLOADS_TOTAL, "path" => "simple").increment(1);
    counter!(BYTES_RECEIVED_TOTAL).increment(size);
    info!(container = %container, object_name = %object_name, size, "blob uploaded");

    Ok(Json(UploadSummary {
        container,
        object_name,
        content_type,
        size,
        blocks: 0,
        content_md5,
    }))
}

#[utoipa::path(
    post,
    path = "/blob/upload-large",
    tag = "Blob",
    operation_id = "UploadLargeBlob",
    request_body(content_type = "multipart/form-data", description = "`containerName` and `blobName` parts followed by the `file` part"),
    responses(
        (status = 200, description = "Blob stored in blocks", body = UploadSummary),
        (status = 400, description = "Missing or invalid field", body = crate::errors::ErrorEnvelope),
        (status = 413, description = "File exceeds the object size limit", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn upload_large(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadSummary>, UploadError> {
    let mut multipart = multipart_body(multipart)?;
    let mut container = String::new();
    let mut blob_name = String::new();

    while let Some(field) = next_field(&mut multipart).await? {
        let part = field.name().map(str::to_owned);
        match part.as_deref() {
            Some("containerName") => container = text_field(field).await?,
            Some("blobName") => blob_name = text_field(field).await?,
            Some("file") => {
                // The file is relayed as it arrives, so the target must be
                // known by now.
                if container.trim().is_empty() {
                    return Err(UploadError::MissingUploadTarget(
                        "containerName must precede the file part".to_string(),
                    ));
                }
                let file_name = field.file_name().map(str::to_owned);
                let part_type = field.content_type().map(str::to_owned);
                let logical_name = pick_name(&blob_name, file_name.as_deref())?.to_string();
                naming::validate_container_name(&container)?;
                state.store.create_container_if_absent(&container).await?;

                let object_name = state.names.allocate(&container, &logical_name, Utc::now());
                let content_type = resolve_part_type(part_type.as_deref(), &logical_name);
                let target = StreamTarget {
                    container: &container,
                    object_name: &object_name,
                    content_type: &content_type,
                    block_size: state.config.upload.block_size,
                    max_size: state.config.server.max_object_size,
                };
                let cancel = state.shutdown.child_token();
                let summary =
                    splitter::stream_to_object(state.store.as_ref(), target, Box::pin(field), &cancel)
                        .await?;
                return Ok(Json(summary));
            }
            _ => {}
        }
    }

    Err(UploadError::MissingUploadTarget("file part is required".to_string()))
}

#[utoipa::path(
    post,
    path = "/blob/stream-upload",
    tag = "Blob",
    operation_id = "StreamUploadBlob",
    params(
        ("Container-Name" = String, Header, description = "Target container"),
        ("Blob-Name" = String, Header, description = "Logical blob name"),
        ("Content-Type" = Option<String>, Header, description = "Content type; resolved from the extension when absent"),
    ),
    request_body(content_type = "application/octet-stream", description = "Raw blob bytes"),
    responses(
        (status = 200, description = "Blob stored", body = UploadSummary),
        (status = 400, description = "Missing header or invalid container", body = crate::errors::ErrorEnvelope),
        (status = 413, description = "Body exceeds the object size limit", body = crate::errors::ErrorEnvelope),
        (status = 503, description = "Upload cancelled or store unavailable", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn stream_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadSummary>, UploadError> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let container = header_value("container-name").ok_or_else(|| {
        UploadError::MissingUploadTarget("Container-Name header is required".to_string())
    })?;
    let blob_name = header_value("blob-name").ok_or_else(|| {
        UploadError::MissingUploadTarget("Blob-Name header is required".to_string())
    })?;
    naming::validate_container_name(container)?;
    state.store.create_container_if_absent(container).await?;

    let object_name = state.names.allocate(container, blob_name, Utc::now());
    let content_type = resolve_part_type(header_value("content-type"), blob_name);
    let target = StreamTarget {
        container,
        object_name: &object_name,
        content_type: &content_type,
        block_size: state.config.upload.block_size,
        max_size: state.config.server.max_object_size,
    };
    let cancel = state.shutdown.child_token();
    let summary =
        splitter::stream_to_object(state.store.as_ref(), target, body.into_data_stream(), &cancel)
            .await?;
    Ok(Json(summary))
}

/// `blobName` when given, otherwise the file part's own name.
fn pick_name<'a>(blob_name: &'a str, file_name: Option<&'a str>) -> Result<&'a str, UploadError> {
    let blob_name = blob_name.trim();
    if !blob_name.is_empty() {
        return Ok(blob_name);
    }
    file_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| UploadError::MissingUploadTarget("blobName is required".to_string()))
}

/// Browsers label unknown files `application/octet-stream`; treat that as
/// absent so the extension table gets a say.
fn resolve_part_type(declared: Option<&str>, name: &str) -> String {
    let declared = declared.filter(|ct| *ct != content_type::DEFAULT_CONTENT_TYPE);
    content_type::resolve_or(declared, name)
}

// -- Downloads ----------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/blob/download",
    tag = "Blob",
    operation_id = "DownloadBlob",
    params(
        ("containerName" = String, Query, description = "Container name"),
        ("blobName" = String, Query, description = "Blob name"),
    ),
    responses(
        (status = 200, description = "Blob content with its stored content type"),
        (status = 404, description = "Blob not found", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn download(
    State(state): State<Arc<AppState>>,
    query: Result<Query<BlobQuery>, QueryRejection>,
) -> Result<Response, UploadError> {
    let query = query_params(query)?;
    query.require()?;
    naming::validate_container_name(&query.container_name)?;
    let blob = state
        .store
        .get_blob(&query.container_name, &query.blob_name)
        .await?;
    Ok(attachment(&query.blob_name, &blob.content_type, blob.data))
}

#[utoipa::path(
    get,
    path = "/blob/download-bytes",
    tag = "Blob",
    operation_id = "DownloadBlobBytes",
    params(
        ("containerName" = String, Query, description = "Container name"),
        ("blobName" = String, Query, description = "Blob name"),
    ),
    responses(
        (status = 200, description = "Blob content as application/octet-stream"),
        (status = 404, description = "Blob not found", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn download_bytes(
    State(state): State<Arc<AppState>>,
    query: Result<Query<BlobQuery>, QueryRejection>,
) -> Result<Response, UploadError> {
    let query = query_params(query)?;
    query.require()?;
    naming::validate_container_name(&query.container_name)?;
    let blob = state
        .store
        .get_blob(&query.container_name, &query.blob_name)
        .await?;
    Ok(attachment(
        &query.blob_name,
        content_type::DEFAULT_CONTENT_TYPE,
        blob.data,
    ))
}

fn attachment(blob_name: &str, content_type: &str, data: bytes::Bytes) -> Response {
    let file_name = blob_name
        .rsplit('/')
        .next()
        .unwrap_or(blob_name)
        .replace('"', "_");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(content_type::DEFAULT_CONTENT_TYPE));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response()
}

// -- Listing ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub container_name: String,
    pub path: Option<String>,
    pub include_urls: Option<bool>,
}

/// One committed blob in a listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlobDescriptor {
    pub name: String,
    pub created_on: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    pub content_type: String,
    pub content_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_read_url: Option<String>,
}

#[utoipa::path(
    get,
    path = "/blob/list",
    tag = "Blob",
    operation_id = "ListBlobs",
    params(
        ("containerName" = String, Query, description = "Container name"),
        ("path" = Option<String>, Query, description = "Blob name prefix"),
        ("includeUrls" = Option<bool>, Query, description = "Attach a read URL to every entry (default true)"),
    ),
    responses(
        (status = 200, description = "Committed blobs", body = [BlobDescriptor]),
        (status = 400, description = "Invalid container name", body = crate::errors::ErrorEnvelope),
        (status = 404, description = "Container not found", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<BlobDescriptor>>, UploadError> {
    let query = query_params(query)?;
    if query.container_name.trim().is_empty() {
        return Err(UploadError::MissingUploadTarget("containerName is required".to_string()));
    }
    naming::validate_container_name(&query.container_name)?;
    let prefix = query.path.as_deref().filter(|p| !p.is_empty());
    let include_urls = query.include_urls.unwrap_or(true);

    let items = state.store.list_blobs(&query.container_name, prefix).await?;
    let mut descriptors = Vec::with_capacity(items.len());
    for item in items {
        let signed_read_url = if include_urls {
            match grant::issue_read_url(
                state.store.as_ref(),
                &state.config.grants,
                &query.container_name,
                &item.name,
                None,
            )
            .await
            {
                Ok(url) => Some(url.signed_url),
                Err(err) => {
                    warn!(blob = %item.name, error = %err, "read URL omitted from listing");
                    None
                }
            }
        } else {
            None
        };
        descriptors.push(BlobDescriptor {
            name: item.name,
            created_on: item.properties.created_on,
            metadata: item.properties.metadata,
            content_type: item.properties.content_type,
            content_length: item.properties.content_length,
            signed_read_url,
        });
    }
    Ok(Json(descriptors))
}

// -- Delete -------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/blob/delete",
    tag = "Blob",
    operation_id = "DeleteBlob",
    params(
        ("containerName" = String, Query, description = "Container name"),
        ("blobName" = String, Query, description = "Blob name"),
    ),
    responses(
        (status = 204, description = "Blob deleted or already absent"),
        (status = 400, description = "Missing or invalid parameter", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    query: Result<Query<BlobQuery>, QueryRejection>,
) -> Result<StatusCode, UploadError> {
    let query = query_params(query)?;
    query.require()?;
    naming::validate_container_name(&query.container_name)?;
    state
        .store
        .delete_blob(&query.container_name, &query.blob_name)
        .await?;
    info!(container = %query.container_name, blob = %query.blob_name, "blob deleted");
    Ok(StatusCode::NO_CONTENT)
}

// -- Checksum -----------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyChecksumRequest {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub blob_name: String,
    /// Base64 MD5 the caller computed.
    #[serde(default)]
    pub expected_checksum: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyChecksumResponse {
    pub container: String,
    pub blob_name: String,
    pub checksum: String,
    pub matches: bool,
}

#[utoipa::path(
    post,
    path = "/blob/verify-checksum",
    tag = "Blob",
    operation_id = "VerifyChecksum",
    request_body = VerifyChecksumRequest,
    responses(
        (status = 200, description = "Stored MD5 matches", body = VerifyChecksumResponse),
        (status = 404, description = "Blob not found", body = crate::errors::ErrorEnvelope),
        (status = 409, description = "Stored MD5 differs or is absent", body = crate::errors::ErrorEnvelope)
    )
)]
pub async fn verify_checksum(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyChecksumRequest>, JsonRejection>,
) -> Result<Json<VerifyChecksumResponse>, UploadError> {
    let request = json_body(payload)?;
    let checksum = checksum::verify_checksum(
        state.store.as_ref(),
        &request.container_name,
        &request.blob_name,
        &request.expected_checksum,
    )
    .await?;
    Ok(Json(VerifyChecksumResponse {
        container: request.container_name,
        blob_name: request.blob_name,
        checksum,
        matches: true,
    }))
}
