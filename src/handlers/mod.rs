//! HTTP handlers for the `/blob/*` API.
//!
//! Extractor rejections are folded into [`UploadError`] so every failure
//! carries the same JSON envelope.

pub mod blob;
pub mod chunked;
pub mod grant;

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Query};
use axum::Json;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use std::str::FromStr;

use crate::errors::UploadError;

/// Unwrap a JSON body, mapping the rejection to `InvalidArgument`.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, UploadError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| UploadError::InvalidArgument(rejection.body_text()))
}

/// Unwrap query parameters, mapping the rejection to `InvalidArgument`.
pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, UploadError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| UploadError::InvalidArgument(rejection.body_text()))
}

pub(crate) fn multipart_body(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Multipart, UploadError> {
    multipart.map_err(|rejection| UploadError::InvalidArgument(rejection.body_text()))
}

/// Next part of a multipart body.
pub(crate) async fn next_field<'a>(
    multipart: &'a mut Multipart,
) -> Result<Option<Field<'a>>, UploadError> {
    multipart
        .next_field()
        .await
        .map_err(|e| UploadError::InvalidArgument(format!("malformed multipart body: {e}")))
}

/// Read a text part.
pub(crate) async fn text_field(field: Field<'_>) -> Result<String, UploadError> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|e| UploadError::InvalidArgument(format!("failed to read field '{name}': {e}")))
}

/// Read a binary part, refusing more than `limit` bytes.
pub(crate) async fn bytes_field(mut field: Field<'_>, limit: u64) -> Result<Bytes, UploadError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::InvalidArgument(format!("failed to read file part: {e}")))?
    {
        if (buffer.len() + chunk.len()) as u64 > limit {
            return Err(UploadError::PayloadTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// Parse a numeric form value.
pub(crate) fn parse_field<T: FromStr>(name: &str, value: Option<&str>) -> Result<T, UploadError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| UploadError::InvalidArgument(format!("{name} is required")))?;
    value
        .parse()
        .map_err(|_| UploadError::InvalidArgument(format!("{name} '{value}' is not a valid number")))
}

/// `containerName` + `blobName` query string shared by several routes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobQuery {
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub blob_name: String,
}

impl BlobQuery {
    /// Check both values are present.
    pub(crate) fn require(&self) -> Result<(), UploadError> {
        if self.container_name.trim().is_empty() || self.blob_name.trim().is_empty() {
            return Err(UploadError::MissingUploadTarget(
                "containerName and blobName are required".to_string(),
            ));
        }
        Ok(())
    }
}
