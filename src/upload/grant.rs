//! Time-boxed signed URLs for client-side uploads and downloads.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;
use utoipa::ToSchema;

use super::content_type;
use super::naming::{self, NameAllocator};
use crate::config::GrantConfig;
use crate::errors::UploadError;
use crate::metrics::GRANTS_ISSUED_TOTAL;
use crate::storage::backend::ObjectStore;
use crate::storage::sas::SasPermissions;

/// Permission to write one derived object directly to the store.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignedUploadGrant {
    /// URL the client PUTs the object to.
    pub signed_url: String,
    pub object_name: String,
    pub container: String,
    pub expires_on: DateTime<Utc>,
    pub content_type: String,
    /// Headers the client must send with its PUT.
    pub required_headers: BTreeMap<String, String>,
}

/// Read-only URL for one blob.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignedReadUrl {
    pub signed_url: String,
    pub container: String,
    pub blob_name: String,
    pub expires_on: DateTime<Utc>,
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

/// Mint a create+write URL for a timestamped variant of `file_name`.
pub async fn issue_upload_grant(
    store: &dyn ObjectStore,
    names: &NameAllocator,
    grants: &GrantConfig,
    container: &str,
    file_name: &str,
    content_type: Option<&str>,
) -> Result<SignedUploadGrant, UploadError> {
    naming::validate_container_name(container)?;
    naming::require_object_name(file_name, "fileName")?;
    store.create_container_if_absent(container).await?;

    let now = Utc::now();
    let object_name = names.allocate(container, file_name, now);
    let content_type = content_type::resolve_or(content_type, file_name);
    let starts_on = now - seconds(grants.clock_skew_seconds);
    let expires_on = now + seconds(grants.upload_validity_seconds);

    let signed_url = store
        .issue_signed_url(container, &object_name, SasPermissions::UPLOAD, starts_on, expires_on)
        .await?;
    counter!(GRANTS_ISSUED_TOTAL, "permission" => "upload").increment(1);

    let required_headers = BTreeMap::from([
        ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
        ("x-ms-blob-content-type".to_string(), content_type.clone()),
    ]);

    info!(
        container,
        object_name = %object_name,
        expires_on = %expires_on,
        "upload grant issued"
    );
    Ok(SignedUploadGrant {
        signed_url,
        object_name,
        container: container.to_string(),
        expires_on,
        content_type,
        required_headers,
    })
}

/// Mint a read-only URL for `blob`.  Without an explicit expiry the
/// configured read validity applies.
pub async fn issue_read_url(
    store: &dyn ObjectStore,
    grants: &GrantConfig,
    container: &str,
    blob: &str,
    expires_on: Option<DateTime<Utc>>,
) -> Result<SignedReadUrl, UploadError> {
    naming::validate_container_name(container)?;
    naming::require_object_name(blob, "blobName")?;

    let now = Utc::now();
    let expires_on = expires_on.unwrap_or_else(|| now + seconds(grants.read_validity_seconds));
    if expires_on <= now {
        return Err(UploadError::InvalidArgument(format!(
            "expiryTime {} is not in the future",
            expires_on.to_rfc3339()
        )));
    }
    let starts_on = now - seconds(grants.clock_skew_seconds);

    let signed_url = store
        .issue_signed_url(container, blob, SasPermissions::READ, starts_on, expires_on)
        .await?;
    counter!(GRANTS_ISSUED_TOTAL, "permission" => "read").increment(1);

    Ok(SignedReadUrl {
        signed_url,
        container: container.to_string(),
        blob_name: blob.to_string(),
        expires_on,
    })
}
