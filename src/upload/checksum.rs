//! Post-upload MD5 verification against the stored Content-MD5 property.

use tracing::debug;

use super::naming;
use crate::errors::UploadError;
use crate::storage::backend::ObjectStore;

/// Compare the base64 MD5 recorded on `blob` with `expected`.
///
/// Blobs assembled from a block list carry no Content-MD5 of their own, so
/// they always fail verification with `actual: None`.
pub async fn verify_checksum(
    store: &dyn ObjectStore,
    container: &str,
    blob: &str,
    expected: &str,
) -> Result<String, UploadError> {
    naming::validate_container_name(container)?;
    naming::require_object_name(blob, "blobName")?;
    let expected = expected.trim();
    if expected.is_empty() {
        return Err(UploadError::InvalidArgument("expectedChecksum is required".to_string()));
    }

    let properties = store.get_properties(container, blob).await?;
    debug!(
        container,
        blob,
        stored = ?properties.content_md5,
        "verifying checksum"
    );
    match properties.content_md5 {
        Some(actual) if actual == expected => Ok(actual),
        actual => Err(UploadError::ChecksumMismatch {
            blob: blob.to_string(),
            expected: expected.to_string(),
            actual,
        }),
    }
}
