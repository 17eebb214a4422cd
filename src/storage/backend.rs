//! Abstract object store contract.
//!
//! Every backend must implement [`ObjectStore`].  The trait speaks in
//! block-blob primitives (stage a block, commit an ordered block list,
//! issue a shared-access signature) so the upload coordinator never needs
//! to know which service sits behind it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use super::sas::SasPermissions;

/// Boxed future returned by every [`ObjectStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Failures reported by an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The target container does not exist.
    #[error("container not found: {container}")]
    ContainerNotFound { container: String },

    /// The target blob does not exist.
    #[error("blob not found: {container}/{blob}")]
    BlobNotFound { container: String, blob: String },

    /// The store could not be reached, timed out, or reported itself busy.
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but refused the operation.
    #[error("object store rejected {operation}: HTTP {status} - {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// Configured credentials cannot be used for the requested operation.
    #[error("object store credentials: {0}")]
    Credentials(String),
}

/// A downloaded blob.
#[derive(Debug, Clone)]
pub struct BlobContent {
    /// Raw bytes of the blob.
    pub data: Bytes,
    /// Content type recorded on the blob.
    pub content_type: String,
}

/// System properties and user metadata of a committed blob.
#[derive(Debug, Clone, Default)]
pub struct BlobProperties {
    pub content_type: String,
    pub content_length: u64,
    /// Base64-encoded MD5 of the content, when the store recorded one.
    pub content_md5: Option<String>,
    pub created_on: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

/// One entry of a container listing.
#[derive(Debug, Clone)]
pub struct BlobItem {
    pub name: String,
    pub properties: BlobProperties,
}

/// Async block-blob store contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Create `container` unless it already exists.
    fn create_container_if_absent(&self, container: &str) -> StoreFuture<'_, ()>;

    /// Write `data` as the complete content of `blob`, replacing any
    /// existing blob.
    fn put_blob(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        content_type: &str,
    ) -> StoreFuture<'_, ()>;

    /// Stage one uncommitted block.  Staging the same `block_id` twice
    /// replaces the earlier bytes.
    fn stage_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> StoreFuture<'_, ()>;

    /// Atomically make `blob` the concatenation of `block_ids` in the given
    /// order and record `content_type` on it.
    fn commit_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> StoreFuture<'_, ()>;

    /// Drop the uncommitted blocks staged for `blob`, leaving any committed
    /// content alone.  Stores that garbage-collect uncommitted blocks on
    /// their own keep this default.
    fn discard_staged(&self, _container: &str, _blob: &str) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Read the full content of `blob`.
    fn get_blob(&self, container: &str, blob: &str) -> StoreFuture<'_, BlobContent>;

    /// Read the properties of `blob` without its content.
    fn get_properties(&self, container: &str, blob: &str) -> StoreFuture<'_, BlobProperties>;

    /// Delete `blob`.  Deleting a missing blob succeeds.
    fn delete_blob(&self, container: &str, blob: &str) -> StoreFuture<'_, ()>;

    /// List committed blobs in `container`, optionally filtered by name prefix.
    fn list_blobs(&self, container: &str, prefix: Option<&str>) -> StoreFuture<'_, Vec<BlobItem>>;

    /// Produce a URL granting `permissions` on `blob` between `starts_on`
    /// and `expires_on`.
    fn issue_signed_url(
        &self,
        container: &str,
        blob: &str,
        permissions: SasPermissions,
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> StoreFuture<'_, String>;
}
