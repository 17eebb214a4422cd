//! In-memory block-blob store.
//!
//! Containers, committed blobs and uncommitted blocks are held in a single
//! `tokio::sync::RwLock`.  The model follows block-blob rules closely enough
//! to exercise the upload coordinator without a cloud account:
//!
//! - staged blocks are invisible until a block list is committed;
//! - a commit resolves each id against the staged blocks first and the
//!   blob's committed blocks second, then discards everything else;
//! - `put_blob` records a Content-MD5, a block-list commit does not.
//!
//! A configurable memory limit (`max_size_bytes`) caps committed and staged
//! bytes together.  Staged blocks are released by a commit, a put, a delete
//! or [`ObjectStore::discard_staged`].  Nothing is persisted.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use rand::RngCore;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use super::backend::{BlobContent, BlobItem, BlobProperties, ObjectStore, StoreError, StoreFuture};
use super::sas::{sign_blob_sas, BlobSasRequest, SasPermissions};

/// Account name used when signing memory URLs.
const MEMORY_ACCOUNT: &str = "memory";

/// A committed blob.
#[derive(Debug, Clone)]
struct MemoryBlob {
    data: Bytes,
    content_type: String,
    content_md5: Option<String>,
    created_on: DateTime<Utc>,
    metadata: HashMap<String, String>,
    /// Committed block ids in order, empty for single-shot blobs.
    block_ids: Vec<String>,
    /// Committed block data by id.
    blocks: HashMap<String, Bytes>,
}

#[derive(Debug, Default)]
struct ContainerState {
    blobs: BTreeMap<String, MemoryBlob>,
    /// blob name -> block id -> uncommitted bytes.
    staged: HashMap<String, HashMap<String, Bytes>>,
}

impl ContainerState {
    /// Drop the staged blocks of `blob` and return how many bytes they held.
    fn take_staged(&mut self, blob: &str) -> u64 {
        self.staged
            .remove(blob)
            .map_or(0, |blocks| blocks.values().map(|b| b.len() as u64).sum())
    }

    fn staged_bytes(&self, blob: &str) -> u64 {
        self.staged
            .get(blob)
            .map_or(0, |blocks| blocks.values().map(|b| b.len() as u64).sum())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: HashMap<String, ContainerState>,
    /// Total committed bytes.
    current_size: u64,
    /// Total uncommitted bytes.
    staged_size: u64,
}

/// Per-operation call counters.
#[derive(Debug, Default)]
struct Counters {
    containers_created: AtomicU64,
    blobs_put: AtomicU64,
    blocks_staged: AtomicU64,
    block_lists_committed: AtomicU64,
}

/// Snapshot of how many mutating calls a [`MemoryStore`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub containers_created: u64,
    pub blobs_put: u64,
    pub blocks_staged: u64,
    pub block_lists_committed: u64,
}

/// In-process [`ObjectStore`].
pub struct MemoryStore {
    state: tokio::sync::RwLock<MemoryState>,
    /// Maximum committed plus staged bytes.  0 means unlimited.
    max_size_bytes: u64,
    /// Random per-instance key used to sign URLs.
    signing_key: [u8; 32],
    counters: Counters,
}

impl MemoryStore {
    /// Create an empty store.  `max_size_bytes == 0` disables the limit.
    pub fn new(max_size_bytes: u64) -> Self {
        let mut signing_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut signing_key);
        Self {
            state: tokio::sync::RwLock::new(MemoryState::default()),
            max_size_bytes,
            signing_key,
            counters: Counters::default(),
        }
    }

    /// Mutating calls served so far.
    pub fn operation_counts(&self) -> OperationCounts {
        OperationCounts {
            containers_created: self.counters.containers_created.load(Ordering::Relaxed),
            blobs_put: self.counters.blobs_put.load(Ordering::Relaxed),
            blocks_staged: self.counters.blocks_staged.load(Ordering::Relaxed),
            block_lists_committed: self.counters.block_lists_committed.load(Ordering::Relaxed),
        }
    }

    /// Ordered block ids of the last committed block list of `blob`.
    pub async fn committed_block_ids(&self, container: &str, blob: &str) -> Option<Vec<String>> {
        let state = self.state.read().await;
        state
            .containers
            .get(container)?
            .blobs
            .get(blob)
            .map(|b| b.block_ids.clone())
    }

    /// Number of uncommitted blocks currently staged for `blob`.
    pub async fn staged_block_count(&self, container: &str, blob: &str) -> usize {
        let state = self.state.read().await;
        state
            .containers
            .get(container)
            .and_then(|c| c.staged.get(blob))
            .map_or(0, HashMap::len)
    }

    /// Total committed bytes.
    pub async fn current_size(&self) -> u64 {
        self.state.read().await.current_size
    }

    /// Total bytes held by uncommitted blocks.
    pub async fn staged_size(&self) -> u64 {
        self.state.read().await.staged_size
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Base64 MD5 as recorded in the Content-MD5 property.
    fn compute_md5(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        BASE64_STANDARD.encode(hasher.finalize())
    }

    /// Check that releasing `released` held bytes and adding `additional`
    /// stays within the limit.  Held bytes are committed plus staged.
    fn check_capacity(
        &self,
        state: &MemoryState,
        operation: &'static str,
        released: u64,
        additional: u64,
    ) -> Result<(), StoreError> {
        if self.max_size_bytes == 0 {
            return Ok(());
        }
        let held = state.current_size + state.staged_size;
        let projected = held.saturating_sub(released) + additional;
        if projected > self.max_size_bytes {
            return Err(StoreError::Rejected {
                operation,
                status: 507,
                message: format!(
                    "memory limit exceeded: projected={projected}, max={}",
                    self.max_size_bytes
                ),
            });
        }
        Ok(())
    }

    fn container_mut<'a>(
        state: &'a mut MemoryState,
        container: &str,
    ) -> Result<&'a mut ContainerState, StoreError> {
        state
            .containers
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound {
                container: container.to_string(),
            })
    }

    fn container_ref<'a>(state: &'a MemoryState, container: &str) -> Result<&'a ContainerState, StoreError> {
        state
            .containers
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound {
                container: container.to_string(),
            })
    }

    fn blob_not_found(container: &str, blob: &str) -> StoreError {
        StoreError::BlobNotFound {
            container: container.to_string(),
            blob: blob.to_string(),
        }
    }

    fn properties_of(blob: &MemoryBlob) -> BlobProperties {
        BlobProperties {
            content_type: blob.content_type.clone(),
            content_length: blob.data.len() as u64,
            content_md5: blob.content_md5.clone(),
            created_on: Some(blob.created_on),
            metadata: blob.metadata.clone(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ObjectStore for MemoryStore {
    fn create_container_if_absent(&self, container: &str) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            if !state.containers.contains_key(&container) {
                state.containers.insert(container.clone(), ContainerState::default());
                self.counters.containers_created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("memory container created: {}", container);
            }
            Ok(())
        })
    }

    fn put_blob(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        content_type: &str,
    ) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let c = Self::container_ref(&state, &container)?;
            let replaced = c.blobs.get(&blob).map_or(0, |b| b.data.len() as u64);
            let released = replaced + c.staged_bytes(&blob);
            self.check_capacity(&state, "put_blob", released, data.len() as u64)?;

            let entry = MemoryBlob {
                content_md5: Some(Self::compute_md5(&data)),
                content_type,
                created_on: Utc::now(),
                metadata: HashMap::new(),
                block_ids: Vec::new(),
                blocks: HashMap::new(),
                data,
            };
            let added = entry.data.len() as u64;
            let c = Self::container_mut(&mut state, &container)?;
            let unstaged = c.take_staged(&blob);
            c.blobs.insert(blob, entry);
            state.staged_size = state.staged_size.saturating_sub(unstaged);
            state.current_size = state.current_size.saturating_sub(replaced) + added;

            self.counters.blobs_put.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn stage_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        let block_id = block_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let restaged = Self::container_ref(&state, &container)?
                .staged
                .get(&blob)
                .and_then(|blocks| blocks.get(&block_id))
                .map_or(0, |b| b.len() as u64);
            self.check_capacity(&state, "stage_block", restaged, data.len() as u64)?;

            let added = data.len() as u64;
            let c = Self::container_mut(&mut state, &container)?;
            c.staged.entry(blob).or_default().insert(block_id, data);
            state.staged_size = state.staged_size.saturating_sub(restaged) + added;
            self.counters.blocks_staged.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn commit_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        let block_ids = block_ids.to_vec();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;

            let (blocks, replaced, unstaged, created_on) = {
                let c = Self::container_ref(&state, &container)?;
                let staged = c.staged.get(&blob);
                let existing = c.blobs.get(&blob);

                let mut blocks: HashMap<String, Bytes> = HashMap::with_capacity(block_ids.len());
                for id in &block_ids {
                    let data = staged
                        .and_then(|s| s.get(id))
                        .or_else(|| existing.and_then(|b| b.blocks.get(id)))
                        .ok_or_else(|| StoreError::Rejected {
                            operation: "commit_block_list",
                            status: 400,
                            message: format!("InvalidBlockList: block {id} is not staged"),
                        })?;
                    blocks.insert(id.clone(), data.clone());
                }
                (
                    blocks,
                    existing.map_or(0, |b| b.data.len() as u64),
                    c.staged_bytes(&blob),
                    existing.map(|b| b.created_on),
                )
            };

            let total: usize = block_ids.iter().map(|id| blocks[id].len()).sum();
            self.check_capacity(&state, "commit_block_list", replaced + unstaged, total as u64)?;

            let mut data = BytesMut::with_capacity(total);
            for id in &block_ids {
                data.extend_from_slice(&blocks[id]);
            }

            let entry = MemoryBlob {
                data: data.freeze(),
                content_type,
                content_md5: None,
                created_on: created_on.unwrap_or_else(Utc::now),
                metadata: HashMap::new(),
                block_ids,
                blocks,
            };

            let c = Self::container_mut(&mut state, &container)?;
            c.take_staged(&blob);
            c.blobs.insert(blob, entry);
            state.staged_size = state.staged_size.saturating_sub(unstaged);
            state.current_size = state.current_size.saturating_sub(replaced) + total as u64;

            self.counters.block_lists_committed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn get_blob(&self, container: &str, blob: &str) -> StoreFuture<'_, BlobContent> {
        let container = container.to_string();
        let blob = blob.to_string();
        Box::pin(async move {
            let state = self.state.read().await;
            let entry = Self::container_ref(&state, &container)?
                .blobs
                .get(&blob)
                .ok_or_else(|| Self::blob_not_found(&container, &blob))?;
            Ok(BlobContent {
                data: entry.data.clone(),
                content_type: entry.content_type.clone(),
            })
        })
    }

    fn get_properties(&self, container: &str, blob: &str) -> StoreFuture<'_, BlobProperties> {
        let container = container.to_string();
        let blob = blob.to_string();
        Box::pin(async move {
            let state = self.state.read().await;
            let entry = Self::container_ref(&state, &container)?
                .blobs
                .get(&blob)
                .ok_or_else(|| Self::blob_not_found(&container, &blob))?;
            Ok(Self::properties_of(entry))
        })
    }

    fn delete_blob(&self, container: &str, blob: &str) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let (removed, unstaged) = match state.containers.get_mut(&container) {
                Some(c) => (
                    c.blobs.remove(&blob).map_or(0, |b| b.data.len() as u64),
                    c.take_staged(&blob),
                ),
                None => (0, 0),
            };
            state.current_size = state.current_size.saturating_sub(removed);
            state.staged_size = state.staged_size.saturating_sub(unstaged);
            Ok(())
        })
    }

    fn discard_staged(&self, container: &str, blob: &str) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let unstaged = state
                .containers
                .get_mut(&container)
                .map_or(0, |c| c.take_staged(&blob));
            state.staged_size = state.staged_size.saturating_sub(unstaged);
            if unstaged > 0 {
                tracing::debug!("memory staged blocks discarded: {}/{} ({} bytes)", container, blob, unstaged);
            }
            Ok(())
        })
    }

    fn list_blobs(&self, container: &str, prefix: Option<&str>) -> StoreFuture<'_, Vec<BlobItem>> {
        let container = container.to_string();
        let prefix = prefix.unwrap_or_default().to_string();
        Box::pin(async move {
            let state = self.state.read().await;
            let c = Self::container_ref(&state, &container)?;
            Ok(c.blobs
                .iter()
                .filter(|(name, _)| name.starts_with(&prefix))
                .map(|(name, blob)| BlobItem {
                    name: name.clone(),
                    properties: Self::properties_of(blob),
                })
                .collect())
        })
    }

    fn issue_signed_url(
        &self,
        container: &str,
        blob: &str,
        permissions: SasPermissions,
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> StoreFuture<'_, String> {
        let request = BlobSasRequest {
            account: MEMORY_ACCOUNT,
            container,
            blob,
            permissions,
            starts_on,
            expires_on,
        };
        let result = sign_blob_sas(&self.signing_key, &request)
            .map(|sas| format!("memory://{}/{}?{}", container, blob, sas));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sas::parse_sas_query;
    use chrono::Duration;

    async fn test_store() -> MemoryStore {
        let store = MemoryStore::new(0);
        store.create_container_if_absent("uploads").await.unwrap();
        store
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let store = test_store().await;
        store
            .put_blob("uploads", "a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        let blob = store.get_blob("uploads", "a.txt").await.unwrap();
        assert_eq!(blob.data.as_ref(), b"hello");
        assert_eq!(blob.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_put_records_md5() {
        let store = test_store().await;
        store
            .put_blob("uploads", "empty", Bytes::new(), "application/octet-stream")
            .await
            .unwrap();
        let props = store.get_properties("uploads", "empty").await.unwrap();
        assert_eq!(props.content_md5.as_deref(), Some("1B2M2Y8AsgTpgAmY7PhCfg=="));
        assert_eq!(props.content_length, 0);
    }

    #[tokio::test]
    async fn test_missing_container() {
        let store = MemoryStore::new(0);
        let err = store
            .put_blob("nope", "a", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ContainerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_container_is_idempotent() {
        let store = test_store().await;
        store.create_container_if_absent("uploads").await.unwrap();
        assert_eq!(store.operation_counts().containers_created, 1);
    }

    #[tokio::test]
    async fn test_staged_blocks_invisible_until_commit() {
        let store = test_store().await;
        store
            .stage_block("uploads", "big", "MDAwMDAw", Bytes::from_static(b"aa"))
            .await
            .unwrap();
        assert!(matches!(
            store.get_blob("uploads", "big").await.unwrap_err(),
            StoreError::BlobNotFound { .. }
        ));
        assert!(store.list_blobs("uploads", None).await.unwrap().is_empty());
        assert_eq!(store.staged_block_count("uploads", "big").await, 1);
    }

    #[tokio::test]
    async fn test_commit_orders_by_list_not_arrival() {
        let store = test_store().await;
        for (id, data) in [("MDAwMDAy", "cc"), ("MDAwMDAw", "aa"), ("MDAwMDAx", "bb")] {
            store
                .stage_block("uploads", "big", id, Bytes::from(data))
                .await
                .unwrap();
        }
        let list = ids(&["MDAwMDAw", "MDAwMDAx", "MDAwMDAy"]);
        store
            .commit_block_list("uploads", "big", &list, "video/mp4")
            .await
            .unwrap();

        let blob = store.get_blob("uploads", "big").await.unwrap();
        assert_eq!(blob.data.as_ref(), b"aabbcc");
        assert_eq!(blob.content_type, "video/mp4");
        assert_eq!(store.committed_block_ids("uploads", "big").await.unwrap(), list);
        assert_eq!(store.staged_block_count("uploads", "big").await, 0);

        let props = store.get_properties("uploads", "big").await.unwrap();
        assert!(props.content_md5.is_none());
    }

    #[tokio::test]
    async fn test_restage_overwrites_block() {
        let store = test_store().await;
        store
            .stage_block("uploads", "big", "MDAwMDAw", Bytes::from_static(b"old"))
            .await
            .unwrap();
        store
            .stage_block("uploads", "big", "MDAwMDAw", Bytes::from_static(b"new"))
            .await
            .unwrap();
        store
            .commit_block_list("uploads", "big", &ids(&["MDAwMDAw"]), "text/plain")
            .await
            .unwrap();
        assert_eq!(store.get_blob("uploads", "big").await.unwrap().data.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_recommit_uses_committed_blocks() {
        let store = test_store().await;
        store
            .stage_block("uploads", "big", "MDAwMDAw", Bytes::from_static(b"aa"))
            .await
            .unwrap();
        let list = ids(&["MDAwMDAw"]);
        store
            .commit_block_list("uploads", "big", &list, "text/plain")
            .await
            .unwrap();
        store
            .commit_block_list("uploads", "big", &list, "text/plain")
            .await
            .unwrap();
        assert_eq!(store.get_blob("uploads", "big").await.unwrap().data.as_ref(), b"aa");
        assert_eq!(store.operation_counts().block_lists_committed, 2);
    }

    #[tokio::test]
    async fn test_commit_unknown_block_is_rejected() {
        let store = test_store().await;
        let err = store
            .commit_block_list("uploads", "big", &ids(&["MDAwMDAw"]), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let store = test_store().await;
        store.delete_blob("uploads", "missing").await.unwrap();
        store.delete_blob("no-container", "missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let store = test_store().await;
        for name in ["video/a.mp4", "video/b.mp4", "docs/c.pdf"] {
            store
                .put_blob("uploads", name, Bytes::from_static(b"x"), "application/octet-stream")
                .await
                .unwrap();
        }
        let items = store.list_blobs("uploads", Some("video/")).await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["video/a.mp4", "video/b.mp4"]);
        assert_eq!(store.list_blobs("uploads", None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_memory_limit_put() {
        let store = MemoryStore::new(10);
        store.create_container_if_absent("uploads").await.unwrap();
        store
            .put_blob("uploads", "a", Bytes::from_static(b"12345678"), "text/plain")
            .await
            .unwrap();
        let err = store
            .put_blob("uploads", "b", Bytes::from_static(b"12345"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 507, .. }));

        // Overwriting with the same size fits.
        store
            .put_blob("uploads", "a", Bytes::from_static(b"abcdefgh"), "text/plain")
            .await
            .unwrap();
        assert_eq!(store.current_size().await, 8);
    }

    #[tokio::test]
    async fn test_memory_limit_delete_frees_space() {
        let store = MemoryStore::new(10);
        store.create_container_if_absent("uploads").await.unwrap();
        store
            .put_blob("uploads", "a", Bytes::from_static(b"12345678"), "text/plain")
            .await
            .unwrap();
        store.delete_blob("uploads", "a").await.unwrap();
        assert_eq!(store.current_size().await, 0);
        store
            .put_blob("uploads", "b", Bytes::from_static(b"123456789"), "text/plain")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_memory_limit_counts_staged_blocks() {
        let store = MemoryStore::new(1024);
        store.create_container_if_absent("uploads").await.unwrap();
        let kib = Bytes::from(vec![7u8; 1024]);
        store
            .stage_block("uploads", "big", "MDAwMDAw", kib.clone())
            .await
            .unwrap();
        let err = store
            .stage_block("uploads", "big", "MDAwMDAx", kib.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 507, .. }));
        assert_eq!(store.staged_block_count("uploads", "big").await, 1);
        assert_eq!(store.staged_size().await, 1024);

        // Restaging the same id replaces the bytes instead of adding them.
        store
            .stage_block("uploads", "big", "MDAwMDAw", kib.clone())
            .await
            .unwrap();

        // Committing turns the staged bytes into committed bytes.
        store
            .commit_block_list("uploads", "big", &ids(&["MDAwMDAw"]), "text/plain")
            .await
            .unwrap();
        assert_eq!(store.staged_size().await, 0);
        assert_eq!(store.current_size().await, 1024);
    }

    #[tokio::test]
    async fn test_discard_staged_frees_space() {
        let store = MemoryStore::new(1024);
        store.create_container_if_absent("uploads").await.unwrap();
        store
            .put_blob("uploads", "big", Bytes::from_static(b"keep"), "text/plain")
            .await
            .unwrap();
        store
            .stage_block("uploads", "big", "MDAwMDAw", Bytes::from(vec![1u8; 1000]))
            .await
            .unwrap();
        assert_eq!(store.staged_size().await, 1000);

        store.discard_staged("uploads", "big").await.unwrap();
        store.discard_staged("no-container", "big").await.unwrap();
        assert_eq!(store.staged_block_count("uploads", "big").await, 0);
        assert_eq!(store.staged_size().await, 0);
        assert_eq!(store.get_blob("uploads", "big").await.unwrap().data.as_ref(), b"keep");

        for i in 0..64u32 {
            let id = crate::upload::block_id::encode(i % 4).unwrap();
            store
                .stage_block("uploads", "other", &id, Bytes::from(vec![2u8; 200]))
                .await
                .unwrap();
            if i % 4 == 3 {
                store.discard_staged("uploads", "other").await.unwrap();
            }
        }
        assert_eq!(store.staged_size().await, 0);
    }

    #[tokio::test]
    async fn test_signed_url() {
        let store = test_store().await;
        let start = Utc::now();
        let url = store
            .issue_signed_url("uploads", "a.bin", SasPermissions::UPLOAD, start, start + Duration::minutes(5))
            .await
            .unwrap();
        assert!(url.starts_with("memory://uploads/a.bin?"));
        let fields = parse_sas_query(&url);
        assert_eq!(fields.get("sp").unwrap(), "cw");
        assert_eq!(fields.get("sr").unwrap(), "b");
    }
}
