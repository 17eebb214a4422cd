//! Chunked upload sessions.
//!
//! A session tracks one logical multi-chunk upload, keyed by container and
//! derived object name.  The set of received chunk indices, not the index of
//! the last chunk to arrive, decides when the upload is complete, so chunks
//! may arrive in any order and a lost chunk never produces a truncated blob.
//!
//! State machine:
//!
//! ```text
//! Open --(all indices received, finalize)--> Committing --ok--> Committed
//!   ^                                             |
//!   +------------------commit failed--------------+
//! ```
//!
//! The registry lock is held only for bookkeeping and never across object
//! store I/O.  The `Open -> Committing` transition happens under the lock,
//! which serializes finalize per session within this process.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::block_id::{self, MAX_BLOCKS};
use super::content_type;
use super::naming::{self, NameAllocator};
use crate::errors::UploadError;
use crate::metrics::{
    BLOCKS_STAGED_TOTAL, BYTES_RECEIVED_TOTAL, COMMITS_TOTAL, SESSIONS_ACTIVE,
    SESSIONS_EXPIRED_TOTAL, UPLOADS_TOTAL,
};
use crate::storage::backend::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    container: String,
    object_name: String,
}

impl SessionKey {
    fn new(container: &str, object_name: &str) -> Self {
        Self {
            container: container.to_string(),
            object_name: object_name.to_string(),
        }
    }

    fn missing_session(&self) -> UploadError {
        UploadError::NoSuchSession {
            container: self.container.clone(),
            object_name: self.object_name.clone(),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum SessionState {
    Open,
    Committing,
    Committed,
}

#[derive(Debug)]
struct UploadSession {
    final_object_name: String,
    total_chunks: u32,
    received: BTreeSet<u32>,
    content_type: String,
    state: SessionState,
    created_on: DateTime<Utc>,
    last_activity: Instant,
}

impl UploadSession {
    fn is_complete(&self) -> bool {
        self.received.len() == self.total_chunks as usize
    }

    fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    fn receipt(&self, chunk_index: u32, accepted: bool) -> ChunkReceipt {
        ChunkReceipt {
            chunk_index,
            accepted,
            is_last_index: chunk_index + 1 == self.total_chunks,
            received: self.received.len() as u32,
            total: self.total_chunks,
            complete: self.is_complete(),
        }
    }
}

/// Identity of an open session, returned when it is created.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub container: String,
    /// Derived name the client must echo on every later chunk.
    pub object_name: String,
    pub final_object_name: String,
    pub total_chunks: u32,
    pub content_type: String,
    pub created_on: DateTime<Utc>,
}

/// Result of staging one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub chunk_index: u32,
    /// `false` when the session was already committing or committed and
    /// the chunk was ignored.
    pub accepted: bool,
    pub is_last_index: bool,
    pub received: u32,
    pub total: u32,
    pub complete: bool,
}

/// Result of a finalize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum FinalizeOutcome {
    /// This call committed the block list.
    Committed,
    /// An earlier call already committed it.
    AlreadyCommitted,
    /// Another call is committing right now.
    InProgress,
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub container: String,
    pub object_name: String,
    pub final_object_name: String,
    pub total_chunks: u32,
    pub received_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
    pub state: SessionState,
    pub content_type: String,
}

/// One chunk as received over HTTP.
#[derive(Debug, Clone)]
pub struct ChunkUpload<'a> {
    pub container: &'a str,
    /// Caller's logical name, used to derive the object name.
    pub final_object_name: &'a str,
    /// Derived name echoed back by the caller, if it has one.
    pub object_name: Option<&'a str>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub content_type: Option<&'a str>,
    pub data: Bytes,
}

/// Outcome of [`UploadSessionManager::upload_chunk`].
#[derive(Debug, Clone)]
pub struct ChunkUploadOutcome {
    pub object_name: String,
    pub receipt: ChunkReceipt,
    /// Set when this chunk completed the session and triggered finalize.
    pub finalized: Option<FinalizeOutcome>,
}

fn validate_total(total_chunks: u32) -> Result<(), UploadError> {
    if total_chunks == 0 || total_chunks > MAX_BLOCKS {
        return Err(UploadError::ChunkRejected(format!(
            "totalChunks must be between 1 and {MAX_BLOCKS}, got {total_chunks}"
        )));
    }
    Ok(())
}

/// Default idle window within which an un-echoed chunk may join a session.
pub const DEFAULT_JOIN_WINDOW: Duration = Duration::from_secs(30);

/// In-memory registry of chunked upload sessions.
pub struct UploadSessionManager {
    store: Arc<dyn ObjectStore>,
    sessions: Mutex<HashMap<SessionKey, UploadSession>>,
    ttl: Duration,
    join_window: Duration,
    names: Arc<NameAllocator>,
}

impl UploadSessionManager {
    /// Create a manager whose sessions expire `ttl` after their last activity.
    pub fn new(store: Arc<dyn ObjectStore>, ttl: Duration) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            ttl,
            join_window: DEFAULT_JOIN_WINDOW.min(ttl),
            names: Arc::new(NameAllocator::new()),
        }
    }

    /// Share derived-name bookkeeping with the other upload paths.
    pub fn with_name_allocator(mut self, names: Arc<NameAllocator>) -> Self {
        self.names = names;
        self
    }

    /// Set how recently a session must have been active for a chunk that
    /// does not echo `objectName` to join it.
    pub fn with_join_window(mut self, join_window: Duration) -> Self {
        self.join_window = join_window;
        self
    }

    /// Explicitly open a new session and return its derived name.
    pub async fn begin(
        &self,
        container: &str,
        final_object_name: &str,
        total_chunks: u32,
        content_type: Option<&str>,
    ) -> Result<SessionInfo, UploadError> {
        self.open_session(container, final_object_name, total_chunks, content_type, None)
            .await
    }

    /// Resolve the session a chunk belongs to.
    ///
    /// An echoed `object_name` must name a live session.  Without one, the
    /// chunk joins the most recently active open session for the same
    /// logical name and chunk count, provided that session was active within
    /// the join window and has not yet received `chunk_index`.  Otherwise a
    /// new session is opened.
    pub async fn begin_or_continue(
        &self,
        container: &str,
        final_object_name: &str,
        object_name: Option<&str>,
        chunk_index: u32,
        total_chunks: u32,
        content_type: Option<&str>,
    ) -> Result<String, UploadError> {
        naming::validate_container_name(container)?;

        if let Some(name) = object_name.filter(|n| !n.is_empty()) {
            let key = SessionKey::new(container, name);
            let sessions = self.sessions.lock().await;
            return if sessions.contains_key(&key) {
                Ok(key.object_name)
            } else {
                Err(key.missing_session())
            };
        }

        let join = Join {
            container,
            final_object_name,
            total_chunks,
            chunk_index,
            window: self.join_window,
        };
        let info = self
            .open_session(container, final_object_name, total_chunks, content_type, Some(&join))
            .await?;
        Ok(info.object_name)
    }

    async fn open_session(
        &self,
        container: &str,
        final_object_name: &str,
        total_chunks: u32,
        content_type: Option<&str>,
        join: Option<&Join<'_>>,
    ) -> Result<SessionInfo, UploadError> {
        naming::validate_container_name(container)?;
        naming::require_object_name(final_object_name, "blobName")?;
        validate_total(total_chunks)?;

        if let Some(join) = join {
            let sessions = self.sessions.lock().await;
            if let Some(info) = join.find(&sessions) {
                return Ok(info);
            }
        }

        self.store.create_container_if_absent(container).await?;

        let content_type = content_type::resolve_or(content_type, final_object_name);
        let mut sessions = self.sessions.lock().await;

        // A concurrent first chunk may have opened it while the container
        // call was in flight.
        if let Some(join) = join {
            if let Some(info) = join.find(&sessions) {
                return Ok(info);
            }
        }

        let created_on = Utc::now();
        let key = SessionKey::new(
            container,
            &self.names.allocate(container, final_object_name, created_on),
        );

        let session = UploadSession {
            final_object_name: final_object_name.to_string(),
            total_chunks,
            received: BTreeSet::new(),
            content_type,
            state: SessionState::Open,
            created_on,
            last_activity: Instant::now(),
        };
        let info = session_info(&key, &session);
        sessions.insert(key, session);
        gauge!(SESSIONS_ACTIVE).set(sessions.len() as f64);

        info!(
            container = %info.container,
            object_name = %info.object_name,
            total_chunks,
            "upload session opened"
        );
        Ok(info)
    }

    /// Stage one chunk as block `encode(chunk_index)` and record its index.
    pub async fn stage_chunk(
        &self,
        container: &str,
        object_name: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: Bytes,
    ) -> Result<ChunkReceipt, UploadError> {
        if data.is_empty() {
            return Err(UploadError::ChunkRejected("chunk is missing or empty".to_string()));
        }
        let key = SessionKey::new(container, object_name);

        let block_id = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(&key).ok_or_else(|| key.missing_session())?;
            if total_chunks != session.total_chunks {
                return Err(UploadError::ChunkRejected(format!(
                    "totalChunks {} does not match the session's {}",
                    total_chunks, session.total_chunks
                )));
            }
            if chunk_index >= session.total_chunks {
                return Err(UploadError::ChunkRejected(format!(
                    "chunkIndex {} is outside 0..{}",
                    chunk_index, session.total_chunks
                )));
            }
            session.last_activity = Instant::now();
            if session.state != SessionState::Open {
                debug!(
                    object_name = %key.object_name,
                    chunk_index,
                    state = ?session.state,
                    "chunk ignored"
                );
                return Ok(session.receipt(chunk_index, false));
            }
            block_id::encode(chunk_index)?
        };

        let len = data.len() as u64;
        self.store
            .stage_block(container, object_name, &block_id, data)
            .await?;
        counter!(BLOCKS_STAGED_TOTAL, "path" => "chunked").increment(1);
        counter!(BYTES_RECEIVED_TOTAL).increment(len);

        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&key).ok_or_else(|| key.missing_session())?;
        session.received.insert(chunk_index);
        session.last_activity = Instant::now();

        debug!(
            object_name = %key.object_name,
            chunk_index,
            received = session.received.len(),
            total = session.total_chunks,
            "chunk staged"
        );
        Ok(session.receipt(chunk_index, true))
    }

    /// Commit the ordered block list once every chunk has been staged.
    pub async fn finalize(
        &self,
        container: &str,
        object_name: &str,
    ) -> Result<FinalizeOutcome, UploadError> {
        let key = SessionKey::new(container, object_name);

        let (block_ids, content_type) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(&key).ok_or_else(|| key.missing_session())?;
            session.last_activity = Instant::now();
            match session.state {
                SessionState::Committed => return Ok(FinalizeOutcome::AlreadyCommitted),
                SessionState::Committing => return Ok(FinalizeOutcome::InProgress),
                SessionState::Open => {}
            }
            if !session.is_complete() {
                return Err(UploadError::SessionIncomplete {
                    object_name: key.object_name.clone(),
                    missing: session.total_chunks - session.received.len() as u32,
                    total: session.total_chunks,
                });
            }
            let block_ids = block_id::block_list(session.total_chunks)?;
            session.state = SessionState::Committing;
            (block_ids, session.content_type.clone())
        };

        let result = self
            .store
            .commit_block_list(container, object_name, &block_ids, &content_type)
            .await;

        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&key);
        match result {
            Ok(()) => {
                if let Some(session) = session {
                    session.state = SessionState::Committed;
                    session.last_activity = Instant::now();
                }
                counter!(COMMITS_TOTAL, "outcome" => "ok").increment(1);
                counter!(UPLOADS_TOTAL, "path" => "chunked").increment(1);
                info!(
                    container = %key.container,
                    object_name = %key.object_name,
                    blocks = block_ids.len(),
                    content_type = %content_type,
                    "chunked upload committed"
                );
                Ok(FinalizeOutcome::Committed)
            }
            Err(err) => {
                if let Some(session) = session {
                    session.state = SessionState::Open;
                }
                counter!(COMMITS_TOTAL, "outcome" => "error").increment(1);
                warn!(
                    container = %key.container,
                    object_name = %key.object_name,
                    error = %err,
                    "block list commit failed; session reopened"
                );
                Err(err.into())
            }
        }
    }

    /// Begin or continue, stage, and finalize when the set becomes complete.
    pub async fn upload_chunk(
        &self,
        chunk: ChunkUpload<'_>,
    ) -> Result<ChunkUploadOutcome, UploadError> {
        // Everything checkable without a session is checked before any
        // backend call.
        naming::validate_container_name(chunk.container)?;
        if chunk.data.is_empty() {
            return Err(UploadError::ChunkRejected("chunk is missing or empty".to_string()));
        }
        validate_total(chunk.total_chunks)?;
        if chunk.chunk_index >= chunk.total_chunks {
            return Err(UploadError::ChunkRejected(format!(
                "chunkIndex {} is outside 0..{}",
                chunk.chunk_index, chunk.total_chunks
            )));
        }

        let object_name = self
            .begin_or_continue(
                chunk.container,
                chunk.final_object_name,
                chunk.object_name,
                chunk.chunk_index,
                chunk.total_chunks,
                chunk.content_type,
            )
            .await?;

        let receipt = self
            .stage_chunk(
                chunk.container,
                &object_name,
                chunk.chunk_index,
                chunk.total_chunks,
                chunk.data,
            )
            .await?;

        let finalized = if receipt.accepted && receipt.complete {
            Some(self.finalize(chunk.container, &object_name).await?)
        } else {
            None
        };

        Ok(ChunkUploadOutcome {
            object_name,
            receipt,
            finalized,
        })
    }

    /// Received and missing indices of a session.
    pub async fn status(
        &self,
        container: &str,
        object_name: &str,
    ) -> Result<SessionStatus, UploadError> {
        let key = SessionKey::new(container, object_name);
        let sessions = self.sessions.lock().await;
        let session = sessions.get(&key).ok_or_else(|| key.missing_session())?;
        Ok(SessionStatus {
            container: key.container.clone(),
            object_name: key.object_name.clone(),
            final_object_name: session.final_object_name.clone(),
            total_chunks: session.total_chunks,
            received_chunks: session.received.iter().copied().collect(),
            missing_chunks: session.missing(),
            state: session.state,
            content_type: session.content_type.clone(),
        })
    }

    /// Number of sessions currently tracked.
    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Drop sessions idle for longer than the TTL and discard the blocks
    /// staged by abandoned ones.  Sessions in the middle of a commit are
    /// kept.  Returns how many were dropped.
    pub async fn sweep_expired(&self, now: Instant) -> usize {
        let mut abandoned = Vec::new();
        let expired = {
            let mut sessions = self.sessions.lock().await;
            let before = sessions.len();
            sessions.retain(|key, session| {
                let keep = session.state == SessionState::Committing
                    || now.saturating_duration_since(session.last_activity) <= self.ttl;
                if !keep && session.state == SessionState::Open {
                    warn!(
                        container = %key.container,
                        object_name = %key.object_name,
                        received = session.received.len(),
                        total = session.total_chunks,
                        "abandoned upload session expired"
                    );
                    if !session.received.is_empty() {
                        abandoned.push(key.clone());
                    }
                }
                keep
            });
            let expired = before - sessions.len();
            if expired > 0 {
                counter!(SESSIONS_EXPIRED_TOTAL).increment(expired as u64);
                gauge!(SESSIONS_ACTIVE).set(sessions.len() as f64);
            }
            expired
        };

        for key in abandoned {
            if let Err(err) = self.store.discard_staged(&key.container, &key.object_name).await {
                warn!(
                    container = %key.container,
                    object_name = %key.object_name,
                    error = %err,
                    "failed to discard staged blocks"
                );
            }
        }
        expired
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `every` until
    /// `shutdown` is cancelled.
    pub async fn run_sweeper(self: Arc<Self>, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("session sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let expired = self.sweep_expired(Instant::now()).await;
                    if expired > 0 {
                        info!(expired, "expired upload sessions swept");
                    }
                }
            }
        }
    }
}

fn session_info(key: &SessionKey, session: &UploadSession) -> SessionInfo {
    SessionInfo {
        container: key.container.clone(),
        object_name: key.object_name.clone(),
        final_object_name: session.final_object_name.clone(),
        total_chunks: session.total_chunks,
        content_type: session.content_type.clone(),
        created_on: session.created_on,
    }
}

/// Criteria an open session must meet for an un-echoed chunk to join it.
struct Join<'a> {
    container: &'a str,
    final_object_name: &'a str,
    total_chunks: u32,
    chunk_index: u32,
    window: Duration,
}

impl Join<'_> {
    fn find(&self, sessions: &HashMap<SessionKey, UploadSession>) -> Option<SessionInfo> {
        sessions
            .iter()
            .filter(|(key, session)| {
                key.container == self.container
                    && session.final_object_name == self.final_object_name
                    && session.total_chunks == self.total_chunks
                    && session.state == SessionState::Open
                    && !session.received.contains(&self.chunk_index)
                    && session.last_activity.elapsed() <= self.window
            })
            .max_by_key(|(_, session)| session.last_activity)
            .map(|(key, session)| session_info(key, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{BlobContent, BlobItem, BlobProperties, StoreError, StoreFuture};
    use crate::storage::memory::MemoryStore;
    use crate::storage::sas::SasPermissions;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Memory store that can delay or fail block-list commits.
    #[derive(Default)]
    struct TestStore {
        inner: MemoryStore,
        failing_commits: AtomicU32,
        commit_delay: Duration,
    }

    impl ObjectStore for TestStore {
        fn create_container_if_absent(&self, container: &str) -> StoreFuture<'_, ()> {
            self.inner.create_container_if_absent(container)
        }

        fn put_blob(&self, container: &str, blob: &str, data: Bytes, content_type: &str) -> StoreFuture<'_, ()> {
            self.inner.put_blob(container, blob, data, content_type)
        }

        fn stage_block(&self, container: &str, blob: &str, block_id: &str, data: Bytes) -> StoreFuture<'_, ()> {
            self.inner.stage_block(container, blob, block_id, data)
        }

        fn commit_block_list(
            &self,
            container: &str,
            blob: &str,
            block_ids: &[String],
            content_type: &str,
        ) -> StoreFuture<'_, ()> {
            let commit = self.inner.commit_block_list(container, blob, block_ids, content_type);
            Box::pin(async move {
                if !self.commit_delay.is_zero() {
                    tokio::time::sleep(self.commit_delay).await;
                }
                let fail = self
                    .failing_commits
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if fail {
                    return Err(StoreError::Unavailable("injected commit failure".to_string()));
                }
                commit.await
            })
        }

        fn get_blob(&self, container: &str, blob: &str) -> StoreFuture<'_, BlobContent> {
            self.inner.get_blob(container, blob)
        }

        fn get_properties(&self, container: &str, blob: &str) -> StoreFuture<'_, BlobProperties> {
            self.inner.get_properties(container, blob)
        }

        fn delete_blob(&self, container: &str, blob: &str) -> StoreFuture<'_, ()> {
            self.inner.delete_blob(container, blob)
        }

        fn discard_staged(&self, container: &str, blob: &str) -> StoreFuture<'_, ()> {
            self.inner.discard_staged(container, blob)
        }

        fn list_blobs(&self, container: &str, prefix: Option<&str>) -> StoreFuture<'_, Vec<BlobItem>> {
            self.inner.list_blobs(container, prefix)
        }

        fn issue_signed_url(
            &self,
            container: &str,
            blob: &str,
            permissions: SasPermissions,
            starts_on: DateTime<Utc>,
            expires_on: DateTime<Utc>,
        ) -> StoreFuture<'_, String> {
            self.inner
                .issue_signed_url(container, blob, permissions, starts_on, expires_on)
        }
    }

    fn manager(store: &Arc<TestStore>) -> UploadSessionManager {
        UploadSessionManager::new(store.clone(), Duration::from_secs(60))
    }

    fn chunk<'a>(object_name: Option<&'a str>, index: u32, total: u32, data: &'static [u8]) -> ChunkUpload<'a> {
        ChunkUpload {
            container: "uploads",
            final_object_name: "video.mp4",
            object_name,
            chunk_index: index,
            total_chunks: total,
            content_type: None,
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn test_in_order_upload_commits_once() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);

        let first = mgr.upload_chunk(chunk(None, 0, 3, b"aaaa")).await.unwrap();
        let name = first.object_name.clone();
        assert!(name.starts_with("video_") && name.ends_with(".mp4"));
        assert_eq!(name.len(), "video_".len() + 14 + ".mp4".len());
        assert!(first.finalized.is_none());

        let second = mgr.upload_chunk(chunk(Some(&name), 1, 3, b"bbbb")).await.unwrap();
        assert!(second.finalized.is_none());
        let third = mgr.upload_chunk(chunk(Some(&name), 2, 3, b"cc")).await.unwrap();
        assert_eq!(third.finalized, Some(FinalizeOutcome::Committed));
        assert!(third.receipt.is_last_index && third.receipt.complete);

        let counts = store.inner.operation_counts();
        assert_eq!(counts.blocks_staged, 3);
        assert_eq!(counts.block_lists_committed, 1);
        assert_eq!(
            store.inner.committed_block_ids("uploads", &name).await.unwrap(),
            vec!["MDAwMDAw", "MDAwMDAx", "MDAwMDAy"]
        );
        let blob = store.inner.get_blob("uploads", &name).await.unwrap();
        assert_eq!(blob.data.as_ref(), b"aaaabbbbcc");
        assert_eq!(blob.content_type, "video/mp4");
    }

    #[tokio::test]
    async fn test_out_of_order_upload_commits_on_completion() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        let info = mgr.begin("uploads", "video.mp4", 3, None).await.unwrap();
        let name = info.object_name.as_str();

        let r2 = mgr.upload_chunk(chunk(Some(name), 2, 3, b"cc")).await.unwrap();
        assert!(r2.receipt.is_last_index);
        assert!(!r2.receipt.complete);
        assert!(r2.finalized.is_none());

        mgr.upload_chunk(chunk(Some(name), 0, 3, b"aaaa")).await.unwrap();
        let r1 = mgr.upload_chunk(chunk(Some(name), 1, 3, b"bbbb")).await.unwrap();
        assert_eq!(r1.finalized, Some(FinalizeOutcome::Committed));

        assert_eq!(store.inner.operation_counts().block_lists_committed, 1);
        assert_eq!(
            store.inner.committed_block_ids("uploads", name).await.unwrap(),
            vec!["MDAwMDAw", "MDAwMDAx", "MDAwMDAy"]
        );
        let blob = store.inner.get_blob("uploads", name).await.unwrap();
        assert_eq!(blob.data.as_ref(), b"aaaabbbbcc");
    }

    #[tokio::test]
    async fn test_lost_chunk_never_commits() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        let name = mgr.upload_chunk(chunk(None, 0, 3, b"aaaa")).await.unwrap().object_name;
        let last = mgr.upload_chunk(chunk(Some(&name), 2, 3, b"cc")).await.unwrap();
        assert!(last.finalized.is_none());

        let err = mgr.finalize("uploads", &name).await.unwrap_err();
        match err {
            UploadError::SessionIncomplete { missing, total, .. } => {
                assert_eq!((missing, total), (1, 3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.inner.operation_counts().block_lists_committed, 0);

        let status = mgr.status("uploads", &name).await.unwrap();
        assert_eq!(status.received_chunks, vec![0, 2]);
        assert_eq!(status.missing_chunks, vec![1]);
        assert_eq!(status.state, SessionState::Open);
    }

    #[tokio::test]
    async fn test_retried_chunk_is_idempotent() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        let name = mgr.upload_chunk(chunk(None, 0, 2, b"aaaa")).await.unwrap().object_name;
        let again = mgr.upload_chunk(chunk(Some(&name), 0, 2, b"aaaa")).await.unwrap();
        assert_eq!(again.receipt.received, 1);
        mgr.upload_chunk(chunk(Some(&name), 1, 2, b"bb")).await.unwrap();

        // Retrying the final chunk after commit is a no-op.
        let late = mgr.upload_chunk(chunk(Some(&name), 1, 2, b"bb")).await.unwrap();
        assert!(!late.receipt.accepted);
        assert!(late.finalized.is_none());

        let counts = store.inner.operation_counts();
        assert_eq!(counts.blocks_staged, 3);
        assert_eq!(counts.block_lists_committed, 1);
        assert_eq!(store.inner.get_blob("uploads", &name).await.unwrap().data.as_ref(), b"aaaabb");
        assert_eq!(
            mgr.finalize("uploads", &name).await.unwrap(),
            FinalizeOutcome::AlreadyCommitted
        );
    }

    #[tokio::test]
    async fn test_concurrent_finalize_commits_once() {
        let store = Arc::new(TestStore {
            commit_delay: Duration::from_millis(50),
            ..Default::default()
        });
        let mgr = manager(&store);
        let name = mgr.begin("uploads", "video.mp4", 2, None).await.unwrap().object_name;
        mgr.stage_chunk("uploads", &name, 0, 2, Bytes::from_static(b"aa")).await.unwrap();
        mgr.stage_chunk("uploads", &name, 1, 2, Bytes::from_static(b"bb")).await.unwrap();

        let (a, b) = tokio::join!(mgr.finalize("uploads", &name), mgr.finalize("uploads", &name));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o as u8);
        assert_eq!(outcomes, vec![FinalizeOutcome::Committed, FinalizeOutcome::InProgress]);
        assert_eq!(store.inner.operation_counts().block_lists_committed, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_reopens_session() {
        let store = Arc::new(TestStore {
            failing_commits: AtomicU32::new(1),
            ..Default::default()
        });
        let mgr = manager(&store);
        let name = mgr.begin("uploads", "video.mp4", 1, None).await.unwrap().object_name;
        let err = mgr.upload_chunk(chunk(Some(&name), 0, 1, b"only")).await.unwrap_err();
        assert_eq!(err.kind(), "BackendUnavailable");

        let status = mgr.status("uploads", &name).await.unwrap();
        assert_eq!(status.state, SessionState::Open);
        assert_eq!(status.received_chunks, vec![0]);

        assert_eq!(mgr.finalize("uploads", &name).await.unwrap(), FinalizeOutcome::Committed);
        assert_eq!(store.inner.get_blob("uploads", &name).await.unwrap().data.as_ref(), b"only");
    }

    #[tokio::test]
    async fn test_invalid_container_makes_no_backend_calls() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        for container in ["Uploads", "my_uploads", "my uploads"] {
            let mut c = chunk(None, 0, 1, b"x");
            c.container = container;
            let err = mgr.upload_chunk(c).await.unwrap_err();
            assert_eq!(err.kind(), "InvalidContainerName");
        }
        assert_eq!(store.inner.operation_counts(), Default::default());
        assert_eq!(mgr.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_chunk_rejections() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);

        let err = mgr.upload_chunk(chunk(None, 0, 2, b"")).await.unwrap_err();
        assert_eq!(err.kind(), "ChunkRejected");
        let err = mgr.upload_chunk(chunk(None, 2, 2, b"x")).await.unwrap_err();
        assert_eq!(err.kind(), "ChunkRejected");
        let err = mgr.upload_chunk(chunk(None, 0, 0, b"x")).await.unwrap_err();
        assert_eq!(err.kind(), "ChunkRejected");
        assert_eq!(store.inner.operation_counts(), Default::default());

        let name = mgr.upload_chunk(chunk(None, 0, 2, b"x")).await.unwrap().object_name;
        let err = mgr.upload_chunk(chunk(Some(&name), 1, 3, b"x")).await.unwrap_err();
        assert_eq!(err.kind(), "ChunkRejected");
    }

    #[tokio::test]
    async fn test_unknown_echoed_name() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        let err = mgr
            .upload_chunk(chunk(Some("video_20000101000000.mp4"), 0, 2, b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NoSuchSession");
        assert_eq!(mgr.finalize("uploads", "nope").await.unwrap_err().kind(), "NoSuchSession");
    }

    #[tokio::test]
    async fn test_chunks_without_echo_continue_open_session() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        let a = mgr.upload_chunk(chunk(None, 0, 2, b"aa")).await.unwrap();
        let b = mgr.upload_chunk(chunk(None, 1, 2, b"bb")).await.unwrap();
        assert_eq!(a.object_name, b.object_name);
        assert_eq!(b.finalized, Some(FinalizeOutcome::Committed));
        assert_eq!(mgr.active_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_stale_session_is_not_joined() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store).with_join_window(Duration::from_millis(20));

        // An earlier client staged two of three chunks and went away.
        let old = mgr.upload_chunk(chunk(None, 0, 3, b"OLD0")).await.unwrap().object_name;
        mgr.upload_chunk(chunk(Some(&old), 1, 3, b"OLD1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // A new upload whose first chunk to arrive is the last one.
        let first = mgr.upload_chunk(chunk(None, 2, 3, b"NEW2")).await.unwrap();
        assert_ne!(first.object_name, old);
        assert!(first.finalized.is_none());
        let new = first.object_name;
        mgr.upload_chunk(chunk(Some(&new), 0, 3, b"NEW0")).await.unwrap();
        let last = mgr.upload_chunk(chunk(Some(&new), 1, 3, b"NEW1")).await.unwrap();
        assert_eq!(last.finalized, Some(FinalizeOutcome::Committed));

        let blob = store.inner.get_blob("uploads", &new).await.unwrap();
        assert_eq!(blob.data.as_ref(), b"NEW0NEW1NEW2");
        assert_eq!(mgr.status("uploads", &old).await.unwrap().state, SessionState::Open);
    }

    #[tokio::test]
    async fn test_received_index_opens_new_session() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        let a = mgr.upload_chunk(chunk(None, 1, 2, b"A1")).await.unwrap();
        let b = mgr.upload_chunk(chunk(None, 1, 2, b"B1")).await.unwrap();
        assert_ne!(a.object_name, b.object_name);
        assert!(b.receipt.accepted);
        assert_eq!(b.receipt.received, 1);
        assert_eq!(mgr.active_sessions().await, 2);
    }

    #[tokio::test]
    async fn test_explicit_begins_get_distinct_names() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        let a = mgr.begin("uploads", "report.pdf", 2, None).await.unwrap();
        let b = mgr.begin("uploads", "report.pdf", 2, None).await.unwrap();
        assert_ne!(a.object_name, b.object_name);
        assert_eq!(a.content_type, "application/pdf");
        assert_eq!(store.inner.operation_counts().containers_created, 1);
    }

    #[tokio::test]
    async fn test_explicit_content_type_wins() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        let info = mgr
            .begin("uploads", "data.bin", 1, Some("application/x-custom"))
            .await
            .unwrap();
        mgr.stage_chunk("uploads", &info.object_name, 0, 1, Bytes::from_static(b"z"))
            .await
            .unwrap();
        mgr.finalize("uploads", &info.object_name).await.unwrap();
        let blob = store.inner.get_blob("uploads", &info.object_name).await.unwrap();
        assert_eq!(blob.content_type, "application/x-custom");
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let store = Arc::new(TestStore::default());
        let mgr = manager(&store);
        mgr.begin("uploads", "a.txt", 2, None).await.unwrap();
        mgr.begin("uploads", "b.txt", 2, None).await.unwrap();

        let name = mgr.begin("uploads", "c.txt", 2, None).await.unwrap().object_name;
        mgr.stage_chunk("uploads", &name, 0, 2, Bytes::from_static(b"cc"))
            .await
            .unwrap();
        assert_eq!(store.inner.staged_block_count("uploads", &name).await, 1);

        assert_eq!(mgr.sweep_expired(Instant::now()).await, 0);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(mgr.sweep_expired(later).await, 3);
        assert_eq!(mgr.active_sessions().await, 0);
        assert_eq!(store.inner.staged_block_count("uploads", &name).await, 0);
        assert_eq!(store.inner.staged_size().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let store = Arc::new(TestStore::default());
        let mgr = Arc::new(manager(&store));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(mgr.clone().run_sweeper(Duration::from_millis(10), shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
