//! blobrelay library: chunked upload coordinator for block-blob storage.
//!
//! This crate provides the upload-session state machine, the block id
//! codec, a streaming block splitter, signed-URL grants, the HTTP surface
//! and pluggable object store backends (Azure Blob and in-memory).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod upload;
pub mod xml;

use crate::config::Config;
use crate::storage::backend::ObjectStore;
use crate::upload::naming::NameAllocator;
use crate::upload::session::UploadSessionManager;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Object store backend (Azure Blob or in-memory).
    pub store: Arc<dyn ObjectStore>,
    /// Chunked upload sessions.
    pub sessions: Arc<UploadSessionManager>,
    /// Derived names handed out by every upload path.
    pub names: Arc<NameAllocator>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state around `store` with a fresh session registry.
    pub fn new(config: Config, store: Arc<dyn ObjectStore>) -> Self {
        let names = Arc::new(NameAllocator::new());
        let sessions = Arc::new(
            UploadSessionManager::new(store.clone(), config.upload.session_ttl())
                .with_join_window(config.upload.join_window())
                .with_name_allocator(names.clone()),
        );
        Self {
            config,
            store,
            sessions,
            names,
            shutdown: CancellationToken::new(),
        }
    }
}
