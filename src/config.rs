//! Configuration loading and types for blobrelay.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, logging, the object store behind the relay, the
//! chunked upload pipeline, and signed-URL grants.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Chunked and streamed upload settings.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Signed-URL grant settings.
    #[serde(default)]
    pub grants: GrantConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health check).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Ceiling for streamed and server-relayed uploads (default 10 GiB).
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Ceiling for `/blob/upload`, which buffers the whole file.
    #[serde(default = "default_max_simple_upload_size")]
    pub max_simple_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_object_size: default_max_object_size(),
            max_simple_upload_size: default_max_simple_upload_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` endpoint.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `memory` or `azure`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Memory storage configuration.
    #[serde(default)]
    pub memory: Option<MemoryStorageConfig>,

    /// Azure Blob Storage configuration.
    #[serde(default)]
    pub azure: Option<AzureStorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            memory: None,
            azure: None,
        }
    }
}

/// Memory storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStorageConfig {
    /// Maximum total committed size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// Azure Blob Storage configuration.
///
/// Credentials are never read from this file; see
/// [`crate::storage::azure::AzureBlobStore::new`].
#[derive(Debug, Clone, Deserialize)]
pub struct AzureStorageConfig {
    /// Storage account name.
    pub account: String,
    /// Custom blob endpoint, e.g. `http://127.0.0.1:10000/devstoreaccount1`.
    /// Empty means `https://{account}.blob.core.windows.net`.
    #[serde(default)]
    pub endpoint: String,
    /// Talk to a local storage emulator with its well-known key.
    #[serde(default)]
    pub use_emulator: bool,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

/// Chunked and streamed upload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Block size used when splitting streamed and server-relayed uploads.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Idle time after which a chunked session is discarded.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    /// How often the session sweeper runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// A chunk that does not echo `objectName` only joins an open session
    /// that saw activity within this window.
    #[serde(default = "default_join_window")]
    pub join_window_seconds: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            session_ttl_seconds: default_session_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            join_window_seconds: default_join_window(),
        }
    }
}

impl UploadConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn join_window(&self) -> Duration {
        Duration::from_secs(self.join_window_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

/// Signed-URL grant configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantConfig {
    /// Lifetime of a direct-upload URL.
    #[serde(default = "default_upload_validity")]
    pub upload_validity_seconds: u64,

    /// Start times are backdated by this much to tolerate client clock skew.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,

    /// Lifetime of read URLs attached to listings and `/blob/sas`.
    #[serde(default = "default_read_validity")]
    pub read_validity_seconds: u64,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            upload_validity_seconds: default_upload_validity(),
            clock_skew_seconds: default_clock_skew(),
            read_validity_seconds: default_read_validity(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_object_size() -> u64 {
    10_737_418_240 // 10 GiB
}

fn default_max_simple_upload_size() -> u64 {
    268_435_456 // 256 MiB
}

fn default_request_timeout() -> u64 {
    300
}

fn default_block_size() -> usize {
    4 * 1024 * 1024
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_join_window() -> u64 {
    30
}

fn default_upload_validity() -> u64 {
    3600
}

fn default_clock_skew() -> u64 {
    300
}

fn default_read_validity() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    if config.upload.block_size == 0 {
        anyhow::bail!("upload.block_size must be greater than zero");
    }
    Ok(config)
}
