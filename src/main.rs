//! blobrelay -- chunked upload coordinator for block-blob storage.
//!
//! Upload sessions live in memory only.  On SIGTERM/SIGINT the server stops
//! accepting connections, cancels in-flight streamed uploads and waits up to
//! `server.shutdown_timeout` seconds for requests to drain.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blobrelay::storage::backend::ObjectStore;

/// Command-line arguments for the blobrelay server.
#[derive(Parser, Debug)]
#[command(
    name = "blobrelay",
    version,
    about = "Chunked upload coordinator for block-blob storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "blobrelay.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = blobrelay::config::load_config(&cli.config)?;

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        blobrelay::metrics::init_metrics();
        blobrelay::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let store: Arc<dyn ObjectStore> = match config.storage.backend.as_str() {
        "azure" => {
            let azure_config = config.storage.azure.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is 'azure' but storage.azure config section is missing")
            })?;
            let store = blobrelay::storage::azure::AzureBlobStore::new(azure_config)?;
            info!(
                "Azure Blob store initialized: account={} emulator={}",
                azure_config.account, azure_config.use_emulator
            );
            Arc::new(store)
        }
        "memory" => {
            let max_size = config
                .storage
                .memory
                .as_ref()
                .map_or(0, |m| m.max_size_bytes);
            info!("In-memory object store initialized (max_size_bytes={})", max_size);
            Arc::new(blobrelay::storage::memory::MemoryStore::new(max_size))
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected 'memory' or 'azure')"),
    };

    let state = Arc::new(blobrelay::AppState::new(config.clone(), store));

    tokio::spawn(
        state
            .sessions
            .clone()
            .run_sweeper(config.upload.sweep_interval(), state.shutdown.clone()),
    );

    let app = blobrelay::server::app(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("blobrelay listening on {}", bind_addr);

    let token = state.shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                token.cancel();
            })
            .await
    });

    tokio::select! {
        result = &mut server => result??,
        _ = state.shutdown.cancelled() => {
            let grace = Duration::from_secs(config.server.shutdown_timeout);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result??,
                Err(_) => warn!(
                    "In-flight requests still running after {}s; exiting",
                    config.server.shutdown_timeout
                ),
            }
        }
    }

    info!("blobrelay shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
