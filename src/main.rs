//! bucketdesk -- document bucket gateway.
//!
//! SIGTERM/SIGINT handlers only stop accepting connections and wait for
//! in-flight requests before exiting.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bucketdesk::config::{Config, LoggingConfig};
use bucketdesk::signing::{SidecarSigner, UrlSigner};
use bucketdesk::storage::backend::ObjectBackend;
use bucketdesk::storage::gcs::GcsBackend;
use bucketdesk::storage::memory::MemoryBackend;

/// Command-line arguments for the bucketdesk server.
#[derive(Parser, Debug)]
#[command(
    name = "bucketdesk",
    version,
    about = "Document bucket browsing, signed links and object ACLs"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "bucketdesk.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// Initialise tracing from the logging section. `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_backend(config: &Config) -> anyhow::Result<Arc<dyn ObjectBackend>> {
    let storage = &config.storage;
    match storage.backend.as_str() {
        "gcs" => {
            if storage.bucket.is_empty() {
                anyhow::bail!(
                    "storage.backend is 'gcs' but no bucket is configured (storage.bucket or BUCKETDESK_BUCKET)"
                );
            }
            let backend = GcsBackend::new(
                &storage.bucket,
                &storage.sidecar_endpoint,
                storage.request_timeout_secs,
            )?;
            info!(
                "GCS storage backend initialized: bucket={} sidecar={}",
                storage.bucket, storage.sidecar_endpoint
            );
            Ok(Arc::new(backend))
        }
        "memory" => {
            info!("In-memory storage backend initialized: bucket={}", storage.bucket);
            Ok(Arc::new(MemoryBackend::new(&storage.bucket)))
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected 'gcs' or 'memory')"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = bucketdesk::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        bucketdesk::metrics::init_metrics()?;
        bucketdesk::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let backend = build_backend(&config)?;
    let signer: Arc<dyn UrlSigner> = Arc::new(SidecarSigner::new(
        &config.storage.sidecar_endpoint,
        config.storage.request_timeout_secs,
    )?);

    let state = Arc::new(bucketdesk::AppState::new(config, backend, signer));
    let app = bucketdesk::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("bucketdesk listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("bucketdesk shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
