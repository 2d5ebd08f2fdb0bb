//! driftsync server binary.

use anyhow::{Context, Result};
use clap::Parser;
use driftsync_core::config::{AppConfig, MetadataConfig, StorageConfig};
use driftsync_metadata::{MetadataStore, SqliteStore};
use driftsync_server::bootstrap::ensure_owner_token;
use driftsync_server::{AppState, create_router};
use driftsync_storage::ContentStore;
use driftsync_storage::backends::FilesystemBackend;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// driftsync - authoritative file synchronization server
#[derive(Parser, Debug)]
#[command(name = "driftsyncd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DRIFTSYNC_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("driftsyncd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override
    // everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "loading configuration file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::info!(
            path = %config_path.display(),
            "configuration file not found, using env vars and defaults"
        );
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("DRIFTSYNC_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Storage backend
    let StorageConfig::Filesystem { path } = &config.storage;
    let backend = FilesystemBackend::new(path)
        .await
        .context("failed to initialize storage backend")?;
    let content = Arc::new(ContentStore::new(
        Arc::new(backend),
        config.server.upload_timeout(),
    ));
    tracing::info!(path = %path.display(), "storage backend ready");

    // Metadata store
    let MetadataConfig::Sqlite { path } = &config.metadata;
    let metadata: Arc<dyn MetadataStore> = Arc::new(
        SqliteStore::new(path)
            .await
            .context("failed to open metadata store")?,
    );
    tracing::info!(path = %path.display(), "metadata store ready");

    // Bootstrap the configured owner's token
    if let Some(auth) = &config.auth {
        ensure_owner_token(&metadata, auth)
            .await
            .context("failed to bootstrap owner token")?;
    } else {
        tracing::warn!("no [auth] configured; every request will be rejected as unauthenticated");
    }

    let bind = config.server.bind.clone();
    let sweep_interval = Duration::from_secs(config.server.sweep_interval_secs.max(1));
    let state = AppState::new(config, content, metadata);

    // Abandoned chunk sessions beyond their timeout get swept in the
    // background.
    let sweeper_content = state.content.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let swept = sweeper_content.sweep_expired().await;
            if swept > 0 {
                tracing::info!(swept, "expired upload sessions swept");
            }
        }
    });

    let router = create_router(state);

    let addr: SocketAddr = bind.parse().context("invalid bind address")?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind")?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
