//! driftsync client binary.

use anyhow::{Context, Result};
use clap::Parser;
use driftsync_client::{ApiClient, ChangeDetector, LocalEventQueue, SyncCoordinator};
use driftsync_core::config::ClientConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// driftsync - keep a local directory in sync with a driftsync server
#[derive(Parser, Debug)]
#[command(name = "driftsync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server base URL
    #[arg(short, long, env = "DRIFTSYNC_SERVER_URL")]
    server: Option<String>,

    /// Access token
    #[arg(short, long, env = "DRIFTSYNC_TOKEN")]
    token: Option<String>,

    /// Directory to keep in sync
    #[arg(short, long, env = "DRIFTSYNC_DIR")]
    dir: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, env = "DRIFTSYNC_CLIENT_CONFIG")]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut figment = Figment::new();
    if let Some(path) = &args.config {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("DRIFTSYNC_CLIENT_").split("__"));

    // CLI flags override everything.
    let mut overrides = serde_json::Map::new();
    if let Some(server) = &args.server {
        overrides.insert("server_url".into(), server.clone().into());
    }
    if let Some(token) = &args.token {
        overrides.insert("token".into(), token.clone().into());
    }
    if let Some(dir) = &args.dir {
        overrides.insert("sync_dir".into(), dir.display().to_string().into());
    }
    if !overrides.is_empty() {
        figment = figment.merge(Serialized::defaults(serde_json::Value::Object(overrides)));
    }

    figment.extract().context(
        "incomplete configuration: server_url, token and sync_dir are required \
         (via flags, env vars, or a config file)",
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(load_config(&args)?);
    tracing::info!(
        server = %config.server_url,
        dir = %config.sync_dir.display(),
        "driftsync v{}",
        env!("CARGO_PKG_VERSION")
    );

    tokio::fs::create_dir_all(&config.sync_dir)
        .await
        .context("failed to create sync directory")?;

    let queue = Arc::new(
        LocalEventQueue::open(config.state_db_path())
            .await
            .context("failed to open state database")?,
    );
    let client_id = queue.client_id().await.context("failed to load client id")?;

    let api = Arc::new(
        ApiClient::new(
            &config.server_url,
            &config.token,
            config.chunk_threshold,
            config.chunk_size,
        )
        .context("failed to build API client")?,
    );

    // The token decides which workspace we sync.
    let owner_id = api
        .whoami()
        .await
        .context("authentication failed; check the access token")?;
    tracing::info!(%owner_id, %client_id, "authenticated");

    let token = CancellationToken::new();
    let (trigger_tx, trigger_rx) = mpsc::channel(8);

    // Seed the queue from whatever changed while we were not running.
    let detector = Arc::new(ChangeDetector::new(
        config.clone(),
        owner_id,
        client_id,
        queue.clone(),
    ));
    detector.scan().await.context("initial scan failed")?;

    let coordinator = Arc::new(SyncCoordinator::new(
        config.clone(),
        client_id,
        queue.clone(),
        api.clone(),
    ));

    let watcher_task = tokio::spawn(detector.clone().run(token.clone()));
    let listener_task = tokio::spawn(driftsync_client::push::run_push_listener(
        (*api).clone(),
        client_id,
        trigger_tx.clone(),
        token.clone(),
    ));
    let coordinator_task = tokio::spawn(coordinator.clone().run(trigger_rx, token.clone()));

    // First cycle immediately rather than waiting out the interval.
    let _ = trigger_tx.send(()).await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    token.cancel();

    let _ = coordinator_task.await;
    let _ = watcher_task.await;
    let _ = listener_task.await;

    if coordinator.is_degraded() {
        tracing::warn!("some events repeatedly failed to sync; they remain queued");
    }

    Ok(())
}
