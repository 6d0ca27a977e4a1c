//! Deckhand worker binary
//!
//! Wires the job executors into a scheduler over the shared SQLite
//! database and runs until interrupted.

use std::fs;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deckhand_scheduler::{JobScheduler, SqliteJobStore};
use deckhand_worker::jobs::build_registry;
use deckhand_worker::library::TrackStore;
use deckhand_worker::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deckhand_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load worker configuration")?;

    tracing::info!(
        environment = ?config.environment(),
        library = %config.music_library_path().display(),
        "Starting Deckhand worker"
    );

    if let Some(dir) = config.database().parent_dir() {
        fs::create_dir_all(dir).context("Failed to create database directory")?;
    }

    let store = SqliteJobStore::connect(
        &config.database_url(),
        config.database().max_connections,
        std::time::Duration::from_secs(config.database().busy_timeout_secs),
    )
    .await
    .context("Failed to open the job database")?;
    store
        .init_schema()
        .await
        .context("Failed to initialize the job schema")?;

    let tracks = TrackStore::new(store.pool().clone());
    tracks
        .init_schema()
        .await
        .context("Failed to initialize the track schema")?;

    let registry = build_registry(
        tracks,
        config.music_library_path().to_path_buf(),
        config.export_path().to_path_buf(),
    );

    let scheduler = JobScheduler::new(store, registry, config.scheduler_config());
    scheduler
        .start()
        .await
        .context("Failed to start the job scheduler")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    let aborted = scheduler.abort_all_jobs("worker shutting down").await?;
    if aborted > 0 {
        tracing::info!(aborted, "Cancelled in-flight jobs");
    }
    scheduler.shutdown().await;
    scheduler.store().pool().close().await;

    tracing::info!("Deckhand worker stopped");
    Ok(())
}
