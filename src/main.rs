use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    bundle_index::BundleIndex,
    kv_store::{KeyValueStore, MemoryKvStore, SqliteKvStore},
    log_service::LogService,
    retention::RetentionSweeper,
    storage_service::LogStorage,
};

const INDEX_PING_TIMEOUT: Duration = Duration::from_secs(10);
const MEMORY_INDEX_URL: &str = "memory:";

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting log-store with config: {:?}", cfg);

    // --- Initialize the bundle index ---
    let kv_store: Arc<dyn KeyValueStore> = if cfg.index_url == MEMORY_INDEX_URL {
        tracing::warn!("Using an in-memory index; bundles are lost on restart");
        Arc::new(MemoryKvStore::new())
    } else {
        Arc::new(open_sqlite_index(&cfg.index_url).await?)
    };

    if migrate {
        tracing::info!("Index migration complete.");
        return Ok(()); // exit after migration
    }

    tokio::time::timeout(INDEX_PING_TIMEOUT, kv_store.ping())
        .await
        .context("timed out pinging the index")?
        .context("failed to ping the index")?;

    // --- Initialize core services ---
    let storage = LogStorage::new(cfg.storage_layout(), cfg.promote_strategy()).await?;
    let index = BundleIndex::new(kv_store.clone(), cfg.retention);
    let limits = cfg.upload_limits();
    let service = LogService::new(storage.clone(), index, limits);

    // --- Start retention sweeper ---
    let shutdown = CancellationToken::new();
    let sweeper = RetentionSweeper::new(storage, kv_store, cfg.retention, cfg.cleanup_interval)
        .spawn(shutdown.clone());

    // --- Build router ---
    let app: Router = routes::routes::routes(limits.content_length_limit()).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    sweeper.await?;

    Ok(())
}

/// Connect to the SQLite index, creating the database file and its parent
/// directory if needed, and apply the schema.
async fn open_sqlite_index(index_url: &str) -> Result<SqliteKvStore> {
    tracing::debug!("Connecting using raw URL => {}", index_url);
    let db_path = index_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_options = SqliteConnectOptions::from_str(index_url)
        .with_context(|| format!("parsing index URL `{}`", index_url))?
        .create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    let store = SqliteKvStore::new(Arc::new(db));
    store.migrate().await?;
    Ok(store)
}
