use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use nightwatch_core::CronCache;

mod config;

/// Grace period for draining in-flight work after a shutdown signal
const SHUTDOWN_GRACE_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    nightwatch_shared::bootstrap::init_env();

    // The guard must be kept alive for the duration of the program to ensure logs are flushed
    let _guard = nightwatch_shared::bootstrap::init_tracing("nightwatch");

    tracing::info!("🦉 Starting Nightwatch server");

    let config = config::UnifiedConfig::from_env()?;
    tracing::info!("✓ Configuration loaded");

    let pool = nightwatch_shared::bootstrap::init_db(&config.core).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("✓ Migrations completed");

    let shutdown = CancellationToken::new();

    let api_handle = spawn_api(pool.clone(), config.clone(), shutdown.clone());
    let worker_handle = spawn_worker(pool.clone(), config.clone(), shutdown.clone());

    tracing::info!("✓ All services started");

    wait_for_shutdown().await;
    tracing::info!("📡 Shutdown signal received");

    shutdown.cancel();

    // Drain in-flight requests and jobs, but never hang forever
    let drain = async {
        let _ = tokio::join!(api_handle, worker_handle);
    };
    if tokio::time::timeout(std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS), drain)
        .await
        .is_err()
    {
        tracing::warn!("Grace period elapsed, terminating with work in flight");
    } else {
        tracing::info!("✓ All services stopped gracefully");
    }

    Ok(())
}

fn spawn_api(
    pool: SqlitePool,
    config: config::UnifiedConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let state = api::AppState {
            pool,
            cron_cache: CronCache::new(),
            config: Arc::new(config.api.clone()),
        };

        let result = api::run_api(state, &config.api, shutdown).await;
        if let Err(e) = &result {
            tracing::error!("API service exited: {e}");
        }
        result.map_err(Into::into)
    })
}

fn spawn_worker(
    pool: SqlitePool,
    config: config::UnifiedConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move { worker::run_worker(pool, config.worker, shutdown).await })
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
