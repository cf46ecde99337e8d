//! Nightwatch Worker - Background job processor
//!
//! Runs the outbox dispatcher, broadcast fan-out and report archival as
//! independent periodic tasks sharing only the database pool, a sender and
//! the shutdown token.

mod archival;
mod broadcast;
mod config;
mod db;
mod dispatch;
mod sender;

pub use archival::{ArchivePolicy, archive_old_reports, until_next_archival};
pub use broadcast::process_due_broadcasts;
pub use config::Config;
pub use db::{JobResult, WorkerDb};
pub use dispatch::Dispatcher;
pub use sender::{LogSender, Outbound, OutboundSender, SendOutcome, build_sender};

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run the background worker until cancelled
///
/// # Arguments
/// * `pool` - Database connection pool
/// * `config` - Worker configuration
/// * `shutdown` - Cancellation token for graceful shutdown
pub async fn run_worker(
    pool: SqlitePool,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let tz: Tz = config
        .timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid TIMEZONE '{}'", config.timezone))?;

    let db = WorkerDb::new(pool);
    let sender = sender::build_sender(&config);
    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        sender,
        config.batch_size,
        config.max_retry_count,
    ));

    info!(
        "Starting worker: poll_interval={}s, broadcast_interval={}s, max_retries={}, batch_size={}",
        config.poll_interval_secs,
        config.broadcast_interval_secs,
        config.max_retry_count,
        config.batch_size
    );

    let dispatch_handle = tokio::spawn(dispatch_loop(
        dispatcher,
        db.clone(),
        config.poll_interval_secs,
        shutdown.clone(),
    ));
    let broadcast_handle = tokio::spawn(broadcast_loop(
        db.clone(),
        config.broadcast_interval_secs,
        shutdown.clone(),
    ));
    let archival_handle = tokio::spawn(archival_loop(
        db,
        ArchivePolicy::new(config.report_archive_days),
        tz,
        config.report_auto_archive,
        shutdown,
    ));

    let (dispatch, broadcast, archival) =
        tokio::join!(dispatch_handle, broadcast_handle, archival_handle);
    dispatch.context("dispatch loop panicked")?;
    broadcast.context("broadcast loop panicked")?;
    archival.context("archival loop panicked")?;

    info!("Worker shutdown complete");
    Ok(())
}

/// Outbox dispatch every `poll_interval_secs`, with opportunistic cleanup of
/// expired auth state on the same tick
async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    db: WorkerDb,
    poll_interval_secs: u64,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Dispatch loop shutting down");
                break;
            }
            _ = interval.tick() => {
                match dispatcher.tick(&shutdown).await {
                    Ok(attempted) if attempted > 0 => {
                        match db.count_pending().await {
                            Ok(pending) if pending > 0 => {
                                info!("Dispatched {attempted} message(s), {pending} still pending");
                            }
                            Ok(_) => info!("Dispatched {attempted} message(s)"),
                            Err(e) => error!("Failed to count pending messages: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!("Outbox dispatch tick failed: {e}"),
                }

                if let Err(e) = db.cleanup_auth_state(Utc::now()).await {
                    error!("Auth state cleanup failed: {e}");
                }
            }
        }
    }
}

/// Broadcast fan-out every `broadcast_interval_secs`
async fn broadcast_loop(db: WorkerDb, broadcast_interval_secs: u64, shutdown: CancellationToken) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(broadcast_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Broadcast loop shutting down");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = broadcast::process_due_broadcasts(&db).await {
                    error!("Broadcast tick failed: {e}");
                }
            }
        }
    }
}

/// Report archival daily at 02:00 local time
async fn archival_loop(
    db: WorkerDb,
    policy: ArchivePolicy,
    tz: Tz,
    enabled: bool,
    shutdown: CancellationToken,
) {
    if !enabled {
        info!("Report auto-archival disabled");
        return;
    }

    loop {
        let wait = archival::until_next_archival(tz, Utc::now());
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Archival loop shutting down");
                break;
            }
            _ = tokio::time::sleep(wait) => {
                match archival::archive_old_reports(&db, policy, Utc::now()).await {
                    Ok(archived) => info!("Archival tick complete, {archived} report(s) archived"),
                    Err(e) => error!("Archival tick failed: {e}"),
                }
            }
        }
    }
}
