use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;

use nightwatch_core::config::CoreConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize dotenvy
pub fn init_env() {
    dotenvy::dotenv().ok();
}

/// Initialize tracing with optional file logging
pub fn init_tracing(service_name: &str) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // If LOG_DIR is set, use it. Default to "logs/app"
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs/app".to_string());

    let now = chrono::Local::now().format("%y-%m-%d-%H-%M-%S").to_string();
    let filename = format!("nightwatch-{}.log.{}.jsonl", service_name, now);

    let file_appender = tracing_appender::rolling::never(&log_dir, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = format!("info,{}=debug,sqlx=warn", service_name);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .json(),
        )
        .init();

    Some(guard)
}

/// Initialize the embedded SQLite pool
pub async fn init_db(config: &CoreConfig) -> Result<sqlx::SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.database_path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect_with(options)
        .await?;

    tracing::info!(
        "✓ Database ready at {} (max_connections: {})",
        config.database_path,
        config.db_max_connections
    );

    Ok(pool)
}
