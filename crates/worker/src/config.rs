//! Configuration for the background worker
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

use nightwatch_core::config::env_flag;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Outbox dispatch interval in seconds
    pub poll_interval_secs: u64,

    /// Broadcast processing interval in seconds
    pub broadcast_interval_secs: u64,

    /// Maximum delivery retries before a message is parked
    pub max_retry_count: i64,

    /// Outbox claim batch size
    pub batch_size: i64,

    /// Timezone driving the daily archival clock
    pub timezone: String,

    /// Age threshold (days) for archiving severity-1 reports
    pub report_archive_days: i64,

    /// Whether the archival job runs at all
    pub report_auto_archive: bool,

    /// SMS gateway; absence selects the logging sender
    pub sms_api_url: Option<String>,
    pub sms_api_token: Option<String>,
    pub sms_from: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            poll_interval_secs: env::var("OUTBOX_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("OUTBOX_POLL_INTERVAL_SECS must be a valid integer")?,

            broadcast_interval_secs: env::var("BROADCAST_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("BROADCAST_POLL_INTERVAL_SECS must be a valid integer")?,

            max_retry_count: env::var("OUTBOX_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("OUTBOX_MAX_RETRIES must be a valid integer")?,

            batch_size: env::var("OUTBOX_BATCH_SIZE")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .context("OUTBOX_BATCH_SIZE must be a valid integer")?,

            timezone: env::var("TIMEZONE")
                .unwrap_or_else(|_| nightwatch_core::config::DEFAULT_TIMEZONE.to_string()),

            report_archive_days: env::var("REPORT_ARCHIVE_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("REPORT_ARCHIVE_DAYS must be a valid integer")?,

            report_auto_archive: env_flag("REPORT_AUTO_ARCHIVE", true),

            sms_api_url: env::var("SMS_API_URL").ok(),
            sms_api_token: env::var("SMS_API_TOKEN").ok(),
            sms_from: env::var("SMS_FROM").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_can_be_constructed() {
        let cfg = Config {
            poll_interval_secs: 60,
            broadcast_interval_secs: 30,
            max_retry_count: 3,
            batch_size: 25,
            timezone: "Africa/Johannesburg".to_string(),
            report_archive_days: 90,
            report_auto_archive: true,
            sms_api_url: None,
            sms_api_token: None,
            sms_from: None,
        };

        assert_eq!(cfg.max_retry_count, 3);
        assert_eq!(cfg.batch_size, 25);
    }
}
