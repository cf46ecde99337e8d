//! Server configuration from environment variables

use anyhow::{Context, Result};
use std::env;

use nightwatch_core::config::{DEV_JWT_SECRET, env_flag};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "nightwatch_session";

/// API server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub otp_validity_minutes: i64,
    pub dev_mode: bool,
    pub cancellation_hours: i64,
    pub checkin_grace_minutes: i64,
    pub vapid_public_key: Option<String>,
    pub cors_allowed_origin: String,
    pub default_timezone: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "5888".to_string())
                .parse()
                .context("Failed to parse SERVER_PORT as u16")?,
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string()),
            jwt_expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .unwrap_or_else(|_| "336".to_string())
                .parse()
                .context("JWT_EXPIRATION_HOURS must be a valid integer")?,
            otp_validity_minutes: env::var("OTP_VALIDITY_MINUTES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("OTP_VALIDITY_MINUTES must be a valid integer")?,
            dev_mode: env_flag("DEV_MODE", false),
            cancellation_hours: env::var("SHIFT_CANCELLATION_HOURS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("SHIFT_CANCELLATION_HOURS must be a valid integer")?,
            checkin_grace_minutes: env::var("CHECKIN_GRACE_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("CHECKIN_GRACE_MINUTES must be a valid integer")?,
            vapid_public_key: env::var("VAPID_PUBLIC_KEY").ok(),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            default_timezone: env::var("TIMEZONE")
                .unwrap_or_else(|_| nightwatch_core::config::DEFAULT_TIMEZONE.to_string()),
        })
    }

    /// Config suitable for tests: dev mode on, short OTP validity
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_expiration_hours: 2,
            otp_validity_minutes: 5,
            dev_mode: true,
            cancellation_hours: 2,
            checkin_grace_minutes: 30,
            vapid_public_key: None,
            cors_allowed_origin: "*".to_string(),
            default_timezone: "Africa/Johannesburg".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_tests_is_dev_mode() {
        let config = Config::for_tests();
        assert!(config.dev_mode);
        assert_eq!(config.cancellation_hours, 2);
        assert_eq!(config.checkin_grace_minutes, 30);
    }
}
