//! Shared configuration logic
//!
//! Handles loading of common environment variables.

use anyhow::{Context, Result};
use std::env;

/// Development JWT secret. The server refuses to start with this value in
/// production.
pub const DEV_JWT_SECRET: &str = "nightwatch-dev-secret-change-me";

/// Default schedule timezone
pub const DEFAULT_TIMEZONE: &str = "Africa/Johannesburg";

/// Common configuration used across services
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Path of the embedded SQLite database file
    pub database_path: String,

    /// Maximum connections in the shared pool
    pub db_max_connections: u32,

    /// Default IANA timezone for schedules and the archival clock
    pub timezone: String,
}

impl CoreConfig {
    /// Load common configuration from environment variables
    ///
    /// This will also initialize dotenv if it hasn't been done yet.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./nightwatch.db".to_string()),
            db_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid integer")?,
            timezone: env::var("TIMEZONE").unwrap_or_else(|_| DEFAULT_TIMEZONE.to_string()),
        })
    }
}

/// Read a boolean flag from the environment ("1", "true", "yes" count as set)
pub fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// True when `APP_ENV` declares a production deployment
pub fn is_production() -> bool {
    env::var("APP_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_flag_default() {
        assert!(env_flag("NIGHTWATCH_TEST_FLAG_THAT_DOES_NOT_EXIST", true));
        assert!(!env_flag("NIGHTWATCH_TEST_FLAG_THAT_DOES_NOT_EXIST", false));
    }
}
