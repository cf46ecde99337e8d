//! Unified configuration for the single-process server

use anyhow::{Result, bail};

use nightwatch_core::config::{CoreConfig, DEV_JWT_SECRET, is_production};

/// Configuration for every embedded service
#[derive(Debug, Clone)]
pub struct UnifiedConfig {
    pub core: CoreConfig,
    pub api: api::config::Config,
    pub worker: worker::Config,
}

impl UnifiedConfig {
    /// Load and validate configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            core: CoreConfig::from_env()?,
            api: api::config::Config::from_env()?,
            worker: worker::Config::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Refuse configurations that must never reach production
    fn validate(&self) -> Result<()> {
        if is_production() {
            if self.api.dev_mode {
                bail!("DEV_MODE must not be enabled in production");
            }
            if self.api.jwt_secret == DEV_JWT_SECRET {
                bail!("JWT_SECRET is still the development default; refusing to start");
            }
        }
        Ok(())
    }
}
