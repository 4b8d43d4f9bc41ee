//! Configuration management for Keythrottle.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ThrottleError};

/// Main configuration for the Keythrottle service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeythrottleConfig {
    /// Admission gate configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Throttle configuration
    #[serde(default)]
    pub throttle: ThrottleSettings,
}

/// Admission gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the gate listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

/// Throttle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Maximum admissions per key per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// How often expired windows are swept, in milliseconds
    #[serde(default = "default_clean_interval_ms")]
    pub clean_interval_ms: u64,

    /// Use the sharded registry instead of the single-lock one
    #[serde(default)]
    pub sharded: bool,

    /// Shard count for the sharded registry
    #[serde(default)]
    pub shards: Option<usize>,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            period_ms: default_period_ms(),
            clean_interval_ms: default_clean_interval_ms(),
            sharded: false,
            shards: None,
        }
    }
}

fn default_limit() -> u64 {
    60
}

fn default_period_ms() -> u64 {
    60_000
}

fn default_clean_interval_ms() -> u64 {
    30_000
}

impl ThrottleSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn clean_interval(&self) -> Duration {
        Duration::from_millis(self.clean_interval_ms)
    }
}

impl KeythrottleConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: KeythrottleConfig =
            serde_yaml::from_str(yaml).map_err(|e| ThrottleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the throttle cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.throttle.period_ms == 0 {
            return Err(ThrottleError::Config(
                "throttle.period_ms must be greater than zero".to_string(),
            ));
        }
        if self.throttle.clean_interval_ms == 0 {
            return Err(ThrottleError::Config(
                "throttle.clean_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.throttle.shards == Some(0) {
            return Err(ThrottleError::Config(
                "throttle.shards must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
