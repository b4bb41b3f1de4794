//! Configuration for the controller
//!
//! Values are layered: built-in defaults, then an optional `controller.toml`
//! in the working directory, then `DFS_*` environment variables. The
//! positional command line parameters are applied last by the binary.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Port for client and storage peer connections
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interface to bind on
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Replication factor (R)
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Storage peer inactivity timeout, also bounds each probe round trip
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between rebalance passes
    #[serde(default = "default_rebalance_period_secs")]
    pub rebalance_period_secs: u64,

    /// Storage root shared with peers started on this host
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    4322
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_replication_factor() -> usize {
    2
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_rebalance_period_secs() -> u64 {
    7
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("dStorage")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_host: default_bind_host(),
            replication_factor: default_replication_factor(),
            timeout_ms: default_timeout_ms(),
            rebalance_period_secs: default_rebalance_period_secs(),
            storage_dir: default_storage_dir(),
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// Load defaults, `controller.toml` and `DFS_*` overrides.
    pub fn load() -> Result<Self> {
        Self::load_from("controller")
    }

    /// Same as [`ControllerConfig::load`] with an explicit file stem.
    pub fn load_from(file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("DFS"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn rebalance_period(&self) -> Duration {
        Duration::from_secs(self.rebalance_period_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication factor must be at least 1".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout must be non-zero".into()));
        }
        if self.rebalance_period_secs == 0 {
            return Err(Error::InvalidConfig(
                "rebalance period must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
