//! # Configuration Management Module
//!
//! TOML configuration for the state layer and the `meshpanel` binary.
//!
//! ## Configuration Structure
//!
//! - [`RetentionConfig`] - caps on devices, node databases, traceroutes and waypoints
//! - [`StorageConfig`] - snapshot location and write batching
//! - [`NotifierConfig`] - default debounce for change subscriptions
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshpanel::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("Device cap: {}", config.retention.max_devices);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [retention]
//! max_devices = 10
//! max_node_databases = 10
//! max_traceroute_targets = 100
//! max_traceroutes_per_target = 100
//! max_waypoints = 100
//!
//! [storage]
//! data_dir = "./data"
//! persist_debounce_ms = 500
//!
//! [notifier]
//! default_debounce_ms = 100
//!
//! [logging]
//! level = "info"
//! file = "meshpanel.log"
//! ```
//!
//! Every section and field falls back to its default when omitted.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

pub use crate::retention::RetentionConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Delay between the first unsaved mutation and the snapshot write.
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_persist_debounce_ms() -> u64 {
    500
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist_debounce_ms: default_persist_debounce_ms(),
        }
    }
}

impl StorageConfig {
    /// Directory holding the sled snapshot tree.
    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("state")
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_debounce_ms")]
    pub default_debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            default_debounce_ms: default_debounce_ms(),
        }
    }
}

impl NotifierConfig {
    pub fn default_debounce(&self) -> Duration {
        Duration::from_millis(self.default_debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: Some("meshpanel.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject caps that would make a collection unusable.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retention;
        for (name, value) in [
            ("max_devices", r.max_devices),
            ("max_node_databases", r.max_node_databases),
            ("max_traceroute_targets", r.max_traceroute_targets),
            ("max_traceroutes_per_target", r.max_traceroutes_per_target),
            ("max_waypoints", r.max_waypoints),
        ] {
            if value == 0 {
                return Err(anyhow!("retention.{} must be at least 1", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn default_config_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.retention, RetentionConfig::default());
        assert_eq!(loaded.storage.persist_debounce_ms, 500);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = toml::from_str("[retention]\nmax_devices = 3\n").unwrap();
        assert_eq!(config.retention.max_devices, 3);
        assert_eq!(config.retention.max_waypoints, 100);
        assert_eq!(config.storage.data_dir, "./data");
        assert_eq!(config.notifier.default_debounce(), Duration::from_millis(100));
    }

    #[test]
    fn zero_cap_is_rejected() {
        let config: Config = toml::from_str("[retention]\nmax_waypoints = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_waypoints"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = tokio_test::block_on(Config::load("/nonexistent/meshpanel.toml"));
        assert!(result.is_err());
    }
}
