//! Controller configuration
//!
//! Loaded from a YAML file; every section and field has a default so a
//! bare config (or none at all) still starts a working controller.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Controller identity used as the election candidate id
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            admin: AdminConfig::default(),
            storage: StorageConfig::default(),
            controller: ControllerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Admin HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Listen address of the admin API
    #[serde(default = "default_admin_addr")]
    pub addr: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: default_admin_addr(),
        }
    }
}

/// Which persistence engine to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    Memory,
    Rocksdb,
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_engine")]
    pub engine: StorageEngine,
    /// Data directory for the durable engine
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            data_dir: default_data_dir(),
        }
    }
}

/// Control loop timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Health probe tick interval in seconds
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Consecutive failed probes before an automatic failover
    #[serde(default = "default_failover_threshold")]
    pub failover_threshold: u32,
    /// Deadline for a single data-node RPC in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Deadline for pushing one cluster to all of its nodes in milliseconds
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Deadline for one slot-range migration in seconds
    #[serde(default = "default_migrate_timeout_secs")]
    pub migrate_timeout_secs: u64,
    /// Poll interval while a migration is in flight, milliseconds
    #[serde(default = "default_migrate_poll_interval_ms")]
    pub migrate_poll_interval_ms: u64,
    /// Leader lease TTL in seconds
    #[serde(default = "default_election_ttl_secs")]
    pub election_ttl_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            failover_threshold: default_failover_threshold(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            sync_timeout_ms: default_sync_timeout_ms(),
            migrate_timeout_secs: default_migrate_timeout_secs(),
            migrate_poll_interval_ms: default_migrate_poll_interval_ms(),
            election_ttl_secs: default_election_ttl_secs(),
        }
    }
}

impl ControllerConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn migrate_timeout(&self) -> Duration {
        Duration::from_secs(self.migrate_timeout_secs)
    }

    pub fn migrate_poll_interval(&self) -> Duration {
        Duration::from_millis(self.migrate_poll_interval_ms)
    }

    pub fn election_ttl(&self) -> Duration {
        Duration::from_secs(self.election_ttl_secs)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions

fn default_addr() -> String {
    "127.0.0.1:9379".to_string()
}

fn default_admin_addr() -> String {
    "127.0.0.1:9380".to_string()
}

fn default_engine() -> StorageEngine {
    StorageEngine::Rocksdb
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./controller_data")
}

fn default_probe_interval_secs() -> u64 {
    2
}

fn default_failover_threshold() -> u32 {
    5
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

fn default_sync_timeout_ms() -> u64 {
    10000
}

fn default_migrate_timeout_secs() -> u64 {
    300
}

fn default_migrate_poll_interval_ms() -> u64 {
    500
}

fn default_election_ttl_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.addr, "127.0.0.1:9379");
        assert_eq!(config.controller.probe_interval_secs, 2);
        assert_eq!(config.controller.failover_threshold, 5);
        assert_eq!(config.storage.engine, StorageEngine::Rocksdb);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_yaml(
            "addr: 10.0.0.1:9379\nstorage:\n  engine: memory\ncontroller:\n  failover_threshold: 3\n",
        )
        .unwrap();
        assert_eq!(config.addr, "10.0.0.1:9379");
        assert_eq!(config.storage.engine, StorageEngine::Memory);
        assert_eq!(config.controller.failover_threshold, 3);
        assert_eq!(config.controller.probe_interval_secs, 2);
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        assert!(Config::from_yaml("addr: [").is_err());
    }
}
