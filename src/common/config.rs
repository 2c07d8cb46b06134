//! Configuration for memgrid components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    pub node_id: String,

    /// Coordinator-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the HTTP admin API
    pub bind_addr: SocketAddr,

    /// Simultaneous server-list update RPCs the updater starts with;
    /// adapted at runtime based on observed load
    #[serde(default = "default_concurrent_updates")]
    pub concurrent_updates: usize,

    /// Deadline for one update RPC before it is cancelled and retried
    /// (0 = wait forever)
    #[serde(default)]
    pub rpc_timeout_ms: u64,

    /// Deadline for the liveness ping that verifies a crash report
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,
}

fn default_concurrent_updates() -> usize {
    5
}
fn default_ping_timeout() -> u64 {
    250
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".parse().unwrap(),
            concurrent_updates: default_concurrent_updates(),
            rpc_timeout_ms: 0,
            ping_timeout_ms: default_ping_timeout(),
        }
    }
}

impl CoordinatorConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save to file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::Internal(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node_id.is_empty() {
            return Err(crate::Error::InvalidConfig("node_id is required".into()));
        }

        if let Some(coordinator) = &self.coordinator {
            if coordinator.concurrent_updates == 0 {
                return Err(crate::Error::InvalidConfig(
                    "concurrent_updates must be at least 1".into(),
                ));
            }
        }

        Ok(())
    }
}
