//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::relay::buffer::DEFAULT_CAPACITY;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub monitoring: MonitoringConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Backlog passed to `listen`; 0 asks for the implementation minimum
    pub listen_backlog: u32,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Per-session relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of each direction's buffer in bytes
    pub buffer_size: usize,
    /// Enable SO_OOBINLINE on relayed sockets
    pub oob_inline: bool,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

/// Where to listen and where to forward, as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub bind_host: Option<String>,
    pub bind_service: Option<String>,
    pub connect_host: String,
    pub connect_service: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            relay: RelayConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_backlog: 0,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_CAPACITY,
            oob_inline: true,
            idle_timeout: None,
            connect_timeout: None,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
