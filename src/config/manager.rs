//! Configuration Manager

use super::{Config, ForwardTarget};
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;
use std::time::Duration;

/// Largest accepted per-direction buffer
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        Self::apply_env(Config::default(), |key| std::env::var(key).ok())
    }

    /// Override `config` with any `TCPFWD_*` variables `lookup` can find
    pub fn apply_env<F>(mut config: Config, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(size) = lookup("TCPFWD_BUFFER_SIZE") {
            config.relay.buffer_size = size
                .parse::<usize>()
                .with_context(|| format!("Invalid TCPFWD_BUFFER_SIZE: {}", size))?;
        }

        if let Some(backlog) = lookup("TCPFWD_LISTEN_BACKLOG") {
            config.server.listen_backlog = backlog
                .parse::<u32>()
                .with_context(|| format!("Invalid TCPFWD_LISTEN_BACKLOG: {}", backlog))?;
        }

        if let Some(timeout) = lookup("TCPFWD_IDLE_TIMEOUT") {
            config.relay.idle_timeout = Some(
                humantime::parse_duration(&timeout)
                    .with_context(|| format!("Invalid TCPFWD_IDLE_TIMEOUT: {}", timeout))?,
            );
        }

        if let Some(timeout) = lookup("TCPFWD_CONNECT_TIMEOUT") {
            config.relay.connect_timeout = Some(
                humantime::parse_duration(&timeout)
                    .with_context(|| format!("Invalid TCPFWD_CONNECT_TIMEOUT: {}", timeout))?,
            );
        }

        if let Some(timeout) = lookup("TCPFWD_SHUTDOWN_TIMEOUT") {
            config.server.shutdown_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid TCPFWD_SHUTDOWN_TIMEOUT: {}", timeout))?;
        }

        if let Some(log_level) = lookup("TCPFWD_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.listen_backlog > u16::MAX as u32 {
            bail!("listen_backlog cannot exceed {}", u16::MAX);
        }

        if self.server.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.buffer_size == 0 {
            bail!("buffer_size must be greater than 0");
        }

        if self.relay.buffer_size > MAX_BUFFER_SIZE {
            bail!("buffer_size cannot exceed 1MB");
        }

        if self.relay.idle_timeout.is_some_and(|t| t.is_zero()) {
            bail!("idle_timeout must be greater than 0 when set");
        }

        if self.relay.connect_timeout.is_some_and(|t| t.is_zero()) {
            bail!("connect_timeout must be greater than 0 when set");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        buffer_size: Option<usize>,
        backlog: Option<u32>,
        idle_timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
        log_level: Option<&str>,
    ) {
        if let Some(buffer_size) = buffer_size {
            self.relay.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if let Some(backlog) = backlog {
            self.server.listen_backlog = backlog;
            tracing::info!("CLI override: listen backlog set to {}", backlog);
        }

        if let Some(timeout) = idle_timeout {
            self.relay.idle_timeout = Some(timeout);
            tracing::info!("CLI override: idle timeout set to {:?}", timeout);
        }

        if let Some(timeout) = connect_timeout {
            self.relay.connect_timeout = Some(timeout);
            tracing::info!("CLI override: connect timeout set to {:?}", timeout);
        }

        if let Some(level) = log_level {
            self.monitoring.log_level = level.to_string();
        }
    }
}

impl ForwardTarget {
    /// Interpret `[bind-addr] [bind-serv] connect-addr connect-serv`.
    ///
    /// The last two operands are always the connect side. Operands past the
    /// fourth are ignored with a warning.
    pub fn from_operands<S: AsRef<str>>(operands: &[S]) -> Result<Self> {
        let mut operands = operands;
        if operands.len() > 4 {
            tracing::warn!(
                "Ignoring {} unneeded argument(s)",
                operands.len() - 4
            );
            operands = &operands[..4];
        }

        let owned = |s: &S| s.as_ref().to_string();
        match operands {
            [bind_host, bind_service, connect_host, connect_service] => Ok(Self {
                bind_host: Some(owned(bind_host)),
                bind_service: Some(owned(bind_service)),
                connect_host: owned(connect_host),
                connect_service: owned(connect_service),
            }),
            [bind_service, connect_host, connect_service] => Ok(Self {
                bind_host: None,
                bind_service: Some(owned(bind_service)),
                connect_host: owned(connect_host),
                connect_service: owned(connect_service),
            }),
            [connect_host, connect_service] => Ok(Self {
                bind_host: None,
                bind_service: None,
                connect_host: owned(connect_host),
                connect_service: owned(connect_service),
            }),
            _ => bail!(
                "Not enough arguments: expected [bind-addr] [bind-serv] connect-addr connect-serv"
            ),
        }
    }
}
