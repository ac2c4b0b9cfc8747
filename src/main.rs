//! tcpfwd - TCP port forwarder
//!
//! Listens locally and relays every accepted connection to a fixed remote
//! address, one isolated session per connection.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcpfwd::{
    config::{Config, ConfigManager},
    resolve, ConnectionManager, ForwardTarget, ShutdownSignals,
};

/// CLI arguments for tcpfwd
#[derive(Parser, Debug)]
#[command(name = "tcpfwd")]
#[command(about = "Forward TCP connections from a local port to a remote address")]
#[command(version)]
#[command(long_about = "
Forward TCP connections from a local port to a remote address.

Operands: [bind-addr] [bind-serv] connect-addr connect-serv

The last two operands name the forward target. With three operands the
first is the local service (port) to listen on; with four, the local
address and service. Without a bind address both the IPv4 and IPv6
wildcard addresses are used; without a bind service the system picks a
port, reported in the log.

Configuration priority (highest to lowest):
1. Command-line options
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  TCPFWD_BUFFER_SIZE       - Per-direction relay buffer in bytes
  TCPFWD_LISTEN_BACKLOG    - listen(2) backlog
  TCPFWD_IDLE_TIMEOUT      - Close sessions idle this long (e.g., 10m)
  TCPFWD_CONNECT_TIMEOUT   - Limit for each outbound connect attempt
  TCPFWD_SHUTDOWN_TIMEOUT  - How long to wait for sessions on shutdown
  TCPFWD_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// [bind-addr] [bind-serv] connect-addr connect-serv
    #[arg(value_name = "ARGS")]
    pub operands: Vec<String>,

    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "tcpfwd.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Buffer size in bytes
    #[arg(long, help = "Per-direction relay buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// listen(2) backlog
    #[arg(long, help = "Listen backlog (0 = system minimum)")]
    pub backlog: Option<u32>,

    /// Idle timeout for sessions
    #[arg(long, value_parser = humantime::parse_duration, help = "Close sessions idle this long (e.g., 10m)")]
    pub idle_timeout: Option<Duration>,

    /// Timeout for each outbound connect attempt
    #[arg(long, value_parser = humantime::parse_duration, help = "Limit for each outbound connect attempt (e.g., 5s)")]
    pub connect_timeout: Option<Duration>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.buffer_size,
        args.backlog,
        args.idle_timeout,
        args.connect_timeout,
        args.log_level.as_deref(),
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&args, &config);

    info!("main pid: {}", std::process::id());

    let Some(target) = forward_target(&args)? else {
        info!("Configuration is valid");
        log_config(&config);
        return Ok(());
    };

    log_summary(&config, &target);

    let connect_candidates = resolve::resolve_connect(&target.connect_host, &target.connect_service)
        .await
        .context("Failed to resolve forward target")?;

    let bind_candidates =
        resolve::resolve_bind(target.bind_host.as_deref(), target.bind_service.as_deref())
            .await
            .context("Failed to resolve bind address")?;

    let manager = Arc::new(ConnectionManager::bind(
        Arc::new(config),
        &bind_candidates,
        connect_candidates.into(),
    )?);

    let mut runner = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run().await })
    };

    let result = match ShutdownSignals::register() {
        Ok(mut signals) => tokio::select! {
            result = &mut runner => result,
            _ = signals.recv() => {
                manager.initiate_shutdown();
                runner.await
            }
        },
        Err(e) => {
            // Forwarding continues without signal-driven shutdown
            error!("Error setting up signal handlers: {:#}", e);
            runner.await
        }
    };

    match result.context("Accept loop task failed")? {
        Ok(()) => {
            info!("Accept loop finished, shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Accept loop failed: {:#}", e);
            Err(e)
        }
    }
}

/// Operands to forward with, or `None` when only validating configuration
fn forward_target(args: &CliArgs) -> Result<Option<ForwardTarget>> {
    if args.validate_config {
        return Ok(None);
    }
    ForwardTarget::from_operands(args.operands.as_slice()).map(Some)
}

fn log_summary(config: &Config, target: &ForwardTarget) {
    info!(
        "Forwarding {}:{} -> {}:{}",
        target.bind_host.as_deref().unwrap_or("*"),
        target.bind_service.as_deref().unwrap_or("*"),
        target.connect_host,
        target.connect_service
    );
    log_config(config);
}

fn log_config(config: &Config) {
    info!("  Buffer size: {} bytes", config.relay.buffer_size);
    info!("  Listen backlog: {}", config.server.listen_backlog);
    info!("  Idle timeout: {:?}", config.relay.idle_timeout);
    info!("  Connect timeout: {:?}", config.relay.connect_timeout);
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .init();
}
