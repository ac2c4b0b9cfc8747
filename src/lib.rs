//! tcpfwd Library
//!
//! Protocol-agnostic TCP port forwarder. Every accepted connection is paired
//! with a fresh connection to the forward target and relayed through two
//! fixed-size buffers until either side closes.

pub mod config;
pub mod connection;
pub mod relay;
pub mod resolve;
pub mod shutdown;

pub use config::{Config, ForwardTarget};
pub use connection::ConnectionManager;
pub use relay::{RelayEngine, SessionLauncher, SessionOutcome};
pub use shutdown::ShutdownSignals;

/// Common error type for the forwarder
pub type Result<T> = anyhow::Result<T>;
