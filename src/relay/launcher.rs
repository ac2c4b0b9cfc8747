//! Session Launcher
//!
//! Connects an accepted client to the first reachable forward candidate and
//! runs the relay engine over the pair.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::engine::RelayEngine;
use super::session::{RelayReport, RelaySession};
use crate::config::Config;

/// Terminal state of one forwarded connection
#[derive(Debug)]
pub enum SessionOutcome {
    /// The relay loop ran and ended normally
    Completed(RelayReport),
    /// The relay loop's readiness wait failed
    Failed(anyhow::Error),
    /// None of the forward candidates accepted a connection
    NoConnectablePeer,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Completed(_))
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Completed(report) => write!(
                f,
                "completed ({}; {} bytes up, {} bytes down)",
                report.end, report.bytes_up, report.bytes_down
            ),
            SessionOutcome::Failed(e) => write!(f, "failed: {:#}", e),
            SessionOutcome::NoConnectablePeer => f.write_str("no connectable peer"),
        }
    }
}

/// Opens the outbound side of a session and hands both ends to the relay
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    candidates: Arc<[SocketAddr]>,
    connect_timeout: Option<Duration>,
    engine: RelayEngine,
}

impl SessionLauncher {
    /// Create a launcher over an ordered list of forward candidates
    pub fn new(candidates: Arc<[SocketAddr]>, engine: RelayEngine) -> Self {
        Self {
            candidates,
            connect_timeout: None,
            engine,
        }
    }

    /// Create a launcher from configuration
    pub fn from_config(candidates: Arc<[SocketAddr]>, config: &Config) -> Self {
        Self {
            candidates,
            connect_timeout: config.relay.connect_timeout,
            engine: RelayEngine::from_config(config),
        }
    }

    /// Bound every individual connect attempt
    pub fn connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Forward one accepted connection until its relay ends
    pub async fn launch(
        &self,
        session_id: u64,
        inbound: TcpStream,
        inbound_addr: SocketAddr,
    ) -> SessionOutcome {
        let Some((outbound, outbound_addr)) = self.connect_first().await else {
            warn!("Session {}: no connectable peer", session_id);
            return SessionOutcome::NoConnectablePeer;
        };

        info!(
            "Session {} connected {} -> {}",
            session_id, inbound_addr, outbound_addr
        );

        let session = RelaySession::new(session_id, inbound_addr, outbound_addr);
        match self.engine.relay(session, inbound, outbound).await {
            Ok(report) => SessionOutcome::Completed(report),
            Err(e) => SessionOutcome::Failed(e),
        }
    }

    /// Try each candidate in order and return the first established stream.
    ///
    /// Failed attempts are expected while walking the list, so they are only
    /// visible at debug level.
    pub async fn connect_first(&self) -> Option<(TcpStream, SocketAddr)> {
        for &addr in self.candidates.iter() {
            let attempt = TcpStream::connect(addr);
            let result = match self.connect_timeout {
                Some(limit) => match timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!("Connect to {} timed out after {:?}", addr, limit);
                        continue;
                    }
                },
                None => attempt.await,
            };

            match result {
                Ok(stream) => return Some((stream, addr)),
                Err(e) => debug!("Connect to {} failed: {}", addr, e),
            }
        }

        None
    }
}
