//! Relay Session

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Which endpoint of a session an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The accepted client connection
    Inbound,
    /// The connection opened to the forward target
    Outbound,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::Inbound => Side::Outbound,
            Side::Outbound => Side::Inbound,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Inbound => f.write_str("inbound"),
            Side::Outbound => f.write_str("outbound"),
        }
    }
}

/// Why a relay loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// End of stream was read from this side
    Closed(Side),
    /// This side reported an error or hang-up condition
    Exceptional(Side),
    /// A read or write on this side failed
    IoError(Side, String),
    /// No readiness was observed within the configured idle timeout
    IdleTimeout,
}

impl fmt::Display for RelayEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEnd::Closed(side) => write!(f, "{} closed", side),
            RelayEnd::Exceptional(side) => write!(f, "{} hung up or errored", side),
            RelayEnd::IoError(side, e) => write!(f, "{} I/O error: {}", side, e),
            RelayEnd::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// Diagnostic record of one forwarded connection
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: u64,
    pub inbound_addr: SocketAddr,
    pub outbound_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: u64,
    bytes_down: u64,
}

/// Summary returned once a relay loop has finished
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub session_id: u64,
    pub inbound_addr: SocketAddr,
    pub outbound_addr: SocketAddr,
    pub duration: Duration,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub end: RelayEnd,
}

impl RelaySession {
    /// Create a new relay session
    pub fn new(session_id: u64, inbound_addr: SocketAddr, outbound_addr: SocketAddr) -> Self {
        debug!(
            "Creating relay session {} ({} -> {})",
            session_id, inbound_addr, outbound_addr
        );

        Self {
            session_id,
            inbound_addr,
            outbound_addr,
            start_time: Instant::now(),
            bytes_up: 0,
            bytes_down: 0,
        }
    }

    /// Bytes relayed from the inbound to the outbound endpoint
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up
    }

    /// Bytes relayed from the outbound to the inbound endpoint
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Count bytes written towards `destination`
    pub fn record_delivered(&mut self, destination: Side, bytes: usize) {
        match destination {
            Side::Outbound => self.bytes_up += bytes as u64,
            Side::Inbound => self.bytes_down += bytes as u64,
        }
    }

    /// Close out the session into a report
    pub fn finish(self, end: RelayEnd) -> RelayReport {
        let report = RelayReport {
            session_id: self.session_id,
            inbound_addr: self.inbound_addr,
            outbound_addr: self.outbound_addr,
            duration: self.duration(),
            bytes_up: self.bytes_up,
            bytes_down: self.bytes_down,
            end,
        };
        report.log();
        report
    }
}

impl RelayReport {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }

    /// Log session statistics
    pub fn log(&self) {
        info!(
            session_id = self.session_id,
            inbound_addr = %self.inbound_addr,
            outbound_addr = %self.outbound_addr,
            duration_ms = self.duration.as_millis() as u64,
            bytes_up = self.bytes_up,
            bytes_down = self.bytes_down,
            total_bytes = self.total_bytes(),
            end = %self.end,
            "Relay session completed"
        );
    }
}
