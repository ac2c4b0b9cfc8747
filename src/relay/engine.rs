//! Relay Engine
//!
//! Moves bytes between the two endpoints of a session through one bounded
//! buffer per direction. Read interest on an endpoint is only registered
//! while the buffer it fills has room, and write interest only while the
//! buffer feeding it holds data, so a fast sender is throttled to the pace
//! of a slow receiver.

use std::io;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use super::buffer::{Buffer, Progress, TryIo, DEFAULT_CAPACITY};
use super::session::{RelayEnd, RelayReport, RelaySession, Side};
use crate::config::Config;
use crate::Result;

/// Handles data relay between an inbound and an outbound connection
#[derive(Debug, Clone)]
pub struct RelayEngine {
    buffer_size: usize,
    idle_timeout: Option<Duration>,
    oob_inline: bool,
}

/// Readiness interest for an endpoint.
///
/// `outgoing` is the buffer filled by reading the endpoint, `incoming` the
/// buffer drained by writing to it. Error interest is always present so a
/// hang-up is noticed even when both directions are stalled.
pub fn interest_for(outgoing: &Buffer, incoming: &Buffer) -> Interest {
    let mut interest = Interest::ERROR;
    if !outgoing.is_full() {
        interest = interest.add(Interest::READABLE);
    }
    if !incoming.is_empty() {
        interest = interest.add(Interest::WRITABLE);
    }
    interest
}

/// Whether a readiness report means the endpoint can no longer be relayed
pub fn is_exceptional(ready: Ready) -> bool {
    ready.is_error() || ready.is_write_closed()
}

impl RelayEngine {
    /// Create a relay engine with the default buffer size and no idle timeout
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_CAPACITY,
            idle_timeout: None,
            oob_inline: true,
        }
    }

    /// Create a relay engine with a custom per-direction buffer size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ..Self::new()
        }
    }

    /// Create a relay engine from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_size: config.relay.buffer_size,
            idle_timeout: config.relay.idle_timeout,
            oob_inline: config.relay.oob_inline,
        }
    }

    /// End a session once no readiness has been observed for `idle_timeout`
    pub fn idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Relay data bidirectionally until either endpoint closes or fails.
    ///
    /// Both streams are dropped, and therefore closed, before this returns.
    /// An `Err` means the readiness wait itself failed.
    pub async fn relay(
        &self,
        mut session: RelaySession,
        inbound: TcpStream,
        outbound: TcpStream,
    ) -> Result<RelayReport> {
        self.prepare_endpoint(&inbound, session.session_id, Side::Inbound);
        self.prepare_endpoint(&outbound, session.session_id, Side::Outbound);

        debug!(
            "Starting bidirectional data relay for session {}",
            session.session_id
        );

        let mut upstream = Buffer::new(self.buffer_size);
        let mut downstream = Buffer::new(self.buffer_size);

        let end = loop {
            let inbound_interest = interest_for(&upstream, &downstream);
            let outbound_interest = interest_for(&downstream, &upstream);

            let woken = match self
                .wait(&inbound, inbound_interest, &outbound, outbound_interest)
                .await
            {
                Ok(Some(woken)) => woken,
                Ok(None) => break RelayEnd::IdleTimeout,
                Err(e) => {
                    error!("Relay session {} wait failed: {}", session.session_id, e);
                    return Err(e).with_context(|| {
                        format!("Readiness wait failed in session {}", session.session_id)
                    });
                }
            };

            let (side, ready) = woken;
            if is_exceptional(ready) {
                break RelayEnd::Exceptional(side);
            }

            let step = match side {
                Side::Inbound => service(
                    Side::Inbound,
                    ready,
                    &inbound,
                    &outbound,
                    &mut upstream,
                    &mut downstream,
                    &mut session,
                ),
                Side::Outbound => service(
                    Side::Outbound,
                    ready,
                    &outbound,
                    &inbound,
                    &mut downstream,
                    &mut upstream,
                    &mut session,
                ),
            };

            if let Some(end) = step {
                break end;
            }
        };

        // Dropping both streams here closes the two sockets together
        drop(inbound);
        drop(outbound);

        Ok(session.finish(end))
    }

    /// Block until one endpoint is ready, the idle timeout expires (`None`),
    /// or the wait fails.
    async fn wait(
        &self,
        inbound: &TcpStream,
        inbound_interest: Interest,
        outbound: &TcpStream,
        outbound_interest: Interest,
    ) -> io::Result<Option<(Side, Ready)>> {
        let ready = async {
            tokio::select! {
                r = inbound.ready(inbound_interest) => r.map(|ready| (Side::Inbound, ready)),
                r = outbound.ready(outbound_interest) => r.map(|ready| (Side::Outbound, ready)),
            }
        };

        match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, ready).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            },
            None => ready.await.map(Some),
        }
    }

    /// Apply per-socket options before relaying
    fn prepare_endpoint(&self, stream: &TcpStream, session_id: u64, side: Side) {
        if !self.oob_inline {
            return;
        }
        if let Err(e) = socket2::SockRef::from(stream).set_out_of_band_inline(true) {
            warn!(
                "Session {}: failed to set SO_OOBINLINE on {} socket: {}",
                session_id, side, e
            );
        }
    }
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Act on one endpoint's readiness.
///
/// Reads from `endpoint` into `outgoing` and forwards it to `peer` straight
/// away, then flushes `incoming` into `endpoint` if it is writable. On end of
/// stream whatever `endpoint` sent earlier gets one last write to `peer`.
fn service<S: TryIo + ?Sized>(
    side: Side,
    ready: Ready,
    endpoint: &S,
    peer: &S,
    outgoing: &mut Buffer,
    incoming: &mut Buffer,
    session: &mut RelaySession,
) -> Option<RelayEnd> {
    if ready.is_readable() || ready.is_read_closed() {
        match outgoing.try_fill(endpoint) {
            Ok(Progress::Closed) => {
                drain(outgoing, peer, side.peer(), session);
                return Some(RelayEnd::Closed(side));
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Session {} recv on {}: {}", session.session_id, side, e);
                return Some(RelayEnd::IoError(side, e.to_string()));
            }
        }
    }

    if let Some(end) = drain(outgoing, peer, side.peer(), session) {
        return Some(end);
    }

    if ready.is_writable() {
        return drain(incoming, endpoint, side, session);
    }

    None
}

fn drain<S: TryIo + ?Sized>(
    buffer: &mut Buffer,
    sink: &S,
    destination: Side,
    session: &mut RelaySession,
) -> Option<RelayEnd> {
    match buffer.try_drain(sink) {
        Ok(Progress::Moved(n)) => {
            session.record_delivered(destination, n);
            None
        }
        Ok(Progress::Idle) => None,
        Ok(Progress::Closed) => Some(RelayEnd::Closed(destination)),
        Err(e) => {
            warn!(
                "Session {} send on {}: {}",
                session.session_id, destination, e
            );
            Some(RelayEnd::IoError(destination, e.to_string()))
        }
    }
}
