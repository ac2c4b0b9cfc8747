//! Listener Setup
//!
//! Builds at most one IPv4 and one IPv6 listening socket from the bind
//! candidates.

use std::net::SocketAddr;

use anyhow::{anyhow, bail};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::Result;

/// The listening sockets of one forwarder, one per address family
#[derive(Debug, Default)]
pub struct Listeners {
    pub v4: Option<TcpListener>,
    pub v6: Option<TcpListener>,
}

impl Listeners {
    /// Bind the first usable candidate of each address family.
    ///
    /// Failures on individual candidates are logged and the next one is
    /// tried. Fails only if no listener at all could be set up. Must run
    /// inside a tokio runtime.
    pub fn bind(candidates: &[SocketAddr], backlog: u32) -> Result<Self> {
        let mut listeners = Listeners::default();

        for &addr in candidates {
            let slot = if addr.is_ipv4() {
                &mut listeners.v4
            } else {
                &mut listeners.v6
            };

            // One listener per family is enough
            if slot.is_some() {
                continue;
            }

            match bind_one(addr, backlog) {
                Ok(listener) => *slot = Some(listener),
                Err(e) => warn!("{:#}", e),
            }
        }

        if listeners.is_empty() {
            bail!("Could not bind a listener on any of {:?}", candidates);
        }

        Ok(listeners)
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }

    /// Addresses actually bound, IPv4 first
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        [self.v4.as_ref(), self.v6.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|listener| listener.local_addr().ok())
            .collect()
    }
}

fn bind_one(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| anyhow!("Failed to create socket for {}: {}", addr, e))?;

    if let Err(e) = socket.set_reuse_address(true) {
        warn!("Failed to set SO_REUSEADDR on {}: {}", addr, e);
    }

    // Keep the IPv6 wildcard from claiming the IPv4 port as well
    if addr.is_ipv6() {
        if let Err(e) = socket.set_only_v6(true) {
            warn!("Failed to set IPV6_V6ONLY on {}: {}", addr, e);
        }
    }

    socket
        .bind(&addr.into())
        .map_err(|e| anyhow!("Failed to bind to {}: {}", addr, e))?;

    match socket.local_addr().map(|a| a.as_socket()) {
        Ok(Some(bound)) => info!("bound to {} {}", bound.ip(), bound.port()),
        Ok(None) => warn!("Bound socket for {} has no inet address", addr),
        Err(e) => warn!("getsockname for {}: {}", addr, e),
    }

    let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
    socket
        .listen(backlog)
        .map_err(|e| anyhow!("Failed to listen on {}: {}", addr, e))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| anyhow!("Failed to set socket as non-blocking: {}", e))?;

    TcpListener::from_std(socket.into())
        .map_err(|e| anyhow!("Failed to convert socket to TcpListener: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_listener_per_family() {
        let candidates: Vec<SocketAddr> =
            vec!["127.0.0.1:0".parse().unwrap(), "127.0.0.1:0".parse().unwrap()];

        let listeners = Listeners::bind(&candidates, 0).unwrap();
        assert!(listeners.v4.is_some());
        assert!(listeners.v6.is_none());
        assert_eq!(listeners.local_addrs().len(), 1);
        assert_ne!(listeners.local_addrs()[0].port(), 0);
    }

    #[tokio::test]
    async fn test_bad_candidate_falls_through() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken_addr = taken.local_addr().unwrap();

        // SO_REUSEADDR does not allow a second listener on a bound port
        let candidates = vec![taken_addr, "127.0.0.1:0".parse().unwrap()];
        let listeners = Listeners::bind(&candidates, 0).unwrap();
        assert_ne!(listeners.local_addrs()[0], taken_addr);
    }

    #[tokio::test]
    async fn test_no_candidate_bindable() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let result = Listeners::bind(&[taken.local_addr().unwrap()], 0);
        assert!(result.is_err());
        assert!(Listeners::bind(&[], 0).is_err());
    }
}
