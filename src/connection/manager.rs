//! Connection Manager Implementation
//!
//! Accept loop: waits on every listener, hands each accepted connection to
//! its own session task and goes straight back to accepting.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use super::listener::Listeners;
use crate::config::Config;
use crate::relay::SessionLauncher;
use crate::Result;

/// Accepts connections and runs one isolated session task per connection
pub struct ConnectionManager {
    listeners: Listeners,
    launcher: SessionLauncher,
    config: Arc<Config>,
    active_sessions: Arc<AtomicUsize>,
    next_session_id: AtomicU64,
    shutdown_flag: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

/// Releases a session's slot in the active count when its task ends,
/// including by panic
struct SessionGuard {
    id: u64,
    active_sessions: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let remaining = self
            .active_sessions
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        debug!("Session {} released, {} still active", self.id, remaining);
    }
}

impl ConnectionManager {
    /// Bind the listeners and prepare to forward to `connect_candidates`
    pub fn bind(
        config: Arc<Config>,
        bind_candidates: &[SocketAddr],
        connect_candidates: Arc<[SocketAddr]>,
    ) -> Result<Self> {
        let listeners = Listeners::bind(bind_candidates, config.server.listen_backlog)?;
        let launcher = SessionLauncher::from_config(connect_candidates, &config);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listeners,
            launcher,
            config,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            next_session_id: AtomicU64::new(1),
            shutdown_flag: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Addresses the listeners are bound to
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.local_addrs()
    }

    /// Main connection acceptance loop.
    ///
    /// Returns once shutdown has been requested and in-flight sessions have
    /// finished or the shutdown timeout has passed.
    pub async fn run(&self) -> Result<()> {
        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accepted = accept_on(self.listeners.v4.as_ref()) => self.dispatch(accepted),
                accepted = accept_on(self.listeners.v6.as_ref()) => self.dispatch(accepted),
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        self.wait_for_sessions_to_close().await;
        Ok(())
    }

    /// Hand an accepted connection to a new session task
    fn dispatch(&self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting connection: {}", e);
                return;
            }
        };

        info!("accepted {} {}", peer.ip(), peer.port());

        if self.shutdown_flag.load(Ordering::Relaxed) {
            debug!("Rejecting connection from {} due to shutdown", peer);
            return;
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);

        let guard = SessionGuard {
            id: session_id,
            active_sessions: Arc::clone(&self.active_sessions),
        };
        let launcher = self.launcher.clone();

        tokio::spawn(async move {
            let _guard = guard;

            let outcome = launcher.launch(session_id, stream, peer).await;
            if outcome.is_success() {
                info!("Session {} {}", session_id, outcome);
            } else {
                warn!("Session {} {}", session_id, outcome);
            }
        });

        info!("Spawned session {} for {}", session_id, peer);
    }

    /// Get the number of sessions still running
    pub fn get_active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Get connection statistics
    pub fn get_connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            active_sessions: self.get_active_sessions(),
            total_sessions_started: self
                .next_session_id
                .load(Ordering::Relaxed)
                .saturating_sub(1),
        }
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No accept loop listening for shutdown: {}", e);
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait for running sessions to finish, up to the shutdown timeout
    pub async fn wait_for_sessions_to_close(&self) {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        if self.get_active_sessions() > 0 {
            info!(
                "Waiting for {} active sessions to close (timeout: {:?})",
                self.get_active_sessions(),
                shutdown_timeout
            );
        }

        while self.get_active_sessions() > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.get_active_sessions();
        if remaining == 0 {
            info!("All sessions closed in {:?}", start_time.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                start_time.elapsed(),
                remaining
            );
        }
    }
}

async fn accept_on(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub active_sessions: usize,
    pub total_sessions_started: u64,
}
