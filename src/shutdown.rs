//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM, SIGINT or Ctrl+C. The accept loop is stopped by the
//! caller through `ConnectionManager::initiate_shutdown`.

use tokio::signal;
use tracing::info;

use crate::Result;

/// Termination signals registered with the runtime
pub struct ShutdownSignals {
    #[cfg(unix)]
    sigterm: signal::unix::Signal,
    #[cfg(unix)]
    sigint: signal::unix::Signal,
}

impl ShutdownSignals {
    /// Install the signal handlers. Must run inside a tokio runtime.
    pub fn register() -> Result<Self> {
        #[cfg(unix)]
        {
            use anyhow::Context;
            use signal::unix::SignalKind;

            Ok(Self {
                sigterm: signal::unix::signal(SignalKind::terminate())
                    .context("Failed to register SIGTERM handler")?,
                sigint: signal::unix::signal(SignalKind::interrupt())
                    .context("Failed to register SIGINT handler")?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next termination signal
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = self.sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
                Err(e) => {
                    tracing::error!("Error waiting for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_is_received() {
        let mut signals = ShutdownSignals::register().unwrap();

        let status = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("SIGTERM should be delivered");
    }
}
