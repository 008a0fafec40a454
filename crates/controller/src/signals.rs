//! OS signal handling for reload and shutdown.
//!
//! SIGHUP requests a configuration reload; SIGTERM and SIGINT request a
//! graceful shutdown.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// What a received signal asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Reload configuration (SIGHUP)
    Reload,
    /// Graceful shutdown (SIGTERM/SIGINT)
    Shutdown,
}

/// Listens for process signals
pub struct SignalManager {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl SignalManager {
    /// Install the signal handlers
    pub fn new() -> std::io::Result<Self> {
        debug!("Installing signal handlers");
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next signal
    pub async fn recv(&mut self) -> SignalType {
        let signal = tokio::select! {
            _ = self.hangup.recv() => SignalType::Reload,
            _ = self.terminate.recv() => SignalType::Shutdown,
            _ = self.interrupt.recv() => SignalType::Shutdown,
        };
        debug!(signal = ?signal, "Received signal");
        signal
    }
}

impl std::fmt::Debug for SignalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalManager").finish()
    }
}
