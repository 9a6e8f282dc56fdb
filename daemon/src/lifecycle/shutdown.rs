//! Signal handling for graceful shutdown

use std::fmt;
use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Which signal asked us to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Handles shutdown signals (SIGTERM, SIGINT).
///
/// SIGHUP is registered as well and ignored, so closing the terminal that
/// started the daemon does not kill it.
pub struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl ShutdownSignal {
    /// Register the handlers. Must be called inside the runtime.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for a shutdown signal
    pub async fn wait(&mut self) -> ShutdownReason {
        loop {
            tokio::select! {
                _ = self.sigterm.recv() => {
                    debug!("received SIGTERM");
                    return ShutdownReason::Terminate;
                }
                _ = self.sigint.recv() => {
                    debug!("received SIGINT");
                    return ShutdownReason::Interrupt;
                }
                _ = self.sighup.recv() => {
                    debug!("received SIGHUP, ignoring");
                }
            }
        }
    }
}
