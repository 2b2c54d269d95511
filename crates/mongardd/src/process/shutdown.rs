//! Signal-driven shutdown flag for the supervision loop.
//!
//! The supervisor never blocks on a signal: it polls a shared flag at
//! each supervision wake-up so a termination request interrupts the
//! liveness loop promptly and the managed server is still stopped
//! through the ordinary graceful path.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use thiserror::Error;

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Installs the notification source and returns the flag to poll.
    fn install(&self) -> Result<ShutdownFlag, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Cooperative cancellation flag raised when shutdown should proceed.
#[derive(Debug, Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Builds an unraised flag together with its trigger handle.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn manual() -> (Self, Arc<AtomicBool>) {
        let inner = Arc::new(AtomicBool::new(false));
        (Self(Arc::clone(&inner)), inner)
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shutdown source backed by POSIX termination signals.
#[derive(Debug, Default, Clone)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds a listener for the conventional termination signals.
    pub fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn install(&self) -> Result<ShutdownFlag, ShutdownError> {
        let flag = Arc::new(AtomicBool::new(false));
        for signal in [SIGTERM, SIGINT, SIGQUIT, SIGHUP] {
            signal_hook::flag::register(signal, Arc::clone(&flag))
                .map_err(|source| ShutdownError::Install { source })?;
        }
        Ok(ShutdownFlag(flag))
    }
}
