//! Supervisor shutdown signalling and verification.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use mongard_config::RuntimePaths;
use mongardd::net::socket_is_reachable;

use super::error::LifecycleError;
use super::monitoring::read_pid;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long `server stop` waits for the supervisor to remove its runtime
/// artefacts and for the server port to stop accepting connections.
pub(super) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends SIGTERM to the supervisor process.
#[cfg(unix)]
pub(super) fn signal_supervisor(pid: u32) -> Result<(), LifecycleError> {
    let raw = i32::try_from(pid).map_err(|_| LifecycleError::SignalFailed {
        pid,
        source: io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"),
    })?;
    // SAFETY: sends SIGTERM to a single positive pid; no memory is touched.
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result == 0 {
        Ok(())
    } else {
        Err(LifecycleError::SignalFailed {
            pid,
            source: io::Error::last_os_error(),
        })
    }
}

#[cfg(not(unix))]
pub(super) fn signal_supervisor(_pid: u32) -> Result<(), LifecycleError> {
    Err(LifecycleError::UnsupportedPlatform)
}

/// Waits for the supervisor to finish shutting down.
///
/// Shutdown is complete once the pid file is gone and the server port no
/// longer accepts connections. The port probe keeps the step from
/// reporting success while the server is still draining connections.
pub(super) fn wait_for_shutdown(
    paths: &RuntimePaths,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(), LifecycleError> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let pid_gone = read_pid(paths.pid_path())?.is_none();
        if pid_gone && !socket_is_reachable(host, port)? {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }
    Err(LifecycleError::ShutdownTimeout {
        pid_path: paths.pid_path().to_path_buf(),
        timeout_ms: timeout.as_millis() as u64,
    })
}
