//! Error types for supervisor lifecycle operations.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use mongard_config::{HandleRecordError, RuntimePathsError};
use mongardd::net::NetError;

/// Errors raised while executing lifecycle commands.
#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error("failed to spawn mongardd binary '{binary:?}': {source}")]
    LaunchSupervisor {
        binary: OsString,
        #[source]
        source: io::Error,
    },
    #[error("supervisor exited before the server became ready (status: {exit_status:?})")]
    StartupFailed { exit_status: Option<i32> },
    #[error("supervisor reported 'stopping' before reaching ready; check {path:?}")]
    StartupAborted { path: PathBuf },
    #[error("timed out waiting for a ready handle record in {timeout_ms} ms at {handle_path:?}")]
    StartupTimeout {
        handle_path: PathBuf,
        timeout_ms: u64,
    },
    #[error("failed to monitor supervisor launch: {source}")]
    MonitorChild {
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Handle(#[from] HandleRecordError),
    #[error("failed to read pid file {path:?}: {source}")]
    ReadPid {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse pid file {path:?}: {source}")]
    ParsePid {
        path: PathBuf,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("server is not running; run 'mongard server start' first")]
    NotRunning,
    #[error("supervisor already running with pid {pid}; run 'mongard server stop' first")]
    AlreadyRunning { pid: u32 },
    #[error("failed to signal supervisor pid {pid}: {source}")]
    SignalFailed {
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error("supervisor shutdown did not complete within {timeout_ms} ms; check {pid_path:?}")]
    ShutdownTimeout { pid_path: PathBuf, timeout_ms: u64 },
    #[error("failed to probe supervisor process {pid}: {source}")]
    ProbeProcess {
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Probe(#[from] NetError),
    #[error(transparent)]
    Paths(#[from] RuntimePathsError),
    #[error("failed to write lifecycle output: {0}")]
    Io(#[source] io::Error),
    #[cfg(not(unix))]
    #[error("platform does not support supervisor lifecycle signalling")]
    UnsupportedPlatform,
}
