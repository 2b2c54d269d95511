//! Defines the unified error surface for supervisor launch and shutdown.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use nix::errno::Errno;
use thiserror::Error;

use ortho_config::OrthoError;

use mongard_config::{ConfigError, HandleRecordError, RuntimePathsError};

use crate::engine::EngineError;
use crate::net::NetError;

use super::daemonizer::DaemonizeError;
use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the managed server.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// A configuration value was unusable.
    #[error("invalid configuration: {source}")]
    InvalidConfig {
        /// Underlying validation error.
        #[source]
        source: ConfigError,
    },
    /// The runtime directory could not be created.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Lock file creation failed.
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A running supervisor already holds the lock.
    #[error("supervisor already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing PID file.
        pid: u32,
    },
    /// Removing a stale runtime artefact failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// Path of the artefact that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the handle record failed.
    #[error("failed to write handle record '{path}': {source}")]
    HandleWrite {
        /// Handle record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serialising or stamping the handle record failed.
    #[error(transparent)]
    Handle(#[from] HandleRecordError),
    /// Serialising the handle record failed.
    #[error("failed to serialise handle record: {source}")]
    HandleSerialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Reading the published port file failed.
    #[error("failed to read port file '{path}': {source}")]
    PortRead {
        /// Port file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The published port file held something other than a port.
    #[error("port file '{path}' does not contain a port: '{content}'")]
    PortParse {
        /// Port file path.
        path: PathBuf,
        /// Offending file content.
        content: String,
    },
    /// Writing the port file failed.
    #[error("failed to publish port to '{path}': {source}")]
    PortWrite {
        /// Port file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Attempting to probe an existing PID failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// PID that failed to probe.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
    /// Handle updates were attempted before writing the PID file.
    #[error("pid must be written before updating the handle record")]
    MissingPid,
    /// Daemonisation failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Installing the shutdown flag failed.
    #[error("failed to install shutdown handling: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// Resolving, launching, or stopping the server failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Allocating the effective port failed.
    #[error(transparent)]
    Net(#[from] NetError),
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<ConfigError> for LaunchError {
    fn from(source: ConfigError) -> Self {
        Self::InvalidConfig { source }
    }
}

impl From<RuntimePathsError> for LaunchError {
    fn from(source: RuntimePathsError) -> Self {
        match source {
            RuntimePathsError::RuntimeDirectory { path, source } => {
                Self::RuntimeDirectory { path, source }
            }
        }
    }
}

impl From<DaemonizeError> for LaunchError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
