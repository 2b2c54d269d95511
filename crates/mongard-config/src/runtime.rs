//! Derives runtime artefact paths shared by the CLI and the supervisor.
//!
//! The runtime directory houses the supervisor lock and pid files, the
//! handle record published when the managed server reaches readiness, and
//! the port file that carries the effective port to dependent steps. Both
//! binaries need to agree on this layout so lifecycle commands can interact
//! with files written by the supervisor.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::defaults::default_runtime_directory;

/// Canonical paths for runtime artefacts written by the supervisor.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    handle_path: PathBuf,
    port_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths under the given directory, creating it.
    pub fn prepare(runtime_dir: Option<&Path>) -> Result<Self, RuntimePathsError> {
        let runtime_dir = runtime_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(default_runtime_directory);
        fs::create_dir_all(&runtime_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        Ok(Self::from_dir(runtime_dir))
    }

    /// Derives runtime paths without touching the filesystem.
    ///
    /// Used by read-only consumers (status reporting) that must not create
    /// the directory as a side effect.
    #[must_use]
    pub fn readonly(runtime_dir: Option<&Path>) -> Self {
        let runtime_dir = runtime_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(default_runtime_directory);
        Self::from_dir(runtime_dir)
    }

    fn from_dir(runtime_dir: PathBuf) -> Self {
        Self {
            lock_path: runtime_dir.join("mongardd.lock"),
            pid_path: runtime_dir.join("mongardd.pid"),
            handle_path: runtime_dir.join("mongardd.handle"),
            port_path: runtime_dir.join("mongard.port"),
            runtime_dir,
        }
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the lock file guarding singleton startup.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the supervisor PID file.
    #[must_use]
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the handle record published at readiness.
    #[must_use]
    pub fn handle_path(&self) -> &Path {
        self.handle_path.as_path()
    }

    /// Path to the file publishing the effective server port.
    #[must_use]
    pub fn port_path(&self) -> &Path {
        self.port_path.as_path()
    }
}

/// Errors raised while deriving runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
