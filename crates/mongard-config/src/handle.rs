//! The on-disk handle record for a supervised server.
//!
//! Replaces an in-memory registry slot: build steps run as separate OS
//! processes, so the live-handle equivalent is a small JSON record in the
//! runtime directory holding the supervisor pid, the managed process pid,
//! and the resolved network address. The supervisor writes it (`starting`
//! before launch, `ready` at publication, `stopping` on the way down) and
//! removes it on exit; consumers treat a missing record as "not running".

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operational state recorded in the handle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleStatus {
    /// Supervisor is up but the managed server is not yet listening.
    Starting,
    /// Managed server verified listening; the handle is live.
    Ready,
    /// Graceful shutdown is underway.
    Stopping,
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => formatter.write_str("starting"),
            Self::Ready => formatter.write_str("ready"),
            Self::Stopping => formatter.write_str("stopping"),
        }
    }
}

/// Snapshot of a supervised server published in the runtime directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRecord {
    /// Current lifecycle state.
    pub status: HandleStatus,
    /// Process ID of the supervisor that owns the managed server.
    pub supervisor_pid: u32,
    /// Process ID of the managed server, once launched.
    pub server_pid: Option<u32>,
    /// Address the managed server is bound to.
    pub host: String,
    /// Effective listening port.
    pub port: u16,
    /// Unix timestamp (seconds) when the record was written.
    pub timestamp: u64,
}

impl HandleRecord {
    /// Builds a record stamped with the current time.
    pub fn new(
        status: HandleStatus,
        supervisor_pid: u32,
        server_pid: Option<u32>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self, HandleRecordError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| HandleRecordError::Clock)?
            .as_secs();
        Ok(Self {
            status,
            supervisor_pid,
            server_pid,
            host: host.into(),
            port,
            timestamp,
        })
    }

    /// Reads a record from disk; `Ok(None)` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>, HandleRecordError> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|source| {
                HandleRecordError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(HandleRecordError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Errors raised while reading or stamping handle records.
#[derive(Debug, Error)]
pub enum HandleRecordError {
    #[error("system clock is before the Unix epoch")]
    Clock,
    #[error("failed to read handle record {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse handle record {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_record_reads_as_none() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("mongardd.handle");
        assert_eq!(HandleRecord::read(&path).unwrap(), None);
    }

    #[test]
    fn record_round_trips_through_json() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("mongardd.handle");
        let record =
            HandleRecord::new(HandleStatus::Ready, 41, Some(42), "127.0.0.1", 27017).unwrap();
        fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(HandleRecord::read(&path).unwrap(), Some(record));
    }

    #[test]
    fn malformed_record_is_a_parse_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("mongardd.handle");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            HandleRecord::read(&path),
            Err(HandleRecordError::Parse { .. })
        ));
    }
}
