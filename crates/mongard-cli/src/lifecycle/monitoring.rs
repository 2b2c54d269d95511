//! Supervisor readiness monitoring.
//!
//! Provides helpers for reading and evaluating handle records, waiting for
//! the supervisor to publish a ready record, and reading PID files.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use mongard_config::{HandleRecord, HandleStatus, RuntimePaths};

use super::error::LifecycleError;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long `server start` waits for the supervisor to publish a ready
/// record. Covers the supervisor's own server readiness wait plus slack
/// for daemonisation and distribution resolution.
pub(super) const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Waits for the supervisor to publish a ready handle record.
///
/// Monitors the handle record and the spawned process, returning the
/// record once the supervisor reports ready.
///
/// # Errors
///
/// - `StartupFailed` when the supervisor exits with a non-zero status,
///   which is how launch failures (unusable configuration, missing server
///   binary, a server that dies before listening) surface to the step.
/// - `StartupAborted` when a fresh record reports `stopping`.
/// - `StartupTimeout` when the deadline passes without a ready record.
///
/// # Daemonisation handling
///
/// If the spawned process exits cleanly (status 0), the supervisor has
/// forked to a new PID. The PID check is then skipped and only the record
/// timestamp distinguishes fresh records from stale ones.
pub(super) fn wait_for_ready(
    paths: &RuntimePaths,
    child: &mut Child,
    started_at: SystemTime,
    timeout: Duration,
) -> Result<HandleRecord, LifecycleError> {
    let deadline = Instant::now() + timeout;
    let expected_pid = child.id();
    let mut daemonized = false;
    while Instant::now() < deadline {
        // Check child status first so daemonisation is detected before the
        // record's pid is compared.
        if let Some(status) = child
            .try_wait()
            .map_err(|source| LifecycleError::MonitorChild { source })?
        {
            if !status.success() {
                return Err(LifecycleError::StartupFailed {
                    exit_status: status.code(),
                });
            }
            daemonized = true;
        }
        if let Some(record) = HandleRecord::read(paths.handle_path())? {
            let pid_ok = daemonized || record.supervisor_pid == expected_pid;
            if pid_ok && record_is_recent(&record, started_at) {
                match record.status {
                    HandleStatus::Ready => return Ok(record),
                    HandleStatus::Stopping => {
                        return Err(LifecycleError::StartupAborted {
                            path: paths.handle_path().to_path_buf(),
                        });
                    }
                    HandleStatus::Starting => {}
                }
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    Err(LifecycleError::StartupTimeout {
        handle_path: paths.handle_path().to_path_buf(),
        timeout_ms: timeout.as_millis() as u64,
    })
}

/// Blocks until the supervisor's pid file disappears.
///
/// Backs the `wait` parameter: the start step only returns once the
/// supervised server has stopped again.
pub(super) fn wait_for_exit(paths: &RuntimePaths) -> Result<(), LifecycleError> {
    loop {
        match read_pid(paths.pid_path())? {
            Some(_) => thread::sleep(Duration::from_millis(500)),
            None => return Ok(()),
        }
    }
}

pub(super) fn read_pid(path: &Path) -> Result<Option<u32>, LifecycleError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<u32>()
                .map(Some)
                .map_err(|source| LifecycleError::ParsePid {
                    path: path.to_path_buf(),
                    source,
                })
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LifecycleError::ReadPid {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn record_is_recent(record: &HandleRecord, started_at: SystemTime) -> bool {
    match UNIX_EPOCH.checked_add(Duration::from_secs(record.timestamp)) {
        // `record.timestamp` has second precision; truncate `started_at` to
        // seconds so a record written in the starting second is not treated
        // as stale.
        Some(record_time) => {
            let started_secs = started_at
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0);
            record_time >= UNIX_EPOCH + Duration::from_secs(started_secs)
        }
        None => false,
    }
}

/// Probes whether a process with the given pid is alive.
pub(super) fn process_alive(pid: u32) -> Result<bool, LifecycleError> {
    #[cfg(unix)]
    {
        // Zero and out-of-range values can never name a live process; the
        // cast guard also keeps negative pids out of kill(2), where they
        // address process groups.
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return Ok(false);
        };
        if raw == 0 {
            return Ok(false);
        }
        // SAFETY: signal 0 performs only an existence and permission check.
        let result = unsafe { libc::kill(raw, 0) };
        if result == 0 {
            return Ok(true);
        }
        let error = io::Error::last_os_error();
        match error.raw_os_error() {
            Some(code) if code == libc::EPERM => Ok(true),
            Some(code) if code == libc::ESRCH => Ok(false),
            _ => Err(LifecycleError::ProbeProcess { pid, source: error }),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(LifecycleError::UnsupportedPlatform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_paths() -> (TempDir, RuntimePaths) {
        let dir = TempDir::new().expect("temp dir");
        let paths = RuntimePaths::prepare(Some(dir.path())).expect("paths");
        (dir, paths)
    }

    #[test]
    fn read_pid_handles_missing_file() {
        let (_dir, paths) = temp_paths();
        assert_eq!(read_pid(paths.pid_path()).unwrap(), None);
    }

    #[test]
    fn read_pid_parses_integer() {
        let (_dir, paths) = temp_paths();
        fs::write(paths.pid_path(), b"42\n").expect("write pid");
        assert_eq!(read_pid(paths.pid_path()).unwrap(), Some(42));
    }

    #[test]
    fn record_freshness_truncates_to_seconds() {
        let record = HandleRecord {
            status: HandleStatus::Ready,
            supervisor_pid: 1,
            server_pid: Some(2),
            host: String::from("127.0.0.1"),
            port: 27017,
            timestamp: 10,
        };
        let late_start = UNIX_EPOCH + Duration::from_secs(20);
        assert!(!record_is_recent(&record, late_start));
        let same_second = UNIX_EPOCH + Duration::from_millis(10_900);
        assert!(record_is_recent(&record, same_second));
    }

    #[test]
    fn current_process_reads_as_alive() {
        assert!(process_alive(std::process::id()).expect("probe self"));
    }

    #[test]
    fn impossible_pid_reads_as_dead() {
        // Beyond the kernel's pid range, so never allocated.
        assert!(!process_alive(u32::MAX).expect("probe impossible pid"));
    }
}
