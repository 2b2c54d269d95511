use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{info, warn};

use mongard_config::{HandleRecord, HandleStatus, RuntimePaths};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::files::atomic_write;

/// Singleton guard over the supervisor's runtime artefacts.
///
/// Holds the lock file for the guard's lifetime and owns the pid file,
/// handle record, and port file derived from it. Dropping the guard
/// removes every artefact so a clean exit leaves no trace and consumers
/// treat the absence of the handle record as "not running".
#[derive(Debug)]
pub(super) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
}

impl ProcessGuard {
    pub(super) fn acquire(paths: RuntimePaths) -> Result<Self, LaunchError> {
        let lock = acquire_lock(&paths)?;
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
        })
    }

    pub(super) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let path = self.paths.pid_path();
        let mut file = options.open(path).map_err(|source| LaunchError::PidWrite {
            path: path.to_path_buf(),
            source,
        })?;
        writeln!(file, "{pid}").map_err(|source| LaunchError::PidWrite {
            path: path.to_path_buf(),
            source,
        })?;
        file.sync_all().map_err(|source| LaunchError::PidWrite {
            path: path.to_path_buf(),
            source,
        })?;
        self.pid = Some(pid);
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    /// Publishes a handle record snapshot for the current lifecycle state.
    pub(super) fn write_handle(
        &self,
        status: HandleStatus,
        server_pid: Option<u32>,
        host: &str,
        port: u16,
    ) -> Result<(), LaunchError> {
        let supervisor_pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let record = HandleRecord::new(status, supervisor_pid, server_pid, host, port)?;
        let payload = serde_json::to_vec(&record)?;
        let path = self.paths.handle_path();
        atomic_write(path, &payload).map_err(|source| LaunchError::HandleWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            %status,
            port,
            file = %path.display(),
            "handle record updated"
        );
        Ok(())
    }

    /// Publishes the effective port for dependent build steps.
    pub(super) fn write_port(&self, port: u16) -> Result<(), LaunchError> {
        let path = self.paths.port_path();
        atomic_write(path, format!("{port}\n").as_bytes()).map_err(|source| {
            LaunchError::PortWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(
            target: PROCESS_TARGET,
            port,
            file = %path.display(),
            "effective port published"
        );
        Ok(())
    }

    pub(super) fn paths(&self) -> &RuntimePaths {
        &self.paths
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        for path in [
            self.paths.lock_path(),
            self.paths.pid_path(),
            self.paths.handle_path(),
            self.paths.port_path(),
        ] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: PROCESS_TARGET,
                        file = %path.display(),
                        error = %error,
                        "failed to remove runtime artefact"
                    );
                }
                _ => {}
            }
        }
    }
}

fn acquire_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(paths.lock_path()) {
        Ok(file) => {
            info!(
                target: PROCESS_TARGET,
                file = %paths.lock_path().display(),
                "acquired supervisor lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => handle_existing_lock(paths),
        Err(source) => Err(LaunchError::LockCreate {
            path: paths.lock_path().to_path_buf(),
            source,
        }),
    }
}

fn handle_existing_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    if let Some(pid) = read_pid(paths.pid_path())
        && pid != 0
    {
        match check_process(pid) {
            Ok(true) => {
                info!(
                    target: PROCESS_TARGET,
                    pid,
                    "refusing to start: existing supervisor alive"
                );
                return Err(LaunchError::AlreadyRunning { pid });
            }
            Ok(false) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid,
                    "existing supervisor not detected; cleaning stale files"
                );
            }
            Err(error) => return Err(error),
        }
    }
    remove_file(paths.lock_path())?;
    remove_file(paths.pid_path())?;
    remove_file(paths.handle_path())?;
    remove_file(paths.port_path())?;
    acquire_lock(paths)
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

fn remove_file(path: &Path) -> Result<(), LaunchError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LaunchError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn check_process(pid: u32) -> Result<bool, LaunchError> {
    // Zero and out-of-range values can never name a live process; the
    // cast guard also keeps negative pids out of kill(2), where they
    // address process groups.
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    if raw == 0 {
        return Ok(false);
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => Ok(true),
        Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) | Err(Errno::ECHILD) => Ok(false),
        Err(errno) => Err(LaunchError::CheckProcess { pid, source: errno }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths_in(dir: &TempDir) -> RuntimePaths {
        RuntimePaths::prepare(Some(dir.path())).expect("runtime paths")
    }

    #[test]
    fn second_acquire_fails_while_pid_is_alive() {
        let dir = TempDir::new().expect("temp dir");
        let mut guard = ProcessGuard::acquire(paths_in(&dir)).expect("first acquire");
        guard.write_pid(std::process::id()).expect("write pid");
        let error = ProcessGuard::acquire(paths_in(&dir)).expect_err("second acquire");
        assert!(matches!(error, LaunchError::AlreadyRunning { .. }));
    }

    #[test]
    fn stale_artefacts_are_reclaimed() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths_in(&dir);
        fs::write(paths.lock_path(), b"").expect("stale lock");
        // A pid nobody holds: pid files never record zero, and u32::MAX is
        // beyond the kernel's pid range.
        fs::write(paths.pid_path(), format!("{}\n", u32::MAX)).expect("stale pid");
        fs::write(paths.port_path(), b"27017\n").expect("stale port");
        let guard = ProcessGuard::acquire(paths_in(&dir)).expect("reclaim stale lock");
        assert!(!guard.paths().port_path().exists());
    }

    #[test]
    fn drop_removes_published_artefacts() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths_in(&dir);
        let mut guard = ProcessGuard::acquire(paths_in(&dir)).expect("acquire");
        guard.write_pid(std::process::id()).expect("write pid");
        guard
            .write_handle(HandleStatus::Ready, Some(999), "127.0.0.1", 27018)
            .expect("write handle");
        guard.write_port(27018).expect("write port");
        assert!(paths.handle_path().exists());
        drop(guard);
        assert!(!paths.lock_path().exists());
        assert!(!paths.pid_path().exists());
        assert!(!paths.handle_path().exists());
        assert!(!paths.port_path().exists());
    }

    #[test]
    fn handle_requires_pid_first() {
        let dir = TempDir::new().expect("temp dir");
        let guard = ProcessGuard::acquire(paths_in(&dir)).expect("acquire");
        let error = guard
            .write_handle(HandleStatus::Starting, None, "127.0.0.1", 27017)
            .expect_err("pid not yet written");
        assert!(matches!(error, LaunchError::MissingPid));
    }

    #[test]
    fn published_record_reads_back() {
        let dir = TempDir::new().expect("temp dir");
        let mut guard = ProcessGuard::acquire(paths_in(&dir)).expect("acquire");
        guard.write_pid(1234).expect("write pid");
        guard
            .write_handle(HandleStatus::Ready, Some(5678), "127.0.0.1", 29000)
            .expect("write handle");
        let record = HandleRecord::read(guard.paths().handle_path())
            .expect("read record")
            .expect("record present");
        assert_eq!(record.status, HandleStatus::Ready);
        assert_eq!(record.supervisor_pid, 1234);
        assert_eq!(record.server_pid, Some(5678));
        assert_eq!(record.port, 29000);
    }
}
