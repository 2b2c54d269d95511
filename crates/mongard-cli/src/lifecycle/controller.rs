//! High-level supervisor lifecycle flows.

use std::io::Write;
use std::process::ExitCode;
use std::time::SystemTime;

use tracing::debug;

use mongard_config::{HandleRecord, RuntimePaths};

use super::error::LifecycleError;
use super::monitoring::{STARTUP_TIMEOUT, process_alive, wait_for_exit, wait_for_ready};
use super::shutdown::{SHUTDOWN_TIMEOUT, signal_supervisor, wait_for_shutdown};
use super::spawning::spawn_supervisor;
use super::types::{LifecycleCommand, LifecycleContext, LifecycleOutput};

const LIFECYCLE_TARGET: &str = "mongard::lifecycle";

/// Executes lifecycle commands against the system supervisor.
pub(crate) struct SystemLifecycle;

impl SystemLifecycle {
    pub(crate) fn handle<W: Write, E: Write>(
        &self,
        command: LifecycleCommand,
        context: LifecycleContext<'_>,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        match command {
            LifecycleCommand::Start => start(context, output),
            LifecycleCommand::Stop => stop(context, output),
            LifecycleCommand::Status => status(context, output),
        }
    }
}

fn start<W: Write, E: Write>(
    context: LifecycleContext<'_>,
    output: &mut LifecycleOutput<W, E>,
) -> Result<ExitCode, LifecycleError> {
    if context.config.skip {
        debug!(target: LIFECYCLE_TARGET, "skip requested; not starting a server");
        output.stdout_line(format_args!("skip is set; leaving the server alone"))?;
        return Ok(ExitCode::SUCCESS);
    }
    let paths = RuntimePaths::prepare(context.config.runtime_dir().as_deref())?;
    if let Some(record) = HandleRecord::read(paths.handle_path())?
        && process_alive(record.supervisor_pid)?
    {
        return Err(LifecycleError::AlreadyRunning {
            pid: record.supervisor_pid,
        });
    }
    let started_at = SystemTime::now();
    let mut child = spawn_supervisor(context.config_arguments)?;
    let record = wait_for_ready(&paths, &mut child, started_at, STARTUP_TIMEOUT)?;
    output.stdout_line(format_args!(
        "managed server ready (pid {}) on {}:{}",
        record.server_pid.unwrap_or(record.supervisor_pid),
        record.host,
        record.port,
    ))?;
    output.stderr_line(format_args!(
        "runtime artefacts under {}",
        paths.runtime_dir().display(),
    ))?;
    if context.config.wait {
        output.stdout_line(format_args!(
            "waiting for the server to stop; interrupt to detach",
        ))?;
        wait_for_exit(&paths)?;
        output.stdout_line(format_args!("server stopped"))?;
    }
    Ok(ExitCode::SUCCESS)
}

fn stop<W: Write, E: Write>(
    context: LifecycleContext<'_>,
    output: &mut LifecycleOutput<W, E>,
) -> Result<ExitCode, LifecycleError> {
    if context.config.skip {
        debug!(target: LIFECYCLE_TARGET, "skip requested; not stopping the server");
        output.stdout_line(format_args!("skip is set; leaving the server alone"))?;
        return Ok(ExitCode::SUCCESS);
    }
    let paths = RuntimePaths::readonly(context.config.runtime_dir().as_deref());
    let Some(record) = HandleRecord::read(paths.handle_path())? else {
        return Err(LifecycleError::NotRunning);
    };
    if !process_alive(record.supervisor_pid)? {
        return Err(LifecycleError::NotRunning);
    }
    debug!(
        target: LIFECYCLE_TARGET,
        pid = record.supervisor_pid,
        "signalling supervisor to stop"
    );
    signal_supervisor(record.supervisor_pid)?;
    wait_for_shutdown(&paths, &record.host, record.port, SHUTDOWN_TIMEOUT)?;
    output.stdout_line(format_args!(
        "supervisor pid {} stopped cleanly",
        record.supervisor_pid,
    ))?;
    output.stderr_line(format_args!(
        "runtime artefacts removed from {}",
        paths.runtime_dir().display(),
    ))?;
    Ok(ExitCode::SUCCESS)
}

fn status<W: Write, E: Write>(
    context: LifecycleContext<'_>,
    output: &mut LifecycleOutput<W, E>,
) -> Result<ExitCode, LifecycleError> {
    let paths = RuntimePaths::readonly(context.config.runtime_dir().as_deref());
    let record = HandleRecord::read(paths.handle_path())?;
    match record {
        Some(record) if process_alive(record.supervisor_pid)? => {
            output.stdout_line(format_args!(
                "server {} (supervisor pid {}, server pid {}) on {}:{}",
                record.status,
                record.supervisor_pid,
                record
                    .server_pid
                    .map_or_else(|| String::from("unknown"), |pid| pid.to_string()),
                record.host,
                record.port,
            ))?;
        }
        Some(_) | None => {
            output.stdout_line(format_args!(
                "server is not running; use 'mongard server start'",
            ))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::fs;

    use mongard_config::Config;
    use tempfile::TempDir;

    use super::*;

    fn config_in(dir: &TempDir) -> Config {
        let runtime = dir.path().to_str().expect("utf-8 path");
        Config::load_from_iter([
            OsString::from("mongard"),
            OsString::from("--runtime-dir"),
            OsString::from(runtime),
        ])
        .expect("load config")
    }

    fn run(
        command: LifecycleCommand,
        config: &Config,
    ) -> (Result<ExitCode, LifecycleError>, String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = {
            let mut output = LifecycleOutput::new(&mut stdout, &mut stderr);
            let context = LifecycleContext {
                config,
                config_arguments: &[OsString::from("mongard")],
            };
            SystemLifecycle.handle(command, context, &mut output)
        };
        (
            result,
            String::from_utf8(stdout).expect("stdout utf-8"),
            String::from_utf8(stderr).expect("stderr utf-8"),
        )
    }

    #[test]
    fn skip_short_circuits_start() {
        let dir = TempDir::new().expect("temp dir");
        let runtime = dir.path().to_str().expect("utf-8 path");
        let config = Config::load_from_iter([
            OsString::from("mongard"),
            OsString::from("--skip"),
            OsString::from("--runtime-dir"),
            OsString::from(runtime),
        ])
        .expect("load config");
        let (result, stdout, _) = run(LifecycleCommand::Start, &config);
        result.expect("skip succeeds");
        assert!(stdout.contains("skip is set"));
    }

    #[test]
    fn skip_short_circuits_stop() {
        let dir = TempDir::new().expect("temp dir");
        let mut config = config_in(&dir);
        config.skip = true;
        let (result, stdout, _) = run(LifecycleCommand::Stop, &config);
        result.expect("skip succeeds");
        assert!(stdout.contains("skip is set"));
    }

    #[test]
    fn stop_without_a_record_reports_not_running() {
        let dir = TempDir::new().expect("temp dir");
        let config = config_in(&dir);
        let (result, _, _) = run(LifecycleCommand::Stop, &config);
        assert!(matches!(result, Err(LifecycleError::NotRunning)));
    }

    #[test]
    fn stop_with_a_dead_supervisor_reports_not_running() {
        let dir = TempDir::new().expect("temp dir");
        let config = config_in(&dir);
        let paths = RuntimePaths::readonly(Some(dir.path()));
        let record = HandleRecord::new(
            mongard_config::HandleStatus::Ready,
            999_999_999,
            Some(999_999_998),
            String::from("127.0.0.1"),
            27017,
        )
        .expect("record");
        fs::write(
            paths.handle_path(),
            serde_json::to_vec(&record).expect("serialise"),
        )
        .expect("write handle");
        let (result, _, _) = run(LifecycleCommand::Stop, &config);
        assert!(matches!(result, Err(LifecycleError::NotRunning)));
    }

    #[test]
    fn status_without_a_record_prints_guidance() {
        let dir = TempDir::new().expect("temp dir");
        let config = config_in(&dir);
        let (result, stdout, _) = run(LifecycleCommand::Status, &config);
        result.expect("status succeeds");
        assert!(stdout.contains("not running"));
    }

    #[test]
    fn status_reports_a_live_record() {
        let dir = TempDir::new().expect("temp dir");
        let config = config_in(&dir);
        let paths = RuntimePaths::readonly(Some(dir.path()));
        let record = HandleRecord::new(
            mongard_config::HandleStatus::Ready,
            std::process::id(),
            Some(4321),
            String::from("127.0.0.1"),
            27017,
        )
        .expect("record");
        fs::write(
            paths.handle_path(),
            serde_json::to_vec(&record).expect("serialise"),
        )
        .expect("write handle");
        let (result, stdout, _) = run(LifecycleCommand::Status, &config);
        result.expect("status succeeds");
        assert!(stdout.contains("supervisor pid"));
        assert!(stdout.contains("127.0.0.1:27017"));
    }
}
