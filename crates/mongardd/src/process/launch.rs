//! Supervises server launch sequencing and runtime orchestration.
//!
//! The launch sequence is: acquire the singleton guard, optionally detach
//! into the background, install the shutdown flag, resolve the effective
//! port and publish it, launch the server through the engine seam, verify
//! readiness over TCP, publish the ready handle record, then supervise
//! until a shutdown signal or the server's death ends the run. Any failure
//! before the ready record is published propagates out and the guard's
//! cleanup leaves no runtime artefacts behind, so the invoking process
//! observes the failed start instead of a dangling "running" state.

use std::env;
use std::fs;
use std::process::ExitStatus;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use mongard_config::{Config, HandleStatus, RuntimePaths};

use crate::engine::{
    DistributionResolver, RunningServer, STARTUP_TIMEOUT, STOP_GRACE, ServerLauncher, ServerSpec,
    SystemDistributions, SystemLauncher, prepare_database_directory, wait_until_ready,
};
use crate::net::allocate_random_port;
use crate::output::sink_for;

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::guard::ProcessGuard;
use super::shutdown::{ShutdownFlag, ShutdownSignal, SystemShutdownSignal};
use super::{FOREGROUND_ENV_VAR, LIVENESS_INTERVAL, PROCESS_TARGET, SUPERVISE_POLL_INTERVAL};

/// Launch mode for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Process-level collaborators needed to control the supervisor lifecycle.
pub(crate) struct ProcessControl<D, S> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
}

/// Engine collaborators that provision and launch the managed server.
pub(crate) struct EngineDeps<R, L> {
    pub(crate) resolver: R,
    pub(crate) launcher: L,
}

/// Collaborators required to run the supervisor.
pub(crate) struct LaunchPlan<R, L, D, S> {
    pub(crate) process: ProcessControl<D, S>,
    pub(crate) engine: EngineDeps<R, L>,
}

/// Runs the supervisor using the production collaborators.
pub fn run_daemon(config: Config) -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            daemonizer: SystemDaemonizer::new(),
            shutdown: SystemShutdownSignal::new(),
        },
        engine: EngineDeps {
            resolver: SystemDistributions::from_config(&config)?,
            launcher: SystemLauncher,
        },
    };
    let paths = RuntimePaths::prepare(config.runtime_dir().as_deref())?;
    run_daemon_with(&config, paths, plan)
}

/// Runs the supervisor with injected collaborators.
pub(crate) fn run_daemon_with<R, L, D, S>(
    config: &Config,
    paths: RuntimePaths,
    plan: LaunchPlan<R, L, D, S>,
) -> Result<(), LaunchError>
where
    R: DistributionResolver,
    L: ServerLauncher,
    D: Daemonizer,
    S: ShutdownSignal,
{
    let LaunchPlan { process, engine } = plan;
    let ProcessControl {
        mode,
        daemonizer,
        shutdown,
    } = process;
    let EngineDeps { resolver, launcher } = engine;

    info!(target: PROCESS_TARGET, ?mode, "starting supervisor");
    // Resolve everything that can fail on configuration alone before any
    // process state changes.
    let destination = config.log_destination()?;
    let log_file = config.log_file()?;
    let encoding = config.log_file_encoding()?;
    let sink = sink_for(destination, &log_file, encoding);
    let host = config.bind_ip();

    let mut guard = ProcessGuard::acquire(paths)?;
    if matches!(mode, LaunchMode::Background) {
        daemonizer.daemonize(guard.paths())?;
    }
    let flag = shutdown.install()?;
    guard.write_pid(std::process::id())?;

    let port = resolve_effective_port(config, guard.paths())?;
    guard.write_handle(HandleStatus::Starting, None, &host, port)?;
    guard.write_port(port)?;

    let binary = resolver.resolve(&config.version())?;
    let (database_directory, _data_dir_guard) = prepare_database_directory(config)?;
    let spec = ServerSpec::from_config(config, binary, port, database_directory);
    let mut server = launcher.launch(&spec, &sink)?;
    if let Err(error) = wait_until_ready(&mut server, &host, port, STARTUP_TIMEOUT) {
        if let Err(stop_error) = server.stop(STOP_GRACE) {
            warn!(
                target: PROCESS_TARGET,
                error = %stop_error,
                "failed to stop server after startup failure"
            );
        }
        return Err(error.into());
    }
    guard.write_handle(HandleStatus::Ready, Some(server.pid()), &host, port)?;
    info!(
        target: PROCESS_TARGET,
        host = %host,
        port,
        server_pid = server.pid(),
        "managed server ready"
    );

    let outcome = supervise(&mut server, &flag)?;
    guard.write_handle(HandleStatus::Stopping, Some(server.pid()), &host, port)?;
    match outcome {
        Supervision::ShutdownRequested => {
            server.stop(STOP_GRACE)?;
        }
        Supervision::ServerExited(status) => {
            // Already gone; stop only reaps the drains.
            server.stop(STOP_GRACE)?;
            warn!(
                target: PROCESS_TARGET,
                %status,
                "supervisor exiting after unexpected server death"
            );
        }
    }
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

enum Supervision {
    ShutdownRequested,
    ServerExited(ExitStatus),
}

/// Watches the managed server until shutdown is requested or it dies.
///
/// Supervision is advisory: a dead server is reported, never restarted.
fn supervise(server: &mut RunningServer, flag: &ShutdownFlag) -> Result<Supervision, LaunchError> {
    let mut last_report = Instant::now();
    loop {
        if flag.is_raised() {
            info!(target: PROCESS_TARGET, "shutdown requested");
            return Ok(Supervision::ShutdownRequested);
        }
        if let Some(status) = server.poll_exit()? {
            warn!(
                target: PROCESS_TARGET,
                %status,
                "managed server exited unexpectedly"
            );
            return Ok(Supervision::ServerExited(status));
        }
        if last_report.elapsed() >= LIVENESS_INTERVAL {
            debug!(
                target: PROCESS_TARGET,
                server_pid = server.pid(),
                "managed server alive"
            );
            last_report = Instant::now();
        }
        thread::sleep(SUPERVISE_POLL_INTERVAL);
    }
}

/// Resolves the port the managed server should bind.
///
/// A port file already published in the runtime directory wins so a
/// coordinating step can fix the port ahead of the start. Otherwise the
/// configuration decides: random allocation when requested, the
/// configured port if not.
fn resolve_effective_port(config: &Config, paths: &RuntimePaths) -> Result<u16, LaunchError> {
    let path = paths.port_path();
    match fs::read_to_string(path) {
        Ok(content) => {
            let port =
                content
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| LaunchError::PortParse {
                        path: path.to_path_buf(),
                        content: content.trim().to_owned(),
                    })?;
            info!(
                target: PROCESS_TARGET,
                port,
                "reusing externally published port"
            );
            Ok(port)
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            if config.random_port {
                let port = allocate_random_port()?;
                info!(target: PROCESS_TARGET, port, "allocated random port");
                Ok(port)
            } else {
                Ok(config.port())
            }
        }
        Err(source) => Err(LaunchError::PortRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}
