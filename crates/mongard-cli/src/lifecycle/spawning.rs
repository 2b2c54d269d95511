//! Supervisor process spawning utilities.

use std::env;
use std::ffi::OsString;
use std::process::{Child, Command, Stdio};

use super::error::LifecycleError;

/// Spawns the supervisor process with the given configuration arguments.
///
/// Uses the `MONGARDD_BIN` environment variable when set, falling back to
/// the `mongardd` binary on the search path. Configuration flags are
/// forwarded verbatim so the supervisor resolves the same effective
/// configuration as the invoking CLI.
pub(super) fn spawn_supervisor(config_arguments: &[OsString]) -> Result<Child, LifecycleError> {
    let binary = supervisor_binary();
    let mut command = Command::new(&binary);
    if config_arguments.len() > 1 {
        // Skip argv[0], which is the CLI binary name, and forward the
        // remaining configuration flags verbatim.
        for arg in &config_arguments[1..] {
            command.arg(arg);
        }
    }
    command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    command
        .spawn()
        .map_err(|source| LifecycleError::LaunchSupervisor { binary, source })
}

fn supervisor_binary() -> OsString {
    env::var_os("MONGARDD_BIN").unwrap_or_else(|| OsString::from("mongardd"))
}
