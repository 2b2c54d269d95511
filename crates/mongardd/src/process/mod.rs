use std::time::Duration;

pub(crate) mod daemonizer;
mod errors;
mod files;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use errors::LaunchError;
pub use launch::{LaunchMode, run_daemon};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
/// Interval between advisory liveness reports while supervising.
pub(crate) const LIVENESS_INTERVAL: Duration = Duration::from_secs(60);
/// How often the shutdown flag is polled between liveness reports.
pub(crate) const SUPERVISE_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub(crate) const FOREGROUND_ENV_VAR: &str = "MONGARD_FOREGROUND";
