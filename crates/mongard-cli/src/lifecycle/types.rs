//! Lifecycle command types and output abstractions.
//!
//! Defines the payloads and IO wrappers shared across lifecycle commands so
//! the controller can remain agnostic of concrete writers.

use std::ffi::OsString;
use std::fmt;
use std::io::Write;

use mongard_config::Config;

use super::LifecycleError;

/// Supported lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleCommand {
    Start,
    Stop,
    Status,
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => formatter.write_str("start"),
            Self::Stop => formatter.write_str("stop"),
            Self::Status => formatter.write_str("status"),
        }
    }
}

/// Shared configuration context available to lifecycle handlers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LifecycleContext<'a> {
    pub(crate) config: &'a Config,
    pub(crate) config_arguments: &'a [OsString],
}

/// Output handle abstracting over stdout/stderr writers.
pub(crate) struct LifecycleOutput<W: Write, E: Write> {
    pub(crate) stdout: W,
    pub(crate) stderr: E,
}

impl<W: Write, E: Write> LifecycleOutput<W, E> {
    pub(crate) fn new(stdout: W, stderr: E) -> Self {
        Self { stdout, stderr }
    }

    pub(crate) fn stdout_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stdout.write_fmt(args).map_err(LifecycleError::Io)?;
        self.stdout.write_all(b"\n").map_err(LifecycleError::Io)?;
        self.stdout.flush().map_err(LifecycleError::Io)
    }

    pub(crate) fn stderr_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stderr.write_fmt(args).map_err(LifecycleError::Io)?;
        self.stderr.write_all(b"\n").map_err(LifecycleError::Io)?;
        self.stderr.flush().map_err(LifecycleError::Io)
    }
}
