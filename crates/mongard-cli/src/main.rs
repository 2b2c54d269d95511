//! CLI entrypoint for the mongard build harness.
//!
//! The binary delegates to [`mongard_cli::run`], which loads configuration,
//! splits configuration flags from command tokens, and dispatches the
//! lifecycle, import, and scripts commands.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    mongard_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
