//! Command-line runtime for the mongard build harness.
//!
//! The module owns argument parsing, configuration bootstrapping, and
//! dispatch to the three command families: `server` lifecycle commands
//! driving the background supervisor, `import` runs loading data files
//! into short-lived server instances, and `scripts` runs evaluating a
//! directory of scripts against the running server. The interface is
//! designed to be exercised both from the binary entrypoint and from
//! tests where IO streams can be substituted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

mod cli;
mod config;
mod errors;
mod import;
mod lifecycle;
mod scripts;

use cli::{Cli, CliCommand};
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::AppError;
use lifecycle::{LifecycleContext, LifecycleOutput, SystemLifecycle};

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the `Config` fields in `mongard-config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--skip",
    "--port",
    "--random-port",
    "--mongo-version",
    "--wait",
    "--bind-ip",
    "--database-directory",
    "--logging",
    "--log-file",
    "--log-file-encoding",
    "--download-path",
    "--auth-enabled",
    "--unix-socket-prefix",
    "--journal",
    "--storage-engine",
    "--runtime-dir",
    "--log-filter",
    "--default-import-database",
    "--parallel",
    "--script-charset-encoding",
    "--mongod-binary",
    "--mongoimport-binary",
    "--mongo-shell-binary",
];

/// Subset of [`CONFIG_CLI_FLAGS`] that take no value.
const CONFIG_CLI_BOOL_FLAGS: &[&str] = &[
    "--skip",
    "--random-port",
    "--wait",
    "--auth-enabled",
    "--journal",
    "--parallel",
];

/// Runs the CLI against the provided argument list and IO streams.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    match run_inner(&args, stdout, stderr) {
        Ok(code) => code,
        Err(AppError::CliUsage(error)) => {
            // Help and version requests are usage "errors" to clap but
            // successful runs to the user.
            let rendered = error.render();
            if error.use_stderr() {
                let _ = write!(stderr, "{rendered}");
                ExitCode::FAILURE
            } else {
                let _ = write!(stdout, "{rendered}");
                ExitCode::SUCCESS
            }
        }
        Err(error) => {
            let _ = writeln!(stderr, "mongard: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run_inner<W, E>(
    args: &[OsString],
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    let split = split_config_arguments(args);
    let config = OrthoConfigLoader.load(&split.config_arguments)?;
    let _telemetry = mongardd::telemetry::initialise(&config)?;

    let cli_arguments = prepare_cli_arguments(args, split.command_start);
    let cli = Cli::try_parse_from(cli_arguments).map_err(AppError::CliUsage)?;
    let context = LifecycleContext {
        config: &config,
        config_arguments: &split.config_arguments,
    };

    match cli.command {
        CliCommand::Server { action } => {
            let mut output = LifecycleOutput::new(stdout, stderr);
            let controller = SystemLifecycle;
            controller
                .handle(action.into(), context, &mut output)
                .map_err(AppError::from)
        }
        CliCommand::Import { manifest } => {
            import::run(&config, &manifest).map_err(AppError::from)
        }
        CliCommand::Scripts {
            directory,
            database,
        } => scripts::run(&config, &directory, &database).map_err(AppError::from),
    }
}

/// Rebuilds an argument list for clap: argv[0] plus the command tokens
/// that follow the configuration flags.
fn prepare_cli_arguments(args: &[OsString], command_start: usize) -> Vec<OsString> {
    let mut cli_arguments = Vec::with_capacity(1 + args.len().saturating_sub(command_start));
    if let Some(binary) = args.first() {
        cli_arguments.push(binary.clone());
    } else {
        cli_arguments.push(OsString::from("mongard"));
    }
    cli_arguments.extend(args.iter().skip(command_start.max(1)).cloned());
    cli_arguments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[test]
    fn command_tokens_follow_configuration_flags() {
        let args = os(&["mongard", "--port", "28017", "server", "start"]);
        let split = split_config_arguments(&args);
        let cli_arguments = prepare_cli_arguments(&args, split.command_start);
        assert_eq!(cli_arguments, os(&["mongard", "server", "start"]));
    }

    fn assert_code(actual: ExitCode, expected: ExitCode) {
        // ExitCode lacks PartialEq; compare the debug renderings.
        assert_eq!(format!("{actual:?}"), format!("{expected:?}"));
    }

    #[test]
    fn help_request_exits_successfully() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run(os(&["mongard", "--help"]), &mut stdout, &mut stderr);
        assert_code(code, ExitCode::SUCCESS);
        let rendered = String::from_utf8(stdout).expect("utf8 help");
        assert!(rendered.contains("server"));
    }

    #[test]
    fn unknown_command_fails_with_usage_output() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run(os(&["mongard", "frobnicate"]), &mut stdout, &mut stderr);
        assert_code(code, ExitCode::FAILURE);
        assert!(!stderr.is_empty());
    }
}
