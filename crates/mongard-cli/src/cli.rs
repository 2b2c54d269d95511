//! CLI argument definitions for the mongard harness.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use crate::lifecycle::LifecycleCommand;

/// Command-line interface for the mongard build harness.
#[derive(Parser, Debug)]
#[command(name = "mongard", disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Manage the supervised server lifecycle.
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Load data files into short-lived server instances.
    Import {
        /// TOML manifest describing the import entries.
        #[arg(value_name = "MANIFEST")]
        manifest: Utf8PathBuf,
    },
    /// Evaluate every script in a directory against the running server.
    Scripts {
        /// Directory holding the script files.
        #[arg(value_name = "DIR")]
        directory: Utf8PathBuf,
        /// Database the scripts are evaluated against.
        #[arg(long, value_name = "NAME")]
        database: String,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerAction {
    /// Launch the supervisor and block until the server is ready.
    Start,
    /// Stop the running supervisor and wait for teardown.
    Stop,
    /// Report the supervised server's state.
    Status,
}

impl From<ServerAction> for LifecycleCommand {
    fn from(action: ServerAction) -> Self {
        match action {
            ServerAction::Start => Self::Start,
            ServerAction::Stop => Self::Stop,
            ServerAction::Status => Self::Status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_subcommands_parse() {
        let cli = Cli::try_parse_from(["mongard", "server", "start"]).expect("parse");
        assert!(matches!(
            cli.command,
            CliCommand::Server {
                action: ServerAction::Start
            }
        ));
    }

    #[test]
    fn scripts_requires_a_database() {
        assert!(Cli::try_parse_from(["mongard", "scripts", "/tmp/scripts"]).is_err());
        let cli = Cli::try_parse_from([
            "mongard",
            "scripts",
            "/tmp/scripts",
            "--database",
            "app",
        ])
        .expect("parse");
        assert!(matches!(cli.command, CliCommand::Scripts { .. }));
    }

    #[test]
    fn import_takes_a_manifest_path() {
        let cli = Cli::try_parse_from(["mongard", "import", "imports.toml"]).expect("parse");
        match cli.command {
            CliCommand::Import { manifest } => {
                assert_eq!(manifest, Utf8PathBuf::from("imports.toml"));
            }
            other => panic!("expected import command, got {other:?}"),
        }
    }
}
