//! Bulk import of JSON documents into a managed server.
//!
//! Starts a scoped server, runs `mongoimport` once per manifest entry in
//! declaration order, and tears the server down again whether or not the
//! imports succeed.

use std::ffi::OsString;
use std::io;
use std::process::{Child, Command, ExitCode, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use mongard_config::{Config, ConfigError, ImportEntry, ImportManifest, ImportManifestError};
use mongardd::engine::{EngineError, ScopedServer, SystemDistributions, SystemLauncher};
use mongardd::net::{NetError, allocate_random_port};
use mongardd::output::sink_for;

const IMPORT_TARGET: &str = "mongard::import";
const IMPORT_BIN_ENV: &str = "MONGARD_MONGOIMPORT_BIN";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors raised while executing an import manifest.
#[derive(Debug, Error)]
pub(crate) enum ImportError {
    #[error(transparent)]
    Manifest(#[from] ImportManifestError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Net(#[from] NetError),
    #[error("failed to spawn import binary '{binary:?}': {source}")]
    Spawn {
        binary: OsString,
        #[source]
        source: io::Error,
    },
    #[error("import of {file} did not finish within {timeout_ms} ms")]
    Timeout { file: String, timeout_ms: u64 },
    #[error("failed to monitor import process: {source}")]
    Wait {
        #[source]
        source: io::Error,
    },
}

/// Runs every import in the manifest against a freshly started server.
///
/// An empty manifest is reported but is not an error, matching the
/// behaviour of the other build steps: the build carries on. Individual
/// import failures are logged and the remaining entries still run; only
/// infrastructure failures (server launch, spawn, timeout) abort.
pub(crate) fn run(config: &Config, manifest_path: &Utf8Path) -> Result<ExitCode, ImportError> {
    if config.skip {
        debug!(target: IMPORT_TARGET, "skip requested; not importing anything");
        return Ok(ExitCode::SUCCESS);
    }
    let manifest = ImportManifest::load(manifest_path.as_std_path())?;
    let default_database = manifest
        .default_database
        .clone()
        .or_else(|| config.default_import_database.clone());
    for entry in &manifest.imports {
        entry.validate(default_database.as_deref())?;
    }
    if manifest.imports.is_empty() {
        error!(
            target: IMPORT_TARGET,
            manifest = %manifest_path,
            "manifest contains no imports; nothing to do"
        );
        return Ok(ExitCode::SUCCESS);
    }
    if manifest.parallel || config.parallel {
        warn!(
            target: IMPORT_TARGET,
            "parallel imports are not supported; running sequentially"
        );
    }
    let destination = config.log_destination()?;
    let log_file = config.log_file()?;
    let encoding = config.log_file_encoding()?;
    let sink = sink_for(destination, &log_file, encoding);
    let port = if config.random_port {
        allocate_random_port()?
    } else {
        config.port()
    };
    let resolver = SystemDistributions::from_config(config)?;
    let binary = import_binary(config);
    // Each entry gets its own short-lived server on the resolved port so a
    // crashed import cannot poison the instances that follow it.
    for entry in &manifest.imports {
        let server = ScopedServer::start(config, &resolver, &SystemLauncher, port, &sink)?;
        let result = run_import(&binary, entry, default_database.as_deref(), &server);
        // Stop explicitly so a shutdown failure is reported rather than
        // swallowed by the drop path.
        let stop_result = server.stop();
        result?;
        stop_result?;
    }
    Ok(ExitCode::SUCCESS)
}

fn run_import(
    binary: &OsString,
    entry: &ImportEntry,
    default_database: Option<&str>,
    server: &ScopedServer,
) -> Result<(), ImportError> {
    let arguments = import_arguments(entry, default_database, server.host(), server.port());
    info!(
        target: IMPORT_TARGET,
        file = %entry.file,
        collection = %entry.collection(),
        "importing documents"
    );
    let child = Command::new(binary)
        .args(&arguments)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|source| ImportError::Spawn {
            binary: binary.clone(),
            source,
        })?;
    let status = wait_with_timeout(
        child,
        Duration::from_millis(entry.timeout_ms),
        entry.file.as_str(),
    )?;
    if !status.success() {
        warn!(
            target: IMPORT_TARGET,
            file = %entry.file,
            code = status.code(),
            "import exited with a failure status"
        );
    }
    Ok(())
}

fn import_binary(config: &Config) -> OsString {
    config
        .mongoimport_binary
        .as_ref()
        .map(|path| OsString::from(path.as_str()))
        .or_else(|| std::env::var_os(IMPORT_BIN_ENV))
        .unwrap_or_else(|| OsString::from("mongoimport"))
}

/// Builds the argument vector for a single import invocation.
fn import_arguments(
    entry: &ImportEntry,
    default_database: Option<&str>,
    host: &str,
    port: u16,
) -> Vec<String> {
    let mut arguments = vec![
        String::from("--host"),
        host.to_owned(),
        String::from("--port"),
        port.to_string(),
        String::from("--db"),
        entry
            .database(default_database)
            .unwrap_or_default()
            .to_owned(),
        String::from("--collection"),
        entry.collection(),
        String::from("--file"),
        entry.file.to_string(),
        String::from("--jsonArray"),
    ];
    if entry.drop_on_import {
        arguments.push(String::from("--drop"));
    }
    if entry.upsert_on_import {
        arguments.push(String::from("--upsert"));
    }
    arguments
}

fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
    file: &str,
) -> Result<std::process::ExitStatus, ImportError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|source| ImportError::Wait { source })?
        {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            if let Err(error) = child.kill() {
                warn!(
                    target: IMPORT_TARGET,
                    %error,
                    "failed to kill timed-out import process"
                );
            }
            let _ = child.wait();
            return Err(ImportError::Timeout {
                file: file.to_owned(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use rstest::rstest;

    use super::*;

    fn entry(file: &str) -> ImportEntry {
        ImportEntry {
            database: Some(String::from("app")),
            collection: None,
            file: Utf8PathBuf::from(file),
            drop_on_import: true,
            upsert_on_import: true,
            timeout_ms: 200_000,
        }
    }

    fn default_arguments(item: &ImportEntry) -> Vec<String> {
        import_arguments(item, None, "127.0.0.1", 27017)
    }

    #[test]
    fn arguments_cover_target_and_modes() {
        let arguments = default_arguments(&entry("data/users.json"));
        assert_eq!(
            arguments,
            vec![
                "--host",
                "127.0.0.1",
                "--port",
                "27017",
                "--db",
                "app",
                "--collection",
                "users",
                "--file",
                "data/users.json",
                "--jsonArray",
                "--drop",
                "--upsert",
            ]
        );
    }

    #[rstest]
    #[case(false, false)]
    #[case(true, false)]
    #[case(false, true)]
    fn mode_flags_follow_the_entry(#[case] drop: bool, #[case] upsert: bool) {
        let mut item = entry("data/users.json");
        item.drop_on_import = drop;
        item.upsert_on_import = upsert;
        let arguments = default_arguments(&item);
        assert_eq!(arguments.contains(&String::from("--drop")), drop);
        assert_eq!(arguments.contains(&String::from("--upsert")), upsert);
    }

    #[test]
    fn manifest_default_database_fills_the_db_argument() {
        let mut item = entry("data/users.json");
        item.database = None;
        let arguments = import_arguments(&item, Some("fallback"), "127.0.0.1", 27017);
        let db_index = arguments
            .iter()
            .position(|argument| argument == "--db")
            .expect("--db present");
        assert_eq!(arguments[db_index + 1], "fallback");
    }

    #[test]
    fn skip_short_circuits_the_import_step() {
        let config = Config {
            skip: true,
            ..Config::default()
        };
        // A missing manifest would otherwise be fatal.
        run(&config, camino::Utf8Path::new("no-such-manifest.toml")).expect("skip succeeds");
    }

    #[test]
    fn wait_with_timeout_returns_the_exit_status() {
        let child = Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .expect("spawn");
        let status = wait_with_timeout(child, Duration::from_secs(5), "x.json").expect("status");
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn wait_with_timeout_kills_overrunning_imports() {
        let child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .spawn()
            .expect("spawn");
        let error =
            wait_with_timeout(child, Duration::from_millis(200), "x.json").expect_err("timeout");
        assert!(matches!(error, ImportError::Timeout { .. }));
    }
}
