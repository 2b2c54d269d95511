//! Evaluation of JavaScript files against a running server.
//!
//! Reads every regular file in a directory in lexicographic order, wraps
//! each one in an anonymous function, and evaluates it through the shell
//! binary against the named database. The server must already be running;
//! this step never starts one.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::process::{Command, ExitCode, Stdio};

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use mongard_config::{Config, ConfigError, EncodingError, RuntimePaths};
use mongardd::net::{NetError, socket_is_reachable};

const SCRIPTS_TARGET: &str = "mongard::scripts";
const SHELL_BIN_ENV: &str = "MONGARD_MONGO_SHELL_BIN";

/// Errors raised while evaluating a script directory.
#[derive(Debug, Error)]
pub(crate) enum ScriptsError {
    #[error("a non-blank database name is required for script evaluation")]
    BlankDatabase,
    #[error("no server is reachable on {host}:{port}; run 'mongard server start' first")]
    ServerUnavailable { host: String, port: u16 },
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read script {path}: {source}")]
    ReadScript {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode script {path}: {source}")]
    DecodeScript {
        path: String,
        #[source]
        source: EncodingError,
    },
    #[error("script {file} failed: {message}")]
    Evaluation { file: String, message: String },
    #[error("failed to spawn shell binary '{binary:?}': {source}")]
    Spawn {
        binary: OsString,
        #[source]
        source: io::Error,
    },
}

/// Something that can evaluate a script source against a database.
///
/// Seam for tests; production use goes through [`MongoShellEvaluator`].
pub(crate) trait ScriptEvaluator {
    fn evaluate(&self, database: &str, source: &str) -> Result<(), ScriptFailure>;
}

/// Failure detail from a single evaluation.
pub(crate) struct ScriptFailure {
    pub(crate) message: String,
}

/// Evaluates scripts by shelling out to the `mongo` client.
pub(crate) struct MongoShellEvaluator {
    binary: OsString,
    host: String,
    port: u16,
}

impl MongoShellEvaluator {
    fn from_config(config: &Config, host: String, port: u16) -> Self {
        let binary = config
            .mongo_shell_binary
            .as_ref()
            .map(|path| OsString::from(path.as_str()))
            .or_else(|| std::env::var_os(SHELL_BIN_ENV))
            .unwrap_or_else(|| OsString::from("mongo"));
        Self { binary, host, port }
    }
}

impl ScriptEvaluator for MongoShellEvaluator {
    fn evaluate(&self, database: &str, source: &str) -> Result<(), ScriptFailure> {
        let target = format!("{}:{}/{database}", self.host, self.port);
        let wrapped = format!("(function() {{\n{source}\n}})();");
        let output = Command::new(&self.binary)
            .arg(&target)
            .arg("--quiet")
            .arg("--eval")
            .arg(&wrapped)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ScriptFailure {
                message: format!("failed to run {:?}: {source}", self.binary),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ScriptFailure {
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}

/// Evaluates every script in `directory` against `database`.
///
/// A missing or unreadable directory is reported and skipped, matching the
/// other build steps' tolerance of absent inputs. A blank database name or
/// an unreachable server is fatal, as is the first failing script.
pub(crate) fn run(
    config: &Config,
    directory: &Utf8Path,
    database: &str,
) -> Result<ExitCode, ScriptsError> {
    if config.skip {
        debug!(target: SCRIPTS_TARGET, "skip requested; not evaluating scripts");
        return Ok(ExitCode::SUCCESS);
    }
    if database.trim().is_empty() {
        return Err(ScriptsError::BlankDatabase);
    }
    let host = config.bind_ip();
    let port = resolve_port(config);
    if !socket_is_reachable(&host, port)? {
        return Err(ScriptsError::ServerUnavailable { host, port });
    }
    let evaluator = MongoShellEvaluator::from_config(config, host, port);
    evaluate_directory(config, directory, database, &evaluator)
}

/// Prefers the externally published port over the configured one so the
/// step targets whichever server the start step actually launched.
fn resolve_port(config: &Config) -> u16 {
    let paths = RuntimePaths::readonly(config.runtime_dir().as_deref());
    match fs::read_to_string(paths.port_path()) {
        Ok(content) => match content.trim().parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                warn!(
                    target: SCRIPTS_TARGET,
                    path = %paths.port_path().display(),
                    "ignoring unparseable port file"
                );
                config.port()
            }
        },
        Err(_) => config.port(),
    }
}

fn evaluate_directory(
    config: &Config,
    directory: &Utf8Path,
    database: &str,
    evaluator: &dyn ScriptEvaluator,
) -> Result<ExitCode, ScriptsError> {
    let encoding = config.script_encoding()?;
    let entries = match fs::read_dir(directory.as_std_path()) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(
                target: SCRIPTS_TARGET,
                directory = %directory,
                %error,
                "script directory is not readable; skipping evaluation"
            );
            return Ok(ExitCode::SUCCESS);
        }
    };
    let mut files: Vec<_> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        .map(|entry| entry.path())
        .collect();
    files.sort();
    for path in files {
        let shown = path.display().to_string();
        let bytes = fs::read(&path).map_err(|source| ScriptsError::ReadScript {
            path: shown.clone(),
            source,
        })?;
        let source =
            encoding
                .decode(&bytes)
                .map_err(|source| ScriptsError::DecodeScript {
                    path: shown.clone(),
                    source,
                })?;
        info!(target: SCRIPTS_TARGET, file = %shown, "evaluating script");
        evaluator
            .evaluate(database, &source)
            .map_err(|failure| ScriptsError::Evaluation {
                file: shown,
                message: failure.message,
            })?;
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::sync::Mutex;

    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;

    struct RecordingEvaluator {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingEvaluator {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_on: fail_on.map(str::to_owned),
            }
        }
    }

    impl ScriptEvaluator for RecordingEvaluator {
        fn evaluate(&self, _database: &str, source: &str) -> Result<(), ScriptFailure> {
            self.seen
                .lock()
                .expect("lock")
                .push(source.trim().to_owned());
            if self.fail_on.as_deref() == Some(source.trim()) {
                return Err(ScriptFailure {
                    message: String::from("boom"),
                });
            }
            Ok(())
        }
    }

    fn base_config() -> Config {
        Config::load_from_iter([OsString::from("mongard")]).expect("load config")
    }

    fn utf8_dir(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from(dir.path().to_str().expect("utf-8 path"))
    }

    #[test]
    fn scripts_run_in_lexicographic_order() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("20-second.js"), "second").expect("write");
        fs::write(dir.path().join("10-first.js"), "first").expect("write");
        let evaluator = RecordingEvaluator::new(None);
        evaluate_directory(&base_config(), &utf8_dir(&dir), "app", &evaluator)
            .expect("evaluation succeeds");
        let seen = evaluator.seen.lock().expect("lock");
        assert_eq!(*seen, vec!["first", "second"]);
    }

    #[test]
    fn first_failure_stops_the_run() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("10-first.js"), "first").expect("write");
        fs::write(dir.path().join("20-second.js"), "second").expect("write");
        let evaluator = RecordingEvaluator::new(Some("first"));
        let error = evaluate_directory(&base_config(), &utf8_dir(&dir), "app", &evaluator)
            .expect_err("evaluation fails");
        assert!(matches!(error, ScriptsError::Evaluation { .. }));
        let seen = evaluator.seen.lock().expect("lock");
        assert_eq!(*seen, vec!["first"]);
    }

    #[test]
    fn missing_directory_is_skipped() {
        let dir = TempDir::new().expect("temp dir");
        let missing = utf8_dir(&dir).join("absent");
        let evaluator = RecordingEvaluator::new(None);
        evaluate_directory(&base_config(), &missing, "app", &evaluator).expect("skip succeeds");
        assert!(evaluator.seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn skip_short_circuits_script_evaluation() {
        let config = Config {
            skip: true,
            ..Config::default()
        };
        // Skip wins even over the otherwise fatal blank database name.
        run(&config, Utf8Path::new("scripts"), "   ").expect("skip succeeds");
    }

    #[test]
    fn blank_database_is_fatal() {
        let error = run(&base_config(), Utf8Path::new("scripts"), "   ").expect_err("blank");
        assert!(matches!(error, ScriptsError::BlankDatabase));
    }

    #[test]
    fn port_file_overrides_the_configured_port() {
        let dir = TempDir::new().expect("temp dir");
        let runtime = dir.path().to_str().expect("utf-8 path");
        let config = Config::load_from_iter([
            OsString::from("mongard"),
            OsString::from("--runtime-dir"),
            OsString::from(runtime),
        ])
        .expect("load config");
        let paths = RuntimePaths::readonly(Some(dir.path()));
        fs::write(paths.port_path(), b"28123\n").expect("port file");
        assert_eq!(resolve_port(&config), 28123);
    }

    #[test]
    fn unparseable_port_file_falls_back_to_configuration() {
        let dir = TempDir::new().expect("temp dir");
        let runtime = dir.path().to_str().expect("utf-8 path");
        let config = Config::load_from_iter([
            OsString::from("mongard"),
            OsString::from("--runtime-dir"),
            OsString::from(runtime),
            OsString::from("--port"),
            OsString::from("29000"),
        ])
        .expect("load config");
        let paths = RuntimePaths::readonly(Some(dir.path()));
        fs::write(paths.port_path(), b"not a port\n").expect("port file");
        assert_eq!(resolve_port(&config), 29000);
    }
}
