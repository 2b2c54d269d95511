//! Launch seam for the managed database server.
//!
//! The supervisor and the short-lived import harness both go through
//! this module: a [`DistributionResolver`] locates a provisioned
//! `mongod` binary for the configured version, a [`ServerSpec`]
//! assembles its argument vector, and a [`ServerLauncher`] spawns the
//! process with its output routed through a [`LineSink`]. Tests inject
//! fake resolvers and launchers through the same traits.

use std::env;
use std::fs;
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use mongard_config::{Config, ConfigError, MongoVersion, ProxySpec};

use crate::net::{self, NetError};
use crate::output::{LineSink, StreamKind, route_child_output};

const ENGINE_TARGET: &str = "mongardd::engine";

/// Interval between readiness probes of the server socket.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// How long a freshly launched server may take to accept connections.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period between SIGTERM and SIGKILL when stopping the server.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Errors raised while resolving, launching, or stopping the server.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "no mongod binary provisioned for version {version}; set {env_override} or place the \
         binary at one of: {}; distributions are published under {download}",
        searched.iter().map(|path| path.as_str()).collect::<Vec<_>>().join(", ")
    )]
    BinaryNotProvisioned {
        version: String,
        env_override: &'static str,
        searched: Vec<Utf8PathBuf>,
        download: Url,
    },
    #[error("invalid engine configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
    #[error("failed to prepare database directory {path}: {source}")]
    DatabaseDirectory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("database directory path is not valid UTF-8: {path}")]
    NonUtf8DatabaseDirectory { path: String },
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("server exited during startup with status {status}")]
    ExitedDuringStartup { status: ExitStatus },
    #[error("server did not accept connections on {host}:{port} within {timeout_secs}s")]
    NotReady {
        host: String,
        port: u16,
        timeout_secs: u64,
    },
    #[error(transparent)]
    Probe(#[from] NetError),
    #[error("failed to signal server process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },
    #[error("failed to wait for server process: {source}")]
    Wait {
        #[source]
        source: io::Error,
    },
}

/// Maps a normalised server version to a runnable `mongod` binary.
pub trait DistributionResolver: Send + Sync {
    fn resolve(&self, version: &MongoVersion) -> Result<Utf8PathBuf, EngineError>;
}

const MONGOD_ENV_OVERRIDE: &str = "MONGARD_MONGOD_BIN";

/// Resolver backed by the local distribution cache.
///
/// Resolution order: explicit binary override from configuration, the
/// `MONGARD_MONGOD_BIN` environment variable, then the per-user cache
/// laid out as `<cache>/mongard/<version>/bin/mongod` (with a flat
/// `<cache>/mongard/<version>/mongod` fallback). Downloading a missing
/// distribution is out of scope here; the error names the locations
/// searched and the publication base URL so an operator can provision
/// the binary.
pub struct SystemDistributions {
    override_path: Option<Utf8PathBuf>,
    download: Url,
    proxy: Option<ProxySpec>,
}

impl SystemDistributions {
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        Ok(Self {
            override_path: config.mongod_binary.clone(),
            download: config.download_url()?,
            proxy: config.download_proxy()?.cloned(),
        })
    }
}

impl DistributionResolver for SystemDistributions {
    fn resolve(&self, version: &MongoVersion) -> Result<Utf8PathBuf, EngineError> {
        if !version.is_known() {
            warn!(
                target: ENGINE_TARGET,
                version = %version,
                "unrecognised server version; attempting it anyway"
            );
        }
        if let Some(path) = &self.override_path {
            debug!(target: ENGINE_TARGET, binary = %path, "using configured server binary");
            return Ok(path.clone());
        }
        if let Ok(path) = env::var(MONGOD_ENV_OVERRIDE) {
            let path = Utf8PathBuf::from(path);
            debug!(target: ENGINE_TARGET, binary = %path, "using server binary from environment");
            return Ok(path);
        }
        if let Some(proxy) = &self.proxy {
            debug!(
                target: ENGINE_TARGET,
                proxy = %proxy,
                "distribution downloads would route through the configured proxy"
            );
        }
        let searched = cache_candidates(version);
        for candidate in &searched {
            if candidate.as_std_path().is_file() {
                debug!(target: ENGINE_TARGET, binary = %candidate, "found cached server binary");
                return Ok(candidate.clone());
            }
        }
        Err(EngineError::BinaryNotProvisioned {
            version: version.to_string(),
            env_override: MONGOD_ENV_OVERRIDE,
            searched,
            download: self.download.clone(),
        })
    }
}

fn cache_candidates(version: &MongoVersion) -> Vec<Utf8PathBuf> {
    let Some(cache) = dirs::cache_dir().and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
    else {
        return Vec::new();
    };
    let root = cache.join("mongard").join(version.dotted());
    vec![root.join("bin").join("mongod"), root.join("mongod")]
}

/// Fully resolved description of one server launch.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub binary: Utf8PathBuf,
    pub bind_ip: String,
    pub port: u16,
    pub database_directory: Utf8PathBuf,
    pub auth_enabled: bool,
    pub journal: bool,
    pub storage_engine: Option<String>,
    pub unix_socket_prefix: Option<String>,
    pub ipv6: bool,
}

impl ServerSpec {
    /// Builds a spec from configuration plus the launch-time decisions
    /// (resolved binary, effective port, database directory).
    #[must_use]
    pub fn from_config(
        config: &Config,
        binary: Utf8PathBuf,
        port: u16,
        database_directory: Utf8PathBuf,
    ) -> Self {
        let bind_ip = config.bind_ip();
        let ipv6 = is_loopback_name(&bind_ip) && net::localhost_is_ipv6();
        Self {
            binary,
            bind_ip,
            port,
            database_directory,
            auth_enabled: config.auth_enabled,
            journal: config.journal,
            storage_engine: config.storage_engine.clone(),
            unix_socket_prefix: config.unix_socket_prefix.clone(),
            ipv6,
        }
    }

    /// Assembles the server's argument vector.
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        let mut args = vec![
            "--bind_ip".to_owned(),
            self.bind_ip.clone(),
            "--port".to_owned(),
            self.port.to_string(),
            "--dbpath".to_owned(),
            self.database_directory.to_string(),
        ];
        if self.auth_enabled {
            args.push("--auth".to_owned());
        }
        if !self.journal {
            args.push("--nojournal".to_owned());
        }
        if let Some(engine) = &self.storage_engine {
            args.push("--storageEngine".to_owned());
            args.push(engine.clone());
        }
        #[cfg(unix)]
        if let Some(prefix) = &self.unix_socket_prefix {
            args.push("--unixSocketPrefix".to_owned());
            args.push(prefix.clone());
        }
        if self.ipv6 {
            args.push("--ipv6".to_owned());
        }
        args
    }
}

fn is_loopback_name(bind_ip: &str) -> bool {
    matches!(bind_ip, "localhost" | "127.0.0.1" | "::1")
}

/// A launched server process with its output drain threads.
pub struct RunningServer {
    child: Child,
    drains: Vec<JoinHandle<()>>,
}

impl RunningServer {
    pub(crate) fn adopt(child: Child, drains: Vec<JoinHandle<()>>) -> Self {
        Self { child, drains }
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check.
    pub fn poll_exit(&mut self) -> Result<Option<ExitStatus>, EngineError> {
        self.child
            .try_wait()
            .map_err(|source| EngineError::Wait { source })
    }

    /// Stops the server: SIGTERM, bounded wait, then SIGKILL.
    ///
    /// The drain threads are joined after the process exits so the tail
    /// of the output reaches the sink before this returns.
    pub fn stop(mut self, grace: Duration) -> Result<ExitStatus, EngineError> {
        let pid = self.pid();
        if let Some(status) = self.poll_exit()? {
            self.join_drains();
            info!(target: ENGINE_TARGET, pid, %status, "server had already exited");
            return Ok(status);
        }
        info!(target: ENGINE_TARGET, pid, "stopping server");
        #[expect(
            clippy::cast_possible_wrap,
            reason = "process ids fit in i32 on supported platforms"
        )]
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|source| EngineError::Signal { pid, source })?;

        let deadline = Instant::now() + grace;
        let status = loop {
            if let Some(status) = self.poll_exit()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(
                    target: ENGINE_TARGET,
                    pid,
                    grace_secs = grace.as_secs(),
                    "server ignored SIGTERM; killing"
                );
                self.child
                    .kill()
                    .map_err(|source| EngineError::Wait { source })?;
                break self
                    .child
                    .wait()
                    .map_err(|source| EngineError::Wait { source })?;
            }
            thread::sleep(READY_POLL_INTERVAL);
        };

        self.join_drains();
        info!(target: ENGINE_TARGET, pid, %status, "server stopped");
        Ok(status)
    }

    fn join_drains(&mut self) {
        for drain in self.drains.drain(..) {
            if drain.join().is_err() {
                warn!(target: ENGINE_TARGET, "output drain thread panicked");
            }
        }
    }
}

/// Spawns the server process described by a [`ServerSpec`].
pub trait ServerLauncher: Send + Sync {
    fn launch(&self, spec: &ServerSpec, sink: &Arc<dyn LineSink>)
    -> Result<RunningServer, EngineError>;
}

/// Launches the real binary with piped output.
pub struct SystemLauncher;

impl ServerLauncher for SystemLauncher {
    fn launch(
        &self,
        spec: &ServerSpec,
        sink: &Arc<dyn LineSink>,
    ) -> Result<RunningServer, EngineError> {
        let args = spec.arguments();
        info!(
            target: ENGINE_TARGET,
            binary = %spec.binary,
            port = spec.port,
            "launching server"
        );
        debug!(target: ENGINE_TARGET, ?args, "server arguments");
        // Echo the full command line through the commands stream so the
        // configured log destination records what was launched.
        let command_line = format!("{} {}", spec.binary, args.join(" "));
        if let Err(error) = sink.write_line(StreamKind::Commands, &command_line) {
            warn!(
                target: ENGINE_TARGET,
                %error,
                "failed to record launch command line"
            );
        }
        let mut child = Command::new(spec.binary.as_std_path())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                binary: spec.binary.clone(),
                source,
            })?;
        let drains = route_child_output(&mut child, sink);
        Ok(RunningServer::adopt(child, drains))
    }
}

/// Blocks until the server accepts TCP connections or fails.
///
/// An early child exit short-circuits the wait with the exit status, so
/// a misconfigured launch surfaces immediately instead of burning the
/// whole startup timeout.
pub fn wait_until_ready(
    server: &mut RunningServer,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(), EngineError> {
    let deadline = Instant::now() + timeout;
    loop {
        if net::socket_is_reachable(host, port)? {
            return Ok(());
        }
        if let Some(status) = server.poll_exit()? {
            return Err(EngineError::ExitedDuringStartup { status });
        }
        if Instant::now() >= deadline {
            return Err(EngineError::NotReady {
                host: host.to_owned(),
                port,
                timeout_secs: timeout.as_secs(),
            });
        }
        thread::sleep(READY_POLL_INTERVAL);
    }
}

/// Resolves the database directory, creating a disposable one when the
/// configuration leaves it unset.
pub fn prepare_database_directory(
    config: &Config,
) -> Result<(Utf8PathBuf, Option<TempDir>), EngineError> {
    if let Some(path) = &config.database_directory {
        fs::create_dir_all(path.as_std_path()).map_err(|source| {
            EngineError::DatabaseDirectory {
                path: path.clone(),
                source,
            }
        })?;
        return Ok((path.clone(), None));
    }
    let temp = TempDir::with_prefix("mongard-data-").map_err(|source| {
        EngineError::DatabaseDirectory {
            path: Utf8PathBuf::from("<temp>"),
            source,
        }
    })?;
    let path = Utf8Path::from_path(temp.path())
        .ok_or_else(|| EngineError::NonUtf8DatabaseDirectory {
            path: temp.path().display().to_string(),
        })?
        .to_owned();
    Ok((path, Some(temp)))
}

/// A foreground server scoped to one task, torn down on drop.
///
/// Used by the bulk import harness, which needs a fresh server per
/// entry without going through the background supervisor.
pub struct ScopedServer {
    server: Option<RunningServer>,
    host: String,
    port: u16,
    // Keeps an engine-managed database directory alive for the server's
    // lifetime.
    _database_directory: Option<TempDir>,
}

impl ScopedServer {
    /// Launches a server and blocks until it is ready.
    pub fn start(
        config: &Config,
        resolver: &dyn DistributionResolver,
        launcher: &dyn ServerLauncher,
        port: u16,
        sink: &Arc<dyn LineSink>,
    ) -> Result<Self, EngineError> {
        let binary = resolver.resolve(&config.version())?;
        let (database_directory, temp) = prepare_database_directory(config)?;
        let spec = ServerSpec::from_config(config, binary, port, database_directory);
        let host = spec.bind_ip.clone();
        let mut server = launcher.launch(&spec, sink)?;
        if let Err(error) = wait_until_ready(&mut server, &host, port, STARTUP_TIMEOUT) {
            if let Err(stop_error) = server.stop(STOP_GRACE) {
                warn!(
                    target: ENGINE_TARGET,
                    error = %stop_error,
                    "failed to stop server after startup failure"
                );
            }
            return Err(error);
        }
        Ok(Self {
            server: Some(server),
            host,
            port,
            _database_directory: temp,
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops the server explicitly, reporting any shutdown error.
    pub fn stop(mut self) -> Result<(), EngineError> {
        if let Some(server) = self.server.take() {
            server.stop(STOP_GRACE)?;
        }
        Ok(())
    }
}

impl Drop for ScopedServer {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            if let Err(error) = server.stop(STOP_GRACE) {
                warn!(
                    target: ENGINE_TARGET,
                    %error,
                    "failed to stop scoped server during teardown"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base_spec() -> ServerSpec {
        ServerSpec {
            binary: Utf8PathBuf::from("/opt/mongod"),
            bind_ip: "127.0.0.1".to_owned(),
            port: 27017,
            database_directory: Utf8PathBuf::from("/var/lib/mongard"),
            auth_enabled: false,
            journal: false,
            storage_engine: None,
            unix_socket_prefix: None,
            ipv6: false,
        }
    }

    #[test]
    fn arguments_cover_the_baseline() {
        let args = base_spec().arguments();
        assert_eq!(
            args,
            vec![
                "--bind_ip",
                "127.0.0.1",
                "--port",
                "27017",
                "--dbpath",
                "/var/lib/mongard",
                "--nojournal",
            ]
        );
    }

    #[rstest]
    #[case::auth(
        ServerSpec { auth_enabled: true, ..base_spec() },
        "--auth",
        true
    )]
    #[case::journal_suppresses_nojournal(
        ServerSpec { journal: true, ..base_spec() },
        "--nojournal",
        false
    )]
    #[case::ipv6(
        ServerSpec { ipv6: true, ..base_spec() },
        "--ipv6",
        true
    )]
    fn arguments_reflect_flags(
        #[case] spec: ServerSpec,
        #[case] flag: &str,
        #[case] present: bool,
    ) {
        let args = spec.arguments();
        assert_eq!(args.iter().any(|arg| arg == flag), present);
    }

    #[test]
    fn arguments_include_storage_engine() {
        let spec = ServerSpec {
            storage_engine: Some("wiredTiger".to_owned()),
            ..base_spec()
        };
        let args = spec.arguments();
        let position = args
            .iter()
            .position(|arg| arg == "--storageEngine")
            .expect("storage engine flag");
        assert_eq!(args[position + 1], "wiredTiger");
    }

    #[cfg(unix)]
    #[test]
    fn arguments_include_unix_socket_prefix() {
        let spec = ServerSpec {
            unix_socket_prefix: Some("/tmp/mongard-sockets".to_owned()),
            ..base_spec()
        };
        let args = spec.arguments();
        let position = args
            .iter()
            .position(|arg| arg == "--unixSocketPrefix")
            .expect("socket prefix flag");
        assert_eq!(args[position + 1], "/tmp/mongard-sockets");
    }

    #[test]
    fn configured_override_wins_resolution() {
        let resolver = SystemDistributions {
            override_path: Some(Utf8PathBuf::from("/opt/custom/mongod")),
            download: Url::parse("http://fastdl.mongodb.org").expect("url"),
            proxy: None,
        };
        let path = resolver
            .resolve(&MongoVersion::parse("3.4.1"))
            .expect("resolve override");
        assert_eq!(path, Utf8PathBuf::from("/opt/custom/mongod"));
    }

    struct RecordingSink {
        lines: std::sync::Mutex<Vec<(StreamKind, String)>>,
    }

    impl LineSink for RecordingSink {
        fn write_line(&self, stream: StreamKind, line: &str) -> std::io::Result<()> {
            self.lines
                .lock()
                .map_err(|_| std::io::Error::other("poisoned"))?
                .push((stream, line.to_owned()));
            Ok(())
        }
    }

    #[test]
    fn launch_echoes_the_command_line_to_the_commands_stream() {
        let sink = Arc::new(RecordingSink {
            lines: std::sync::Mutex::new(Vec::new()),
        });
        let spec = ServerSpec {
            binary: Utf8PathBuf::from("/bin/true"),
            ..base_spec()
        };
        let dyn_sink: Arc<dyn LineSink> = sink.clone();
        let server = SystemLauncher
            .launch(&spec, &dyn_sink)
            .expect("launch stub binary");
        server
            .stop(Duration::from_secs(5))
            .expect("stop stub binary");
        let lines = sink.lines.lock().expect("lock");
        let command = lines
            .iter()
            .find(|(stream, _)| matches!(stream, StreamKind::Commands))
            .expect("command line recorded");
        assert!(command.1.starts_with("/bin/true --bind_ip"));
    }

    #[test]
    fn unknown_version_is_attempted_with_the_override() {
        let resolver = SystemDistributions {
            override_path: Some(Utf8PathBuf::from("/opt/custom/mongod")),
            download: Url::parse("http://fastdl.mongodb.org").expect("url"),
            proxy: None,
        };
        let version = MongoVersion::parse("9.9.9-nonexistent");
        assert!(!version.is_known());
        // Warned about, never rejected: resolution proceeds as for any
        // other version.
        let path = resolver.resolve(&version).expect("resolve unknown version");
        assert_eq!(path, Utf8PathBuf::from("/opt/custom/mongod"));
    }

    #[test]
    fn unprovisioned_version_names_the_search_locations() {
        let resolver = SystemDistributions {
            override_path: None,
            download: Url::parse("http://fastdl.mongodb.org").expect("url"),
            proxy: None,
        };
        // Only meaningful when no environment override is present.
        if env::var(MONGOD_ENV_OVERRIDE).is_ok() {
            return;
        }
        let error = resolver
            .resolve(&MongoVersion::parse("9.9.9-nonexistent"))
            .expect_err("unprovisioned version");
        let message = error.to_string();
        assert!(message.contains(MONGOD_ENV_OVERRIDE));
        assert!(message.contains("fastdl.mongodb.org"));
    }

    #[test]
    fn stop_terminates_a_stubborn_child_within_grace() {
        let child = Command::new("sh")
            .args(["-c", "sleep 30"])
            .stdin(Stdio::null())
            .spawn()
            .expect("spawn sleeper");
        let server = RunningServer::adopt(child, Vec::new());
        let status = server.stop(Duration::from_secs(5)).expect("stop sleeper");
        assert!(!status.success(), "terminated child reports failure status");
    }

    #[test]
    fn early_exit_is_reported_during_readiness_wait() {
        let child = Command::new("sh")
            .args(["-c", "exit 3"])
            .stdin(Stdio::null())
            .spawn()
            .expect("spawn failing child");
        let mut server = RunningServer::adopt(child, Vec::new());
        // Unreachable port: only the child exit can end the wait.
        let port = crate::net::allocate_random_port().expect("port");
        let error = wait_until_ready(&mut server, "127.0.0.1", port, Duration::from_secs(10))
            .expect_err("child exit surfaces");
        assert!(matches!(error, EngineError::ExitedDuringStartup { .. }));
    }

    #[test]
    fn temp_database_directory_is_created_when_unset() {
        let config = Config::default();
        let (path, temp) = prepare_database_directory(&config).expect("prepare");
        assert!(path.as_std_path().is_dir());
        assert!(temp.is_some(), "engine manages the directory lifetime");
    }
}
