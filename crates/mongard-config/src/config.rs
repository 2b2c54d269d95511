//! Layered harness configuration.
//!
//! Values merge from CLI flags, `MONGARD_*` environment variables, and an
//! optional `mongard.toml`, in that precedence order. Every parameter is
//! optional at the loading layer; built-in defaults are applied by the
//! accessor methods so both binaries resolve identical effective values.

use std::path::PathBuf;
use std::str::FromStr;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::defaults::{
    default_bind_ip, default_log_filter, DEFAULT_DOWNLOAD_PATH, DEFAULT_LOG_FILE, DEFAULT_PORT,
    DEFAULT_VERSION,
};
use crate::logging::{LogDestination, LogEncoding};
use crate::proxy::ProxySpec;
use crate::version::MongoVersion;

/// Harness configuration shared by the CLI and the supervisor.
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "MONGARD")]
pub struct Config {
    /// Skip the whole step without touching any process.
    #[serde(default)]
    pub skip: bool,
    /// Desired listening port for the managed server.
    pub port: Option<u16>,
    /// Allocate an ephemeral port and publish it for dependent steps.
    #[serde(default)]
    pub random_port: bool,
    /// MongoDB version to run, in free form (`2.2.1`, `v3.6.22`, ...).
    /// The CLI long is `--mongo-version`; `--version` is clap's global flag.
    #[ortho_config(cli_long = "mongo-version")]
    pub version: Option<String>,
    /// Block the start step until the managed server stops.
    #[serde(default)]
    pub wait: bool,
    /// Address the managed server binds to; defaults to loopback.
    pub bind_ip: Option<String>,
    /// Directory for the server's data files; engine-managed temp dir
    /// when unset.
    pub database_directory: Option<Utf8PathBuf>,
    /// Output routing mode for the managed server (console/file/none).
    pub logging: Option<String>,
    /// Shared log file used by the `file` routing mode.
    pub log_file: Option<Utf8PathBuf>,
    /// Text encoding for the shared log file.
    pub log_file_encoding: Option<String>,
    /// Base URL of the binary distribution mirror.
    pub download_path: Option<String>,
    /// Enable authorisation on the managed server.
    #[serde(default)]
    pub auth_enabled: bool,
    /// Unix socket prefix forwarded to the server (POSIX only).
    pub unix_socket_prefix: Option<String>,
    /// Enable journalling; disabled unless set.
    #[serde(default)]
    pub journal: bool,
    /// Storage engine name forwarded to the server.
    pub storage_engine: Option<String>,
    /// Runtime directory override for lifecycle artefacts.
    pub runtime_dir: Option<Utf8PathBuf>,
    /// Log filter expression for harness telemetry.
    pub log_filter: Option<String>,
    /// Fallback database for import entries without an explicit one.
    pub default_import_database: Option<String>,
    /// Accepted for compatibility; imports stay sequential.
    #[serde(default)]
    pub parallel: bool,
    /// Text encoding used when reading script sources.
    pub script_charset_encoding: Option<String>,
    /// Download proxy descriptor (configuration file only).
    pub proxy: Option<ProxySpec>,
    /// Override for the `mongod` binary resolved by the engine seam.
    pub mongod_binary: Option<Utf8PathBuf>,
    /// Override for the `mongoimport` binary.
    pub mongoimport_binary: Option<Utf8PathBuf>,
    /// Override for the mongo shell binary used to evaluate scripts.
    pub mongo_shell_binary: Option<Utf8PathBuf>,
}

impl Config {
    /// Loads configuration from the given CLI arguments plus the ambient
    /// environment and configuration file layers.
    ///
    /// # Errors
    ///
    /// Returns the loader's aggregated error when any layer fails to parse
    /// or merge.
    pub fn load_from_iter<I>(args: I) -> Result<Self, std::sync::Arc<ortho_config::OrthoError>>
    where
        I: IntoIterator,
        I::Item: Into<std::ffi::OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Desired port before random allocation or published-port override.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Parsed distribution version.
    #[must_use]
    pub fn version(&self) -> MongoVersion {
        MongoVersion::parse(self.version.as_deref().unwrap_or(DEFAULT_VERSION))
    }

    /// Bind address for the managed server.
    #[must_use]
    pub fn bind_ip(&self) -> String {
        self.bind_ip
            .clone()
            .filter(|address| !address.trim().is_empty())
            .unwrap_or_else(default_bind_ip)
    }

    /// Telemetry filter expression.
    #[must_use]
    pub fn log_filter(&self) -> String {
        self.log_filter
            .clone()
            .unwrap_or_else(|| default_log_filter().to_owned())
    }

    /// Output routing mode; unrecognised names are a fatal configuration
    /// error surfaced before any process is launched.
    pub fn log_destination(&self) -> Result<LogDestination, ConfigError> {
        match self.logging.as_deref() {
            None => Ok(LogDestination::Console),
            Some(name) => {
                LogDestination::from_str(name).map_err(|_| ConfigError::UnknownLogDestination {
                    value: name.to_owned(),
                })
            }
        }
    }

    /// Shared log file path; blank values are a fatal configuration error.
    pub fn log_file(&self) -> Result<Utf8PathBuf, ConfigError> {
        match &self.log_file {
            None => Ok(Utf8PathBuf::from(DEFAULT_LOG_FILE)),
            Some(path) if path.as_str().trim().is_empty() => Err(ConfigError::BlankLogFile),
            Some(path) => Ok(path.clone()),
        }
    }

    /// Encoding for the shared log file.
    pub fn log_file_encoding(&self) -> Result<LogEncoding, ConfigError> {
        parse_encoding(self.log_file_encoding.as_deref())
    }

    /// Encoding for script sources; platform default (utf-8) when unset.
    pub fn script_encoding(&self) -> Result<LogEncoding, ConfigError> {
        parse_encoding(self.script_charset_encoding.as_deref())
    }

    /// Distribution mirror base URL.
    pub fn download_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .download_path
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_DOWNLOAD_PATH);
        Url::parse(raw).map_err(|source| ConfigError::InvalidDownloadPath {
            value: raw.to_owned(),
            source,
        })
    }

    /// Runtime directory override as a std path.
    #[must_use]
    pub fn runtime_dir(&self) -> Option<PathBuf> {
        self.runtime_dir
            .as_ref()
            .map(|path| path.as_std_path().to_path_buf())
    }

    /// Proxy applying to the configured download URL, if any.
    pub fn download_proxy(&self) -> Result<Option<&ProxySpec>, ConfigError> {
        let url = self.download_url()?;
        Ok(self
            .proxy
            .as_ref()
            .filter(|proxy| proxy.applies_to(&url)))
    }
}

fn parse_encoding(value: Option<&str>) -> Result<LogEncoding, ConfigError> {
    match value {
        None => Ok(LogEncoding::Utf8),
        Some(name) => LogEncoding::from_str(name).map_err(|_| ConfigError::UnknownEncoding {
            value: name.to_owned(),
        }),
    }
}

/// Fatal configuration errors, raised before any external process is
/// touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown logging mode '{value}'; expected console, file, or none")]
    UnknownLogDestination { value: String },
    #[error("logFile must not be blank when file logging is selected")]
    BlankLogFile,
    #[error("unknown text encoding '{value}'; expected utf-8, utf-16le, utf-16be, or latin-1")]
    UnknownEncoding { value: String },
    #[error("download path '{value}' is not a valid URL: {source}")]
    InvalidDownloadPath {
        value: String,
        #[source]
        source: url::ParseError,
    },
}
