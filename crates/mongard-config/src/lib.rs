//! Shared configuration for the mongard harness.
//!
//! The CLI and the supervisor daemon both consume this crate so they agree
//! on parameter names, defaults, runtime artefact locations, and the shape
//! of the on-disk handle record that carries state between build steps.

mod config;
mod defaults;
mod handle;
mod import;
mod logging;
mod proxy;
mod runtime;
mod version;

pub use config::{Config, ConfigError};
pub use defaults::{
    DEFAULT_DOWNLOAD_PATH, DEFAULT_LOG_FILE, DEFAULT_PORT, DEFAULT_VERSION, default_bind_ip,
    default_log_filter, default_runtime_directory,
};
pub use handle::{HandleRecord, HandleRecordError, HandleStatus};
pub use import::{ImportEntry, ImportManifest, ImportManifestError, DEFAULT_IMPORT_TIMEOUT_MS};
pub use logging::{EncodingError, LogDestination, LogEncoding};
pub use proxy::{ProxyParseError, ProxySpec};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use version::{KnownVersion, MongoVersion};
