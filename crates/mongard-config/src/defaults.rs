//! Built-in defaults shared by the CLI and the supervisor.

use std::env;
use std::path::PathBuf;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

/// Default port the managed server listens on.
pub const DEFAULT_PORT: u16 = 27017;

/// Default MongoDB version when none is configured.
pub const DEFAULT_VERSION: &str = "2.2.1";

/// Default shared log file used by the `file` output routing mode.
pub const DEFAULT_LOG_FILE: &str = "embedmongo.log";

/// Default distribution mirror for binary downloads.
pub const DEFAULT_DOWNLOAD_PATH: &str = "http://fastdl.mongodb.org";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    "info"
}

/// Default bind address for the managed server: the loopback interface.
pub fn default_bind_ip() -> String {
    String::from("127.0.0.1")
}

/// Computes the default runtime directory housing lifecycle artefacts.
///
/// Prefers the per-user runtime directory; falls back to a uid-namespaced
/// subdirectory of the system temp dir so concurrent users never share
/// lock or handle files.
pub fn default_runtime_directory() -> PathBuf {
    #[cfg(unix)]
    {
        if let Some(mut dir) = runtime_dir() {
            dir.push("mongard");
            return dir;
        }
        let mut dir = env::temp_dir();
        dir.push("mongard");
        dir.push(format!("uid-{}", unsafe { geteuid() }));
        dir
    }

    #[cfg(not(unix))]
    {
        let mut dir = env::temp_dir();
        dir.push("mongard");
        dir
    }
}
