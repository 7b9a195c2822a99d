//! Platform defaults shared by the agent binaries.

use std::env;

use camino::Utf8PathBuf;

#[cfg(unix)]
use libc::geteuid;

use crate::logging::LogFormat;

/// Default tracing filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default tracing filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::default()
}

/// Computes the default spool directory for per-transaction results.
///
/// Prefers the user's local data directory; falls back to a uid-namespaced
/// directory under the system temp directory so unprivileged users never
/// collide.
#[must_use]
pub fn default_spool_dir() -> Utf8PathBuf {
    let mut base = data_base_directory();
    base.push("drover");
    base.push("spool");
    base
}

#[cfg(unix)]
fn data_base_directory() -> Utf8PathBuf {
    if let Some(dir) = dirs::data_local_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
    {
        return dir;
    }
    let mut dir = fallback_base_directory();
    dir.push(user_namespace());
    dir
}

#[cfg(not(unix))]
fn data_base_directory() -> Utf8PathBuf {
    dirs::data_local_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(fallback_base_directory)
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}
