//! Shared configuration for the drover agent.
//!
//! The agent daemon and any companion tooling need to agree on where the
//! spool lives, where executable modules are discovered, and how logging is
//! set up. This crate owns the [`Config`] type, its layered loading through
//! `ortho_config` (command line over environment over configuration file),
//! and the platform defaults for the directories involved.

mod defaults;
mod logging;

use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{default_log_filter, default_spool_dir};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved agent configuration.
///
/// Fields are public so tests and embedders can build a configuration with
/// struct-update syntax from [`Config::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DROVER")]
pub struct Config {
    /// Directory holding per-transaction durable results.
    #[serde(default = "defaults::default_spool_dir")]
    pub spool_dir: Utf8PathBuf,

    /// Directory scanned for external module executables. When absent no
    /// external modules are loaded.
    #[serde(default)]
    pub modules_dir: Option<Utf8PathBuf>,

    /// Directory holding `<module>.conf` JSON configuration files.
    #[serde(default)]
    pub modules_config_dir: Option<Utf8PathBuf>,

    /// Tracing filter expression, e.g. `info` or `droverd=debug`.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,

    /// Output format for structured logs.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spool_dir: defaults::default_spool_dir(),
            modules_dir: None,
            modules_config_dir: None,
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment and arguments.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any configuration layer is
    /// malformed.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads the configuration from an explicit argument iterator.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any configuration layer is
    /// malformed.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Returns the configured tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Creates the spool directory when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolPreparationError`] when the directory cannot be
    /// created.
    pub fn prepare_spool(&self) -> Result<(), SpoolPreparationError> {
        fs::create_dir_all(self.spool_dir.as_std_path()).map_err(|source| {
            SpoolPreparationError {
                path: self.spool_dir.clone(),
                source,
            }
        })
    }
}

/// Error raised while creating the spool directory.
#[derive(Debug, Error)]
#[error("failed to prepare spool directory '{path}': {source}")]
pub struct SpoolPreparationError {
    /// Directory that could not be created.
    pub path: Utf8PathBuf,
    /// Underlying filesystem error.
    #[source]
    pub source: std::io::Error,
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn default_config_has_non_empty_spool() {
        let config = Config::default();
        assert!(!config.spool_dir.as_str().is_empty());
        assert!(config.modules_dir.is_none());
        assert_eq!(config.log_filter(), default_log_filter());
    }

    #[test]
    fn prepare_spool_creates_missing_directory() {
        let temp = TempDir::new().expect("create temp dir");
        let spool = temp.path().join("nested").join("spool");
        let config = Config {
            spool_dir: Utf8PathBuf::from_path_buf(spool.clone()).expect("utf8 path"),
            ..Config::default()
        };

        config.prepare_spool().expect("prepare spool");
        assert!(spool.is_dir());
    }

    #[test]
    fn prepare_spool_is_idempotent() {
        let temp = TempDir::new().expect("create temp dir");
        let config = Config {
            spool_dir: Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8 path"),
            ..Config::default()
        };

        config.prepare_spool().expect("first prepare");
        config.prepare_spool().expect("second prepare");
    }
}
