//! Agent bootstrap orchestration.
//!
//! Bootstrapping loads the configuration, installs telemetry, prepares the
//! spool directory, and constructs the request processor with its module
//! registry. Configuration loading sits behind the [`ConfigLoader`] trait so
//! tests can inject a fixed configuration without touching the process
//! environment.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;
use tracing::info;

use drover_config::{Config, SpoolPreparationError};

use crate::connector::Connector;
use crate::processor::{ProcessorError, RequestProcessor};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Tracing target for bootstrap events.
const BOOTSTRAP_TARGET: &str = "droverd::bootstrap";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the agent configuration.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when the configuration layers
    /// are malformed.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that always returns the supplied configuration clone.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Builds a loader that always returns the provided configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Spool preparation failed.
    #[error("failed to prepare the spool directory: {source}")]
    Spool {
        /// Filesystem error reported while preparing the spool.
        #[source]
        source: SpoolPreparationError,
    },
    /// The request processor could not be constructed.
    #[error("failed to construct the request processor: {source}")]
    Processor {
        /// Underlying processor error.
        #[source]
        source: ProcessorError,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Agent<C> {
    config: Config,
    processor: RequestProcessor<C>,
    telemetry: TelemetryHandle,
}

impl<C> Agent<C> {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the request processor.
    #[must_use]
    pub fn processor(&self) -> &RequestProcessor<C> {
        &self.processor
    }

    /// Consumes the agent and returns the processor for shared use.
    #[must_use]
    pub fn into_processor(self) -> RequestProcessor<C> {
        self.processor
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }
}

/// Bootstraps the agent using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] naming the first stage that failed.
pub fn bootstrap_with<C: Connector + 'static>(
    loader: &dyn ConfigLoader,
    connector: Arc<C>,
) -> Result<Agent<C>, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;

    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    config
        .prepare_spool()
        .map_err(|source| BootstrapError::Spool { source })?;

    let processor = RequestProcessor::new(connector, &config)
        .map_err(|source| BootstrapError::Processor { source })?;

    info!(
        target: BOOTSTRAP_TARGET,
        spool = %config.spool_dir,
        modules = processor.modules().len(),
        "agent bootstrap complete"
    );

    Ok(Agent {
        config,
        processor,
        telemetry,
    })
}
