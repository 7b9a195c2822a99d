//! Log pipeline setup for the agent daemon.
//!
//! The agent shares its process with module subprocess plumbing, so all
//! telemetry goes to stderr; stdout stays free for embedding hosts. JSON
//! output is the default so the non-blocking task trail (request id,
//! transaction id, spool paths) lands in log stacks as fields rather than
//! prose. Timestamps use the same RFC 3339 shape as the `start` and `end`
//! fields written to spool metadata, so operators can correlate a log line
//! with a transaction's durable record directly.

use std::io::{self, IsTerminal};

use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, fmt};

use drover_config::{Config, LogFormat};

/// Tracing target for telemetry setup.
const TELEMETRY_TARGET: &str = "droverd::telemetry";

/// Marker returned once the log pipeline is ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring the log pipeline.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// The expression as configured.
        filter: String,
        /// Parse error details.
        message: String,
    },
}

/// Sets up the global log pipeline from the agent configuration.
///
/// Safe to call more than once: when a subscriber is already active (an
/// earlier bootstrap, or a host embedding the request processor with its
/// own telemetry) the established pipeline is kept.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when the configured filter
/// expression cannot be parsed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    let filter =
        EnvFilter::try_new(config.log_filter()).map_err(|error| TelemetryError::Filter {
            filter: config.log_filter().to_owned(),
            message: error.to_string(),
        })?;

    match config.log_format() {
        LogFormat::Json => install(json_subscriber(filter)),
        LogFormat::Compact => install(compact_subscriber(filter)),
    }
    Ok(TelemetryHandle)
}

/// JSON lines on stderr with events flattened for ingestion. Never
/// colourised: JSON sinks are not terminals.
fn json_subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync {
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_ansi(false)
        .json()
        .flatten_event(true)
        .finish()
}

/// Single-line output for interactive runs; colour only when stderr is a
/// terminal.
fn compact_subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync {
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_ansi(io::stderr().is_terminal())
        .compact()
        .finish()
}

fn install(subscriber: impl Subscriber + Send + Sync + 'static) {
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Another subscriber won the installation race or the embedding
        // host brought its own; the message lands on whichever pipeline
        // is active.
        tracing::debug!(
            target: TELEMETRY_TARGET,
            "a log pipeline is already installed, keeping it"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_keeps_the_first_pipeline() {
        let config = Config::default();
        let first = initialise(&config).expect("first initialise");
        let second = initialise(&config).expect("second initialise");
        drop(first);
        drop(second);
    }

    #[test]
    fn invalid_filter_expression_is_rejected() {
        let config = Config {
            log_filter: String::from("droverd=loud"),
            ..Config::default()
        };
        let error = initialise(&config).expect_err("invalid filter");
        assert!(matches!(error, TelemetryError::Filter { .. }));
    }

    #[test]
    fn both_formats_build_subscribers() {
        let json = json_subscriber(EnvFilter::new("info"));
        let compact = compact_subscriber(EnvFilter::new("info"));
        drop(json);
        drop(compact);
    }
}
