//! Interface to the transport layer.
//!
//! The transport owns connection establishment, framing, and reconnection;
//! the request processor only ever calls back through this narrow trait to
//! deliver responses and errors. Implementations must be safe under
//! concurrent calls, since non-blocking tasks send from their own threads.

use serde_json::Value;
use thiserror::Error;

use drover_modules::ActionRequest;

/// Transport-layer send failure.
#[derive(Debug, Error)]
#[error("connection failure: {message}")]
pub struct ConnectionError {
    /// Description of the transport failure.
    pub message: String,
}

impl ConnectionError {
    /// Creates a connection error with the given description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Callbacks into the transport layer.
pub trait Connector: Send + Sync {
    /// Sends the results of a blocking request inline on the response
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the transport cannot deliver.
    fn send_blocking_response(
        &self,
        request: &ActionRequest,
        results: &Value,
    ) -> Result<(), ConnectionError>;

    /// Pushes the outcome of a completed non-blocking transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the transport cannot deliver.
    fn send_non_blocking_response(
        &self,
        request: &ActionRequest,
        results: &Value,
        transaction_id: &str,
    ) -> Result<(), ConnectionError>;

    /// Acknowledges acceptance of a non-blocking request before execution.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the transport cannot deliver.
    fn send_provisional_response(&self, request: &ActionRequest) -> Result<(), ConnectionError>;

    /// Delivers an application-level error for a well-formed request.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the transport cannot deliver.
    fn send_rpc_error(
        &self,
        request: &ActionRequest,
        description: &str,
    ) -> Result<(), ConnectionError>;

    /// Delivers a protocol-level error when the envelope itself could not
    /// be turned into a request.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the transport cannot deliver.
    fn send_transport_error(
        &self,
        id: &str,
        description: &str,
        endpoints: &[String],
    ) -> Result<(), ConnectionError>;
}
