//! Parsed transport chunks and the immutable action request.
//!
//! The transport layer hands the agent already-parsed message chunks; this
//! module turns them into a typed [`ActionRequest`]. Extraction of the
//! required envelope and data fields happens once, at construction, so the
//! request is immutable afterwards apart from the results directory the
//! processor assigns to non-blocking requests before dispatch.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Whether a request blocks the caller until results are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Results are returned inline on the response connection.
    Blocking,
    /// A provisional acknowledgement is returned immediately; results are
    /// persisted to the spool and optionally pushed later.
    NonBlocking,
}

impl RequestKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::NonBlocking => "non-blocking",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the data chunk.
#[derive(Debug, Clone)]
pub enum ChunkData {
    /// A structured JSON payload.
    Json(Value),
    /// A raw binary payload. Not supported by the request processor.
    Binary(Vec<u8>),
}

/// Message chunks parsed by the transport layer.
#[derive(Debug, Clone)]
pub struct ParsedChunks {
    /// Envelope metadata; carries at least `id` and `sender`.
    pub envelope: Value,
    /// Request data payload.
    pub data: ChunkData,
    /// Debug entries accumulated by intermediate hops.
    pub debug: Vec<Value>,
}

/// Errors raised while constructing an [`ActionRequest`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// The data chunk carried a binary payload.
    #[error("binary request payloads are not supported")]
    BinaryPayload,

    /// A required field was absent.
    #[error("missing required field '{field}' in the {section} chunk")]
    MissingField {
        /// Chunk the field belongs to.
        section: &'static str,
        /// Name of the absent field.
        field: &'static str,
    },

    /// A required field was present but empty.
    #[error("field '{field}' in the {section} chunk must not be empty")]
    EmptyField {
        /// Chunk the field belongs to.
        section: &'static str,
        /// Name of the empty field.
        field: &'static str,
    },

    /// A required field had the wrong JSON type.
    #[error("field '{field}' in the {section} chunk must be a {expected}")]
    WrongType {
        /// Chunk the field belongs to.
        section: &'static str,
        /// Name of the offending field.
        field: &'static str,
        /// Expected JSON type.
        expected: &'static str,
    },
}

/// Immutable value representing one parsed inbound request.
///
/// All envelope and data fields are extracted and validated when the request
/// is constructed; `params_text` is the canonical serialization of the data
/// payload, computed once up front.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    kind: RequestKind,
    id: String,
    sender: String,
    transaction_id: String,
    module: String,
    action: String,
    notify_outcome: bool,
    params: Value,
    params_text: String,
    chunks: ParsedChunks,
    results_dir: Option<PathBuf>,
}

impl ActionRequest {
    /// Builds a request from parsed chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the data chunk is binary or a required
    /// envelope or data field is missing, empty, or mistyped.
    pub fn new(kind: RequestKind, chunks: ParsedChunks) -> Result<Self, RequestError> {
        let id = required_string("envelope", &chunks.envelope, "id")?;
        let sender = required_string("envelope", &chunks.envelope, "sender")?;

        let data = match &chunks.data {
            ChunkData::Json(value) => value,
            ChunkData::Binary(_) => return Err(RequestError::BinaryPayload),
        };

        let transaction_id = required_string("data", data, "transaction_id")?;
        let module = required_string("data", data, "module")?;
        let action = required_string("data", data, "action")?;
        let notify_outcome = required_bool("data", data, "notify_outcome")?;

        let params = data.clone();
        let params_text = params.to_string();

        Ok(Self {
            kind,
            id,
            sender,
            transaction_id,
            module,
            action,
            notify_outcome,
            params,
            params_text,
            chunks,
            results_dir: None,
        })
    }

    /// Returns the request kind.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Returns the message identifier from the envelope.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the origin endpoint from the envelope.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Returns the client-supplied transaction identifier.
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Returns the requested module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Returns the requested action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Whether a completion message should be pushed for a non-blocking
    /// request.
    #[must_use]
    pub const fn notify_outcome(&self) -> bool {
        self.notify_outcome
    }

    /// Returns the action parameters (the data payload).
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Returns the canonical text serialization of the parameters.
    #[must_use]
    pub fn params_text(&self) -> &str {
        &self.params_text
    }

    /// Returns the parsed chunks retained for debugging.
    #[must_use]
    pub const fn chunks(&self) -> &ParsedChunks {
        &self.chunks
    }

    /// Returns the results directory assigned for non-blocking dispatch.
    #[must_use]
    pub fn results_dir(&self) -> Option<&Path> {
        self.results_dir.as_deref()
    }

    /// Assigns the results directory; called exactly once by the request
    /// processor before a non-blocking request is dispatched.
    pub fn set_results_dir(&mut self, dir: PathBuf) {
        debug_assert!(
            self.results_dir.is_none(),
            "results directory assigned twice"
        );
        self.results_dir = Some(dir);
    }
}

fn required_string(
    section: &'static str,
    value: &Value,
    field: &'static str,
) -> Result<String, RequestError> {
    match value.get(field) {
        None => Err(RequestError::MissingField { section, field }),
        Some(Value::String(text)) if text.is_empty() => {
            Err(RequestError::EmptyField { section, field })
        }
        Some(Value::String(text)) => Ok(text.clone()),
        Some(_) => Err(RequestError::WrongType {
            section,
            field,
            expected: "string",
        }),
    }
}

fn required_bool(
    section: &'static str,
    value: &Value,
    field: &'static str,
) -> Result<bool, RequestError> {
    match value.get(field) {
        None => Err(RequestError::MissingField { section, field }),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(_) => Err(RequestError::WrongType {
            section,
            field,
            expected: "boolean",
        }),
    }
}
