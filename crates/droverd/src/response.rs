//! Action response construction and rendering.
//!
//! A response is created from a request in the `running` state, transitions
//! exactly once to `success` or `failure`, and is then rendered either to
//! the wire or into the transaction's durable metadata. Every mutating
//! transition re-validates the metadata against a fixed schema; a violation
//! is a programmer error surfaced as [`ResponseError`].

use chrono::{SecondsFormat, Utc};
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde_json::{Value, json};
use thiserror::Error;

use drover_modules::{ActionRequest, ModuleKind, RawOutput, RequestKind};

pub(crate) const REQUESTER: &str = "requester";
pub(crate) const MODULE: &str = "module";
pub(crate) const ACTION: &str = "action";
pub(crate) const REQUEST_PARAMS: &str = "request_params";
pub(crate) const TRANSACTION_ID: &str = "transaction_id";
pub(crate) const REQUEST_ID: &str = "request_id";
pub(crate) const NOTIFY_OUTCOME: &str = "notify_outcome";
pub(crate) const START: &str = "start";
pub(crate) const STATUS: &str = "status";
pub(crate) const END: &str = "end";
pub(crate) const RESULTS: &str = "results";
pub(crate) const RESULTS_ARE_VALID: &str = "results_are_valid";
pub(crate) const EXECUTION_ERROR: &str = "execution_error";

static METADATA_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema = json!({
        "type": "object",
        "required": [
            REQUESTER, MODULE, ACTION, REQUEST_PARAMS, TRANSACTION_ID,
            REQUEST_ID, NOTIFY_OUTCOME, START, STATUS,
        ],
        "properties": {
            REQUESTER: {"type": "string"},
            MODULE: {"type": "string"},
            ACTION: {"type": "string"},
            REQUEST_PARAMS: {"type": "string"},
            TRANSACTION_ID: {"type": "string"},
            REQUEST_ID: {"type": "string"},
            NOTIFY_OUTCOME: {"type": "boolean"},
            START: {"type": "string"},
            STATUS: {"enum": ["running", "success", "failure"]},
            END: {"type": "string"},
            RESULTS_ARE_VALID: {"type": "boolean"},
            EXECUTION_ERROR: {"type": "string"},
        },
    });
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("response metadata schema compiles")
});

/// Lifecycle state recorded in the response metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// Execution has been accepted but has not finished.
    Running,
    /// Execution finished and produced valid results.
    Success,
    /// Execution failed or produced invalid results.
    Failure,
}

impl ActionStatus {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Wire shape selected when rendering a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Inline results for a blocking request.
    Blocking,
    /// Pushed results for a completed non-blocking transaction.
    NonBlocking,
    /// Status-query output including captured process streams.
    StatusOutput,
    /// Application-level error report.
    RpcError,
}

/// Errors raised by response transitions and rendering.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The metadata no longer conforms to the response schema.
    #[error("action response metadata is invalid: {message}")]
    InvalidMetadata {
        /// Validation error details.
        message: String,
    },

    /// A field required by the requested wire shape is absent.
    #[error("response is missing '{field}' required for this wire shape")]
    MissingField {
        /// Name of the absent metadata field.
        field: &'static str,
    },
}

/// Structured response assembled from a request.
#[derive(Debug, Clone)]
pub struct ActionResponse {
    module_kind: ModuleKind,
    request_kind: RequestKind,
    status: ActionStatus,
    output: RawOutput,
    metadata: Value,
}

impl ActionResponse {
    /// Creates a `running` response pre-populated from the request.
    #[must_use]
    pub fn from_request(module_kind: ModuleKind, request: &ActionRequest) -> Self {
        let request_params = if request.params_text().is_empty() {
            "none"
        } else {
            request.params_text()
        };
        let metadata = json!({
            REQUESTER: request.sender(),
            MODULE: request.module(),
            ACTION: request.action(),
            REQUEST_PARAMS: request_params,
            TRANSACTION_ID: request.transaction_id(),
            REQUEST_ID: request.id(),
            NOTIFY_OUTCOME: request.notify_outcome(),
            START: iso8601_now(),
            STATUS: ActionStatus::Running.as_str(),
        });
        Self {
            module_kind,
            request_kind: request.kind(),
            status: ActionStatus::Running,
            output: RawOutput::default(),
            metadata,
        }
    }

    /// Returns the originating module kind.
    #[must_use]
    pub const fn module_kind(&self) -> ModuleKind {
        self.module_kind
    }

    /// Returns the originating request kind.
    #[must_use]
    pub const fn request_kind(&self) -> RequestKind {
        self.request_kind
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ActionStatus {
        self.status
    }

    /// Returns the response metadata object.
    #[must_use]
    pub const fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Records the captured process output for status rendering.
    pub fn set_output(&mut self, output: RawOutput) {
        self.output = output;
    }

    /// Transitions to `success`, recording the results and optionally an
    /// execution error (e.g. a failed outcome notification).
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidMetadata`] when the transition leaves
    /// the metadata schema-invalid; this indicates a programming error.
    pub fn mark_success(
        &mut self,
        results: Value,
        execution_error: Option<&str>,
    ) -> Result<(), ResponseError> {
        let fields = self.metadata_mut();
        fields.insert(END.into(), json!(iso8601_now()));
        fields.insert(RESULTS_ARE_VALID.into(), json!(true));
        fields.insert(RESULTS.into(), results);
        fields.insert(STATUS.into(), json!(ActionStatus::Success.as_str()));
        if let Some(error) = execution_error.filter(|error| !error.is_empty()) {
            fields.insert(EXECUTION_ERROR.into(), json!(error));
        }
        self.status = ActionStatus::Success;
        self.ensure_valid()
    }

    /// Transitions to `failure`, recording the execution error.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidMetadata`] when the transition leaves
    /// the metadata schema-invalid; this indicates a programming error.
    pub fn mark_failure(&mut self, execution_error: &str) -> Result<(), ResponseError> {
        let fields = self.metadata_mut();
        fields.insert(END.into(), json!(iso8601_now()));
        fields.insert(RESULTS_ARE_VALID.into(), json!(false));
        fields.insert(EXECUTION_ERROR.into(), json!(execution_error));
        fields.insert(STATUS.into(), json!(ActionStatus::Failure.as_str()));
        self.status = ActionStatus::Failure;
        self.ensure_valid()
    }

    /// Returns `true` when the metadata conforms to the response schema.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        METADATA_SCHEMA.is_valid(&self.metadata)
    }

    /// Renders the response for the requested wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError`] when the metadata is schema-invalid or a
    /// field the shape requires has not been recorded yet.
    pub fn to_wire(&self, kind: ResponseKind) -> Result<Value, ResponseError> {
        self.ensure_valid()?;
        let transaction_id = &self.metadata[TRANSACTION_ID];

        match kind {
            ResponseKind::Blocking | ResponseKind::NonBlocking => {
                let results = self
                    .metadata
                    .get(RESULTS)
                    .ok_or(ResponseError::MissingField { field: RESULTS })?;
                Ok(json!({
                    TRANSACTION_ID: transaction_id,
                    RESULTS: results,
                }))
            }
            ResponseKind::StatusOutput => Ok(json!({
                TRANSACTION_ID: transaction_id,
                STATUS: self.status.as_str(),
                "stdout": self.output.stdout,
                "stderr": self.output.stderr,
                "exitcode": self.output.exitcode,
            })),
            ResponseKind::RpcError => {
                let description = self
                    .metadata
                    .get(EXECUTION_ERROR)
                    .ok_or(ResponseError::MissingField {
                        field: EXECUTION_ERROR,
                    })?;
                Ok(json!({
                    "id": self.metadata[REQUEST_ID],
                    "description": description,
                }))
            }
        }
    }

    fn metadata_mut(&mut self) -> &mut serde_json::Map<String, Value> {
        self.metadata
            .as_object_mut()
            .expect("response metadata is always a JSON object")
    }

    fn ensure_valid(&self) -> Result<(), ResponseError> {
        if let Err(errors) = METADATA_SCHEMA.validate(&self.metadata) {
            let message = errors
                .map(|error| error.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ResponseError::InvalidMetadata { message });
        }
        Ok(())
    }
}

/// Returns `true` when a metadata document read back from disk conforms to
/// the response schema. Used by the status-query path and tests.
#[must_use]
pub fn is_valid_metadata(metadata: &Value) -> bool {
    METADATA_SCHEMA.is_valid(metadata)
}

fn iso8601_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use drover_modules::{ChunkData, ParsedChunks};

    use super::*;

    fn request(kind: RequestKind) -> ActionRequest {
        let chunks = ParsedChunks {
            envelope: json!({"id": "msg-9", "sender": "client-endpoint"}),
            data: ChunkData::Json(json!({
                "transaction_id": "tx-9",
                "module": "reverse",
                "action": "string",
                "notify_outcome": true,
                "argument": "maradona",
            })),
            debug: Vec::new(),
        };
        ActionRequest::new(kind, chunks).expect("request")
    }

    #[test]
    fn from_request_populates_running_metadata() {
        let response = ActionResponse::from_request(ModuleKind::External, &request(RequestKind::NonBlocking));

        assert_eq!(response.status(), ActionStatus::Running);
        assert!(response.is_valid());
        let metadata = response.metadata();
        assert_eq!(metadata[REQUESTER], json!("client-endpoint"));
        assert_eq!(metadata[MODULE], json!("reverse"));
        assert_eq!(metadata[ACTION], json!("string"));
        assert_eq!(metadata[TRANSACTION_ID], json!("tx-9"));
        assert_eq!(metadata[REQUEST_ID], json!("msg-9"));
        assert_eq!(metadata[NOTIFY_OUTCOME], json!(true));
        assert_eq!(metadata[STATUS], json!("running"));
        assert!(metadata.get(END).is_none());
    }

    #[test]
    fn mark_success_records_results_and_end() {
        let mut response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::NonBlocking));
        response
            .mark_success(json!("anodaram"), None)
            .expect("transition");

        assert_eq!(response.status(), ActionStatus::Success);
        let metadata = response.metadata();
        assert_eq!(metadata[STATUS], json!("success"));
        assert_eq!(metadata[RESULTS_ARE_VALID], json!(true));
        assert_eq!(metadata[RESULTS], json!("anodaram"));
        assert!(metadata.get(END).is_some());
        assert!(metadata.get(EXECUTION_ERROR).is_none());
    }

    #[test]
    fn mark_success_keeps_transport_error_note() {
        let mut response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::NonBlocking));
        response
            .mark_success(json!({}), Some("failed to send outcome notification"))
            .expect("transition");

        assert_eq!(
            response.metadata()[EXECUTION_ERROR],
            json!("failed to send outcome notification")
        );
        assert_eq!(response.metadata()[STATUS], json!("success"));
    }

    #[test]
    fn mark_failure_records_error_and_invalid_results() {
        let mut response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::NonBlocking));
        response
            .mark_failure("failed to execute: exited with status 3")
            .expect("transition");

        let metadata = response.metadata();
        assert_eq!(metadata[STATUS], json!("failure"));
        assert_eq!(metadata[RESULTS_ARE_VALID], json!(false));
        assert!(metadata.get(RESULTS).is_none());
        assert!(
            metadata[EXECUTION_ERROR]
                .as_str()
                .expect("string")
                .contains("status 3")
        );
    }

    #[test]
    fn blocking_wire_shape_carries_transaction_and_results() {
        let mut response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::Blocking));
        response
            .mark_success(json!("anodaram"), None)
            .expect("transition");

        let wire = response.to_wire(ResponseKind::Blocking).expect("render");
        assert_eq!(wire, json!({"transaction_id": "tx-9", "results": "anodaram"}));
    }

    #[test]
    fn wire_shape_without_results_is_an_error() {
        let response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::Blocking));
        let error = response
            .to_wire(ResponseKind::Blocking)
            .expect_err("running response has no results");
        assert!(matches!(error, ResponseError::MissingField { .. }));
    }

    #[test]
    fn status_output_includes_captured_streams() {
        let mut response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::NonBlocking));
        response.set_output(RawOutput {
            stdout: String::from("\"anodaram\"\n"),
            stderr: String::from("warning: slow\n"),
            exitcode: 0,
        });

        let wire = response.to_wire(ResponseKind::StatusOutput).expect("render");
        assert_eq!(wire["status"], json!("running"));
        assert_eq!(wire["exitcode"], json!(0));
        assert_eq!(wire["stderr"], json!("warning: slow\n"));
    }

    #[test]
    fn rpc_error_shape_uses_request_id_and_description() {
        let mut response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::Blocking));
        response.mark_failure("unknown module: nope").expect("transition");

        let wire = response.to_wire(ResponseKind::RpcError).expect("render");
        assert_eq!(wire, json!({"id": "msg-9", "description": "unknown module: nope"}));
    }

    #[rstest]
    #[case::blocking(ResponseKind::Blocking)]
    #[case::non_blocking(ResponseKind::NonBlocking)]
    #[case::status(ResponseKind::StatusOutput)]
    #[case::rpc_error(ResponseKind::RpcError)]
    fn rendered_shapes_round_trip_as_json(#[case] kind: ResponseKind) {
        let mut response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::NonBlocking));
        response
            .mark_success(json!({"outcome": 1}), Some("note"))
            .expect("transition");

        let wire = response.to_wire(kind).expect("render");
        let reparsed: Value =
            serde_json::from_str(&wire.to_string()).expect("wire output is valid JSON");
        assert_eq!(reparsed, wire);
    }

    #[test]
    fn disk_metadata_roundtrip_stays_schema_valid() {
        let mut response =
            ActionResponse::from_request(ModuleKind::External, &request(RequestKind::NonBlocking));
        response.mark_success(json!({}), None).expect("transition");

        let text = response.metadata().to_string();
        let reparsed: Value = serde_json::from_str(&text).expect("parse");
        assert!(is_valid_metadata(&reparsed));
    }
}
