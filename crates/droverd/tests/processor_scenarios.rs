//! End-to-end request processor scenarios.
//!
//! A recording connector stands in for the transport, and a shell-script
//! module exercises the external execution contract. Each scenario drives
//! `process_request` directly and observes the connector events and the
//! durable spool state.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use serde_json::{Value, json};
use tempfile::TempDir;

use drover_config::Config;
use drover_modules::{ActionRequest, ChunkData, ParsedChunks, RequestKind};
use droverd::{ConnectionError, Connector, RequestProcessor, is_valid_metadata};

const TEST_MODULE: &str = r#"#!/bin/sh
case "$1" in
  metadata)
    cat <<'EOF'
{"description":"test module","actions":[{"name":"string","input":{"type":"object","properties":{"argument":{"type":"string"}},"required":["argument"]},"output":{"type":"string"}},{"name":"delayed_action","input":{"type":"object"},"output":{"type":"object"}},{"name":"broken","input":{"type":"object"},"output":{}}]}
EOF
    ;;
  string)
    payload=$(cat)
    argument=$(printf '%s' "$payload" | sed -n 's/.*"argument"[[:space:]]*:[[:space:]]*"\([^"]*\)".*/\1/p')
    reversed=""
    while [ -n "$argument" ]; do
      rest=${argument#?}
      reversed="${argument%"$rest"}$reversed"
      argument=$rest
    done
    printf '"%s"\n' "$reversed"
    ;;
  delayed_action)
    cat >/dev/null
    sleep 0.2
    printf '{"done":true}\n'
    ;;
  broken)
    cat >/dev/null
    exit 3
    ;;
esac
"#;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Blocking {
        results: Value,
    },
    NonBlocking {
        transaction_id: String,
        results: Value,
    },
    Provisional {
        transaction_id: String,
    },
    RpcError {
        description: String,
    },
    TransportError {
        id: String,
        description: String,
    },
}

#[derive(Debug, Default)]
struct RecordingConnector {
    events: Mutex<Vec<Event>>,
}

impl RecordingConnector {
    fn record(&self, event: Event) {
        self.events.lock().expect("events lock").push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().expect("events lock").clone()
    }
}

impl Connector for RecordingConnector {
    fn send_blocking_response(
        &self,
        _request: &ActionRequest,
        results: &Value,
    ) -> Result<(), ConnectionError> {
        self.record(Event::Blocking {
            results: results.clone(),
        });
        Ok(())
    }

    fn send_non_blocking_response(
        &self,
        _request: &ActionRequest,
        results: &Value,
        transaction_id: &str,
    ) -> Result<(), ConnectionError> {
        self.record(Event::NonBlocking {
            transaction_id: transaction_id.to_owned(),
            results: results.clone(),
        });
        Ok(())
    }

    fn send_provisional_response(&self, request: &ActionRequest) -> Result<(), ConnectionError> {
        self.record(Event::Provisional {
            transaction_id: request.transaction_id().to_owned(),
        });
        Ok(())
    }

    fn send_rpc_error(
        &self,
        _request: &ActionRequest,
        description: &str,
    ) -> Result<(), ConnectionError> {
        self.record(Event::RpcError {
            description: description.to_owned(),
        });
        Ok(())
    }

    fn send_transport_error(
        &self,
        id: &str,
        description: &str,
        _endpoints: &[String],
    ) -> Result<(), ConnectionError> {
        self.record(Event::TransportError {
            id: id.to_owned(),
            description: description.to_owned(),
        });
        Ok(())
    }
}

struct Harness {
    _temp: TempDir,
    spool: PathBuf,
    connector: Arc<RecordingConnector>,
    processor: RequestProcessor<RecordingConnector>,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let spool = temp.path().join("spool");
        let modules = temp.path().join("modules");
        fs::create_dir_all(&modules).expect("create modules dir");
        write_module(&modules, "reverse", TEST_MODULE);

        let config = Config {
            spool_dir: Utf8PathBuf::from_path_buf(spool.clone()).expect("utf8 path"),
            modules_dir: Some(
                Utf8PathBuf::from_path_buf(modules).expect("utf8 path"),
            ),
            ..Config::default()
        };

        let connector = Arc::new(RecordingConnector::default());
        let processor =
            RequestProcessor::new(Arc::clone(&connector), &config).expect("processor");

        Self {
            _temp: temp,
            spool,
            connector,
            processor,
        }
    }

    fn send(&self, kind: RequestKind, chunks: ParsedChunks) {
        self.processor.process_request(kind, chunks);
    }

    fn metadata(&self, transaction_id: &str) -> Value {
        let path = self.spool.join(transaction_id).join("metadata");
        let text = fs::read_to_string(path).expect("read metadata");
        serde_json::from_str(&text).expect("parse metadata")
    }

    fn spool_entry_exists(&self, transaction_id: &str) -> bool {
        self.spool.join(transaction_id).exists()
    }
}

fn write_module(dir: &Path, name: &str, script: &str) {
    let path = dir.join(name);
    fs::write(&path, script).expect("write module script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("make executable");
}

fn chunks(module: &str, action: &str, transaction_id: &str, notify: bool) -> ParsedChunks {
    ParsedChunks {
        envelope: json!({"id": format!("msg-{transaction_id}"), "sender": "test-client"}),
        data: ChunkData::Json(json!({
            "transaction_id": transaction_id,
            "module": module,
            "action": action,
            "notify_outcome": notify,
            "argument": "maradona",
        })),
        debug: Vec::new(),
    }
}

#[test]
fn blocking_request_answers_inline_without_spool_entry() {
    let harness = Harness::new();
    harness.send(
        RequestKind::Blocking,
        chunks("reverse", "string", "tx-b1", false),
    );
    harness.processor.drain();

    let events = harness.connector.events();
    assert_eq!(
        events,
        vec![Event::Blocking {
            results: json!("anodaram")
        }]
    );
    assert!(!harness.spool_entry_exists("tx-b1"));
}

#[test]
fn non_blocking_request_acknowledges_then_notifies() {
    let harness = Harness::new();
    harness.send(
        RequestKind::NonBlocking,
        chunks("reverse", "delayed_action", "tx-001", true),
    );
    harness.processor.drain();

    let events = harness.connector.events();
    let provisional = events
        .iter()
        .position(|event| matches!(event, Event::Provisional { transaction_id } if transaction_id == "tx-001"))
        .expect("provisional response sent");
    let notification = events
        .iter()
        .position(|event| matches!(event, Event::NonBlocking { transaction_id, .. } if transaction_id == "tx-001"))
        .expect("outcome notification sent");
    assert!(
        provisional < notification,
        "provisional response must precede the outcome notification"
    );

    let metadata = harness.metadata("tx-001");
    assert_eq!(metadata["status"], json!("success"));
    assert_eq!(metadata["results_are_valid"], json!(true));
    assert_eq!(metadata["completed"], json!(true));
    assert_eq!(metadata["results"], json!({"done": true}));
    assert!(is_valid_metadata(&metadata));

    // The mutex entry is removed on completion, so a status query after the
    // fact does not contend for a lock.
    assert!(!harness.processor.mutexes().contains("tx-001"));
}

#[test]
fn unknown_module_is_an_rpc_error_without_spool_entry() {
    let harness = Harness::new();
    harness.send(
        RequestKind::NonBlocking,
        chunks("nope", "string", "tx-unknown", false),
    );
    harness.processor.drain();

    let events = harness.connector.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::RpcError { description } if description.contains("unknown module")
    ));
    assert!(!harness.spool_entry_exists("tx-unknown"));
}

#[test]
fn failing_action_records_failure_metadata() {
    let harness = Harness::new();
    harness.send(
        RequestKind::NonBlocking,
        chunks("reverse", "broken", "tx-broken", false),
    );
    harness.processor.drain();

    let events = harness.connector.events();
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Provisional { transaction_id } if transaction_id == "tx-broken"
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::RpcError { description } if description.contains("status 3")
    )));

    let metadata = harness.metadata("tx-broken");
    assert_eq!(metadata["status"], json!("failure"));
    assert_eq!(metadata["results_are_valid"], json!(false));
    assert_eq!(metadata["exitcode"], json!(3));
    assert!(
        !metadata["exec_error"]
            .as_str()
            .expect("exec_error string")
            .is_empty()
    );
    assert!(is_valid_metadata(&metadata));

    let stdout = fs::read_to_string(harness.spool.join("tx-broken").join("stdout"))
        .expect("stdout file");
    assert!(stdout.is_empty());
    let exitcode = fs::read_to_string(harness.spool.join("tx-broken").join("exitcode"))
        .expect("exitcode file");
    assert_eq!(exitcode, "3\n");
}

#[test]
fn malformed_envelope_is_a_transport_error() {
    let harness = Harness::new();
    let malformed = ParsedChunks {
        envelope: json!({"id": "msg-1"}),
        data: ChunkData::Json(json!({
            "transaction_id": "tx-bad",
            "module": "reverse",
            "action": "string",
            "notify_outcome": false,
            "argument": "maradona",
        })),
        debug: Vec::new(),
    };
    harness.send(RequestKind::NonBlocking, malformed);
    harness.processor.drain();

    let events = harness.connector.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::TransportError { id, description }
            if id == "msg-1" && description.contains("sender")
    ));
    assert!(!harness.spool_entry_exists("tx-bad"));
}

#[test]
fn builtin_echo_answers_blocking_requests() {
    let harness = Harness::new();
    harness.send(RequestKind::Blocking, chunks("echo", "echo", "tx-echo", false));
    harness.processor.drain();

    assert_eq!(
        harness.connector.events(),
        vec![Event::Blocking {
            results: json!({"outcome": "maradona"})
        }]
    );
}

#[test]
fn internal_module_rejects_non_blocking_requests() {
    let harness = Harness::new();
    harness.send(
        RequestKind::NonBlocking,
        chunks("echo", "echo", "tx-echo-nb", false),
    );
    harness.processor.drain();

    let events = harness.connector.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::RpcError { description } if description.contains("supports only blocking")
    ));
    assert!(!harness.spool_entry_exists("tx-echo-nb"));
}

#[test]
fn schema_rejection_is_an_rpc_error() {
    let harness = Harness::new();
    let mut invalid = chunks("reverse", "string", "tx-params", false);
    if let ChunkData::Json(data) = &mut invalid.data {
        data.as_object_mut().expect("object").remove("argument");
    }
    harness.send(RequestKind::Blocking, invalid);
    harness.processor.drain();

    let events = harness.connector.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::RpcError { description } if description.contains("invalid input")
    ));
}

#[test]
fn unknown_action_is_an_rpc_error() {
    let harness = Harness::new();
    harness.send(
        RequestKind::Blocking,
        chunks("reverse", "transmogrify", "tx-action", false),
    );
    harness.processor.drain();

    let events = harness.connector.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::RpcError { description } if description.contains("unknown action")
    ));
}

#[test]
fn unsafe_transaction_id_is_rejected_before_storage() {
    let harness = Harness::new();
    harness.send(
        RequestKind::NonBlocking,
        chunks("reverse", "string", "../evil", false),
    );
    harness.processor.drain();

    let events = harness.connector.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::RpcError { .. }));
    assert!(!harness.processor.mutexes().contains("../evil"));
    assert!(!harness.spool.join("evil").exists());
}

#[test]
fn duplicate_transaction_ids_converge_on_one_completed_metadata() {
    let harness = Harness::new();
    harness.send(
        RequestKind::NonBlocking,
        chunks("reverse", "delayed_action", "tx-dup", false),
    );
    harness.send(
        RequestKind::NonBlocking,
        chunks("reverse", "delayed_action", "tx-dup", false),
    );
    harness.processor.drain();

    let provisionals = harness
        .connector
        .events()
        .iter()
        .filter(|event| matches!(event, Event::Provisional { transaction_id } if transaction_id == "tx-dup"))
        .count();
    assert_eq!(provisionals, 2);

    let metadata = harness.metadata("tx-dup");
    assert_eq!(metadata["status"], json!("success"));
    assert_eq!(metadata["completed"], json!(true));
    assert!(is_valid_metadata(&metadata));
}

#[test]
fn silent_transactions_skip_the_outcome_notification() {
    let harness = Harness::new();
    harness.send(
        RequestKind::NonBlocking,
        chunks("reverse", "delayed_action", "tx-silent", false),
    );
    harness.processor.drain();

    let events = harness.connector.events();
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Provisional { transaction_id } if transaction_id == "tx-silent"
    )));
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::NonBlocking { .. })));

    let metadata = harness.metadata("tx-silent");
    assert_eq!(metadata["status"], json!("success"));
}
