//! Durable per-transaction results storage.
//!
//! Every accepted non-blocking request gets a directory under the spool
//! named after its transaction id, holding a `metadata` file from the
//! moment the request is accepted (so a crashed transaction remains
//! discoverable) and, after execution, the captured `stdout`, `stderr`, and
//! `exitcode`. Result files are staged as hidden temp files inside the
//! transaction directory and renamed into place, so the status-query path
//! never observes a partial file and operators scanning the spool can tell
//! in-flight staging files from finished results.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::Builder;
use thiserror::Error;
use tracing::debug;

use drover_modules::{ActionRequest, ModuleKind, RawOutput};

use crate::mutex_table::{MutexTableError, TransactionMutexTable};
use crate::response::ActionResponse;

/// Tracing target for spool operations.
const SPOOL_TARGET: &str = "droverd::spool";

/// File name of the durable transaction metadata.
const METADATA_FILE: &str = "metadata";

/// Result files are group-readable: the spool is the interface operators
/// inspect when a transaction needs a post-mortem.
#[cfg(unix)]
const SPOOL_FILE_MODE: u32 = 0o640;

/// Errors raised by the results store.
#[derive(Debug, Error)]
pub enum ResultsStoreError {
    /// The transaction id cannot be used as a path component.
    #[error("transaction id '{transaction_id}' is not a safe path component")]
    UnsafeTransactionId {
        /// Offending transaction id.
        transaction_id: String,
    },

    /// The request reached the store without an assigned results directory.
    #[error("no results directory assigned for transaction '{transaction_id}'")]
    MissingResultsDir {
        /// Transaction id of the offending request.
        transaction_id: String,
    },

    /// The results directory could not be created.
    #[error("failed to create results directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// A result file could not be written.
    #[error("failed to write '{path}': {source}")]
    Write {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// The transaction mutex could not be registered.
    #[error("failed to register the transaction mutex: {0}")]
    Mutex(#[from] MutexTableError),
}

/// Computes the results directory for a transaction.
///
/// Transaction ids are client-supplied and treated as opaque path
/// components; ids containing path separators or `..` are rejected.
///
/// # Errors
///
/// Returns [`ResultsStoreError::UnsafeTransactionId`] for unusable ids.
pub fn transaction_results_dir(
    spool_dir: &Path,
    transaction_id: &str,
) -> Result<PathBuf, ResultsStoreError> {
    if transaction_id.is_empty()
        || transaction_id.contains(['/', '\\'])
        || transaction_id.contains("..")
    {
        return Err(ResultsStoreError::UnsafeTransactionId {
            transaction_id: transaction_id.to_owned(),
        });
    }
    Ok(spool_dir.join(transaction_id))
}

/// Per-transaction on-disk results store.
///
/// Owned by exactly one background task; cross-task access to the metadata
/// file goes through the per-transaction mutex.
#[derive(Debug)]
pub struct ResultsStore {
    transaction_id: String,
    directory: PathBuf,
    metadata_path: PathBuf,
}

impl ResultsStore {
    /// Initialises storage for the request's transaction.
    ///
    /// Creates the results directory when missing, registers the
    /// transaction mutex, and writes the initial `running` metadata. When a
    /// metadata file already exists (a duplicate transaction id), the
    /// existing file is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ResultsStoreError`] when the directory or metadata file
    /// cannot be created or the mutex cannot be registered; a failed
    /// initialisation leaves no mutex entry behind.
    pub fn new(
        request: &ActionRequest,
        mutexes: &TransactionMutexTable,
    ) -> Result<Self, ResultsStoreError> {
        let transaction_id = request.transaction_id().to_owned();
        let directory = request
            .results_dir()
            .ok_or_else(|| ResultsStoreError::MissingResultsDir {
                transaction_id: transaction_id.clone(),
            })?
            .to_path_buf();

        if !directory.exists() {
            debug!(
                target: SPOOL_TARGET,
                module = request.module(),
                action = request.action(),
                transaction = %transaction_id,
                directory = %directory.display(),
                "creating results directory"
            );
            fs::create_dir_all(&directory).map_err(|source| ResultsStoreError::CreateDirectory {
                path: directory.clone(),
                source,
            })?;
        }

        // The mutex is registered before the first metadata write; no task
        // is running yet, so the write itself does not take it.
        mutexes.add(&transaction_id)?;

        let store = Self {
            metadata_path: directory.join(METADATA_FILE),
            transaction_id,
            directory,
        };

        if store.metadata_path.exists() {
            debug!(
                target: SPOOL_TARGET,
                transaction = %store.transaction_id,
                "metadata already present, leaving the earlier file in place"
            );
        } else {
            let initial = ActionResponse::from_request(ModuleKind::External, request);
            let payload = format!("{}\n", initial.metadata());
            if let Err(error) = store.persist(METADATA_FILE, payload.as_bytes()) {
                // Roll back the registration so a rejected transaction
                // leaves no mutex entry behind.
                let _ = mutexes.remove(&store.transaction_id);
                return Err(error);
            }
        }

        Ok(store)
    }

    /// Returns the transaction this store belongs to.
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Returns the results directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Writes the final metadata for the transaction.
    ///
    /// Merges `completed`, `duration`, `exitcode`, and `exec_error` into
    /// the response metadata and persists atomically. The caller holds the
    /// per-transaction mutex.
    ///
    /// # Errors
    ///
    /// Returns [`ResultsStoreError::Write`] on filesystem failure; the
    /// caller is expected to log and proceed.
    pub fn write_metadata(
        &self,
        response: &ActionResponse,
        exitcode: i32,
        exec_error: &str,
        duration: Duration,
    ) -> Result<(), ResultsStoreError> {
        let mut metadata = response.metadata().clone();
        let fields = metadata
            .as_object_mut()
            .expect("response metadata is always a JSON object");
        fields.insert("completed".into(), serde_json::json!(true));
        fields.insert(
            "duration".into(),
            serde_json::json!(format!("{:.3} s", duration.as_secs_f64())),
        );
        fields.insert("exitcode".into(), serde_json::json!(exitcode));
        fields.insert("exec_error".into(), serde_json::json!(exec_error));

        self.persist(METADATA_FILE, format!("{metadata}\n").as_bytes())
    }

    /// Persists the captured process output of an external action.
    ///
    /// # Errors
    ///
    /// Returns [`ResultsStoreError::Write`] on the first file that fails.
    pub fn write_output(&self, output: &RawOutput) -> Result<(), ResultsStoreError> {
        self.persist("stdout", output.stdout.as_bytes())?;
        self.persist("stderr", output.stderr.as_bytes())?;
        self.persist("exitcode", format!("{}\n", output.exitcode).as_bytes())
    }

    /// Persists one result file atomically.
    ///
    /// The payload is staged as a hidden `.{name}-*.tmp` file inside the
    /// transaction directory, flushed, and renamed over the target. On
    /// Unix the directory entry is synced afterwards so a crash right
    /// after the rename cannot lose it.
    fn persist(&self, name: &str, contents: &[u8]) -> Result<(), ResultsStoreError> {
        let path = self.directory.join(name);
        self.stage_and_rename(&path, name, contents)
            .map_err(|source| ResultsStoreError::Write { path, source })?;

        #[cfg(unix)]
        if let Err(error) = fs::File::open(&self.directory).and_then(|dir| dir.sync_all()) {
            debug!(
                target: SPOOL_TARGET,
                transaction = %self.transaction_id,
                error = %error,
                "could not sync the results directory entry"
            );
        }
        Ok(())
    }

    fn stage_and_rename(&self, path: &Path, name: &str, contents: &[u8]) -> io::Result<()> {
        let staging_prefix = format!(".{name}-");
        let mut builder = Builder::new();
        builder.prefix(&staging_prefix).suffix(".tmp");
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(Permissions::from_mode(SPOOL_FILE_MODE));
        }

        let mut file = builder.tempfile_in(&self.directory)?;
        file.write_all(contents)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|error| error.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use drover_modules::{ChunkData, ParsedChunks, RequestKind};

    use crate::response::is_valid_metadata;

    use super::*;

    fn request_with_results_dir(spool: &Path, transaction_id: &str) -> ActionRequest {
        let chunks = ParsedChunks {
            envelope: json!({"id": "msg-1", "sender": "client"}),
            data: ChunkData::Json(json!({
                "transaction_id": transaction_id,
                "module": "reverse",
                "action": "string",
                "notify_outcome": false,
                "argument": "maradona",
            })),
            debug: Vec::new(),
        };
        let mut request = ActionRequest::new(RequestKind::NonBlocking, chunks).expect("request");
        let dir = transaction_results_dir(spool, transaction_id).expect("results dir");
        request.set_results_dir(dir);
        request
    }

    fn read_metadata(store: &ResultsStore) -> Value {
        let text = fs::read_to_string(store.directory().join("metadata")).expect("read metadata");
        serde_json::from_str(&text).expect("parse metadata")
    }

    #[rstest]
    #[case::slash("a/b")]
    #[case::backslash("a\\b")]
    #[case::parent("..")]
    #[case::embedded_parent("a..b")]
    #[case::empty("")]
    fn rejects_unsafe_transaction_ids(#[case] transaction_id: &str) {
        let error = transaction_results_dir(Path::new("/spool"), transaction_id)
            .expect_err("unsafe id should be rejected");
        assert!(matches!(
            error,
            ResultsStoreError::UnsafeTransactionId { .. }
        ));
    }

    #[test]
    fn accepts_opaque_transaction_ids() {
        let dir = transaction_results_dir(Path::new("/spool"), "tx-001_A.9").expect("safe id");
        assert_eq!(dir, Path::new("/spool/tx-001_A.9"));
    }

    #[test]
    fn init_writes_running_metadata_and_registers_mutex() {
        let temp = TempDir::new().expect("temp dir");
        let mutexes = TransactionMutexTable::new();
        let request = request_with_results_dir(temp.path(), "tx-1");

        let store = ResultsStore::new(&request, &mutexes).expect("store");

        assert!(mutexes.contains("tx-1"));
        let metadata = read_metadata(&store);
        assert_eq!(metadata["status"], json!("running"));
        assert_eq!(metadata["transaction_id"], json!("tx-1"));
        assert!(is_valid_metadata(&metadata));
    }

    #[test]
    fn init_preserves_existing_metadata() {
        let temp = TempDir::new().expect("temp dir");
        let mutexes = TransactionMutexTable::new();
        let request = request_with_results_dir(temp.path(), "tx-1");

        let directory = request.results_dir().expect("dir").to_path_buf();
        fs::create_dir_all(&directory).expect("pre-create directory");
        fs::write(directory.join("metadata"), "{\"marker\":1}\n").expect("pre-seed metadata");

        let store = ResultsStore::new(&request, &mutexes).expect("store");
        let metadata = read_metadata(&store);
        assert_eq!(metadata, json!({"marker": 1}));
    }

    #[test]
    fn write_metadata_merges_completion_fields() {
        let temp = TempDir::new().expect("temp dir");
        let mutexes = TransactionMutexTable::new();
        let request = request_with_results_dir(temp.path(), "tx-1");
        let store = ResultsStore::new(&request, &mutexes).expect("store");

        let mut response = ActionResponse::from_request(ModuleKind::External, &request);
        response.mark_failure("failed to execute").expect("transition");
        store
            .write_metadata(&response, 3, "failed to execute", Duration::from_millis(1500))
            .expect("write metadata");

        let metadata = read_metadata(&store);
        assert_eq!(metadata["status"], json!("failure"));
        assert_eq!(metadata["completed"], json!(true));
        assert_eq!(metadata["exitcode"], json!(3));
        assert_eq!(metadata["duration"], json!("1.500 s"));
        assert_eq!(metadata["exec_error"], json!("failed to execute"));
        assert!(is_valid_metadata(&metadata));
    }

    #[test]
    fn write_output_persists_process_streams() {
        let temp = TempDir::new().expect("temp dir");
        let mutexes = TransactionMutexTable::new();
        let request = request_with_results_dir(temp.path(), "tx-1");
        let store = ResultsStore::new(&request, &mutexes).expect("store");

        store
            .write_output(&RawOutput {
                stdout: String::from("\"anodaram\"\n"),
                stderr: String::from("warning\n"),
                exitcode: 3,
            })
            .expect("write output");

        let directory = store.directory();
        assert_eq!(
            fs::read_to_string(directory.join("stdout")).expect("stdout"),
            "\"anodaram\"\n"
        );
        assert_eq!(
            fs::read_to_string(directory.join("stderr")).expect("stderr"),
            "warning\n"
        );
        assert_eq!(
            fs::read_to_string(directory.join("exitcode")).expect("exitcode"),
            "3\n"
        );
    }

    #[test]
    fn repeated_metadata_writes_replace_the_file() {
        let temp = TempDir::new().expect("temp dir");
        let mutexes = TransactionMutexTable::new();
        let request = request_with_results_dir(temp.path(), "tx-1");
        let store = ResultsStore::new(&request, &mutexes).expect("store");

        let mut response = ActionResponse::from_request(ModuleKind::External, &request);
        response.mark_failure("first attempt").expect("transition");
        store
            .write_metadata(&response, 1, "first attempt", Duration::from_secs(1))
            .expect("first write");
        store
            .write_metadata(&response, 1, "second attempt", Duration::from_secs(2))
            .expect("second write");

        let metadata = read_metadata(&store);
        assert_eq!(metadata["exec_error"], json!("second attempt"));
        assert_eq!(metadata["duration"], json!("2.000 s"));
    }

    #[test]
    fn staging_leaves_no_temporary_files_behind() {
        let temp = TempDir::new().expect("temp dir");
        let mutexes = TransactionMutexTable::new();
        let request = request_with_results_dir(temp.path(), "tx-1");
        let store = ResultsStore::new(&request, &mutexes).expect("store");

        store
            .write_output(&RawOutput {
                stdout: String::from("out"),
                stderr: String::new(),
                exitcode: 0,
            })
            .expect("write output");

        let mut names: Vec<String> = fs::read_dir(store.directory())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["exitcode", "metadata", "stderr", "stdout"]);
    }

    #[cfg(unix)]
    #[test]
    fn result_files_are_group_readable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("temp dir");
        let mutexes = TransactionMutexTable::new();
        let request = request_with_results_dir(temp.path(), "tx-1");
        let store = ResultsStore::new(&request, &mutexes).expect("store");

        let mode = fs::metadata(store.directory().join("metadata"))
            .expect("metadata attributes")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, SPOOL_FILE_MODE);
    }

    #[test]
    fn missing_results_dir_is_an_error() {
        let chunks = ParsedChunks {
            envelope: json!({"id": "msg-1", "sender": "client"}),
            data: ChunkData::Json(json!({
                "transaction_id": "tx-1",
                "module": "reverse",
                "action": "string",
                "notify_outcome": false,
            })),
            debug: Vec::new(),
        };
        let request = ActionRequest::new(RequestKind::NonBlocking, chunks).expect("request");
        let mutexes = TransactionMutexTable::new();

        let error = ResultsStore::new(&request, &mutexes).expect_err("no results dir");
        assert!(matches!(error, ResultsStoreError::MissingResultsDir { .. }));
        assert!(!mutexes.contains("tx-1"));
    }

    #[test]
    fn failed_initial_write_rolls_back_the_mutex() {
        let temp = TempDir::new().expect("temp dir");
        let mutexes = TransactionMutexTable::new();
        let request = request_with_results_dir(temp.path(), "tx-1");

        // A plain file where the results directory should be makes the
        // metadata write fail regardless of the user running the tests.
        let directory = request.results_dir().expect("dir").to_path_buf();
        fs::write(&directory, b"not a directory").expect("pre-create blocking file");

        let error = ResultsStore::new(&request, &mutexes).expect_err("write should fail");
        assert!(matches!(error, ResultsStoreError::Write { .. }));
        assert!(!mutexes.contains("tx-1"));
    }
}
