//! Top-level request orchestration.
//!
//! The processor accepts parsed message chunks from the transport, turns
//! them into an [`ActionRequest`], validates the content against the module
//! registry, and dispatches. Blocking requests execute on the caller's
//! thread and answer inline; non-blocking requests register durable results
//! storage, run on a worker thread, and acknowledge with a provisional
//! response. Failure handling follows a fixed taxonomy: envelope failures
//! become transport errors, content failures become RPC errors, and
//! post-execution failures of a non-blocking task are recorded in the
//! transaction's durable metadata.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use drover_config::Config;
use drover_modules::{
    ActionRequest, AgentModule, ExternalModule, ModuleError, ModuleKind, ModuleRegistry,
    ParsedChunks, RequestKind, SchemaError,
};

use crate::builtin;
use crate::connector::Connector;
use crate::mutex_table::TransactionMutexTable;
use crate::pool::{PoolError, WorkerPool};
use crate::response::ActionResponse;
use crate::spool::{ResultsStore, ResultsStoreError, transaction_results_dir};

/// Tracing target for request processing.
const PROCESSOR_TARGET: &str = "droverd::processor";

/// File extension of module configuration files.
const MODULE_CONFIG_EXTENSION: &str = "conf";

/// Errors raised while validating and dispatching a request.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The requested module is not registered.
    #[error("unknown module: {module}")]
    UnknownModule {
        /// Module that was requested.
        module: String,
    },

    /// The requested action is not exposed by the module.
    #[error("unknown action '{action}' for module '{module}'")]
    UnknownAction {
        /// Module that was requested.
        module: String,
        /// Action that was requested.
        action: String,
    },

    /// A non-blocking request targeted an internal module.
    #[error("the module '{module}' supports only blocking requests")]
    BlockingOnly {
        /// Module that was requested.
        module: String,
    },

    /// The request parameters failed the action's input schema.
    #[error("invalid input for '{module} {action}': {reason}")]
    InvalidParams {
        /// Module that was requested.
        module: String,
        /// Action that was requested.
        action: String,
        /// Validation error details.
        reason: String,
    },

    /// A built-in module failed to register.
    #[error("failed to register a built-in module: {0}")]
    Builtin(#[source] SchemaError),

    /// Module execution failed.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Results storage could not be initialised.
    #[error("failed to initialize result files: {0}")]
    Store(#[from] ResultsStoreError),

    /// The background task could not be started.
    #[error("failed to start action task: {0}")]
    TaskSpawn(#[from] PoolError),
}

/// Orchestrator for inbound requests.
///
/// Safe for concurrent use: the transport may call
/// [`RequestProcessor::process_request`] from several threads at once.
#[derive(Debug)]
pub struct RequestProcessor<C> {
    connector: Arc<C>,
    spool_dir: PathBuf,
    modules: ModuleRegistry,
    mutexes: Arc<TransactionMutexTable>,
    pool: WorkerPool,
}

impl<C: Connector + 'static> RequestProcessor<C> {
    /// Builds a processor, loading internal modules and scanning the
    /// configured modules directory for external ones.
    ///
    /// A module that fails to load is logged and skipped; the remaining
    /// modules stay available. A missing modules directory is a warning,
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Builtin`] when a built-in module cannot be
    /// registered.
    pub fn new(connector: Arc<C>, config: &Config) -> Result<Self, ProcessorError> {
        let modules_config = load_modules_configuration(
            config
                .modules_config_dir
                .as_ref()
                .map(|dir| dir.as_std_path()),
        );

        let mut modules = ModuleRegistry::new();
        modules.register(builtin::echo_module().map_err(ProcessorError::Builtin)?);

        if let Some(dir) = &config.modules_dir {
            load_external_modules(&mut modules, dir.as_std_path(), &modules_config);
        } else {
            warn!(
                target: PROCESSOR_TARGET,
                "the modules directory was not provided; no external module will be loaded"
            );
        }

        log_loaded_modules(&modules);

        Ok(Self {
            connector,
            spool_dir: config.spool_dir.as_std_path().to_path_buf(),
            modules,
            mutexes: Arc::new(TransactionMutexTable::new()),
            pool: WorkerPool::new("action-executor"),
        })
    }

    /// Returns the module registry.
    #[must_use]
    pub const fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Returns the transaction mutex table shared with the status-query
    /// path.
    #[must_use]
    pub fn mutexes(&self) -> Arc<TransactionMutexTable> {
        Arc::clone(&self.mutexes)
    }

    /// Awaits all in-flight non-blocking tasks. Called on shutdown.
    pub fn drain(&self) {
        self.pool.drain();
    }

    /// Validates and dispatches one inbound request.
    ///
    /// Never returns an error to the caller: every failure is reported to
    /// the requester through the connector and logged.
    pub fn process_request(&self, kind: RequestKind, chunks: ParsedChunks) {
        let envelope_id = chunk_field(&chunks.envelope, "id");
        let envelope_sender = chunk_field(&chunks.envelope, "sender");

        let request = match ActionRequest::new(kind, chunks) {
            Ok(request) => request,
            Err(request_error) => {
                error!(
                    target: PROCESSOR_TARGET,
                    id = %envelope_id,
                    sender = %envelope_sender,
                    error = %request_error,
                    "invalid request message"
                );
                let endpoints = [envelope_sender];
                if let Err(send_error) = self.connector.send_transport_error(
                    &envelope_id,
                    &request_error.to_string(),
                    &endpoints,
                ) {
                    error!(
                        target: PROCESSOR_TARGET,
                        id = %envelope_id,
                        error = %send_error,
                        "failed to send transport error"
                    );
                }
                return;
            }
        };

        info!(
            target: PROCESSOR_TARGET,
            kind = %request.kind(),
            id = request.id(),
            sender = request.sender(),
            transaction = request.transaction_id(),
            "processing request"
        );

        let module = match self.validate_request(&request) {
            Ok(module) => module,
            Err(validation_error) => {
                error!(
                    target: PROCESSOR_TARGET,
                    kind = %request.kind(),
                    id = request.id(),
                    transaction = request.transaction_id(),
                    error = %validation_error,
                    "invalid request"
                );
                self.send_rpc_error(&request, &validation_error.to_string());
                return;
            }
        };

        debug!(
            target: PROCESSOR_TARGET,
            transaction = request.transaction_id(),
            "request validated"
        );

        match request.kind() {
            RequestKind::Blocking => self.process_blocking(&module, &request),
            RequestKind::NonBlocking => self.process_non_blocking(module, request),
        }
    }

    /// Content-stage validation: module, action, request kind, parameters.
    fn validate_request(&self, request: &ActionRequest) -> Result<Arc<AgentModule>, ProcessorError> {
        let module =
            self.modules
                .lookup(request.module())
                .ok_or_else(|| ProcessorError::UnknownModule {
                    module: request.module().to_owned(),
                })?;

        if !module.has_action(request.action()) {
            return Err(ProcessorError::UnknownAction {
                module: request.module().to_owned(),
                action: request.action().to_owned(),
            });
        }

        // Internal modules complete synchronously by contract.
        if module.kind() == ModuleKind::Internal && request.kind() == RequestKind::NonBlocking {
            return Err(ProcessorError::BlockingOnly {
                module: request.module().to_owned(),
            });
        }

        debug!(
            target: PROCESSOR_TARGET,
            module = request.module(),
            action = request.action(),
            transaction = request.transaction_id(),
            "validating input parameters"
        );
        module
            .input_schemas()
            .validate(request.action(), request.params())
            .map_err(|schema_error| ProcessorError::InvalidParams {
                module: request.module().to_owned(),
                action: request.action().to_owned(),
                reason: schema_error.to_string(),
            })?;

        Ok(module)
    }

    fn process_blocking(&self, module: &AgentModule, request: &ActionRequest) {
        match module.execute(request) {
            Ok(outcome) => {
                info!(
                    target: PROCESSOR_TARGET,
                    id = request.id(),
                    sender = request.sender(),
                    transaction = request.transaction_id(),
                    "blocking request has completed"
                );
                if let Err(send_error) = self
                    .connector
                    .send_blocking_response(request, outcome.results())
                {
                    error!(
                        target: PROCESSOR_TARGET,
                        transaction = request.transaction_id(),
                        error = %send_error,
                        "failed to send blocking response"
                    );
                }
            }
            Err(execution_error) => {
                let processor_error = ProcessorError::Module(execution_error);
                error!(
                    target: PROCESSOR_TARGET,
                    module = request.module(),
                    action = request.action(),
                    transaction = request.transaction_id(),
                    error = %processor_error,
                    "failed to process blocking request"
                );
                self.send_rpc_error(request, &processor_error.to_string());
            }
        }
    }

    fn process_non_blocking(&self, module: Arc<AgentModule>, mut request: ActionRequest) {
        let results_dir =
            match transaction_results_dir(&self.spool_dir, request.transaction_id()) {
                Ok(dir) => dir,
                Err(store_error) => {
                    let processor_error = ProcessorError::Store(store_error);
                    error!(
                        target: PROCESSOR_TARGET,
                        transaction = request.transaction_id(),
                        error = %processor_error,
                        "rejecting non-blocking request"
                    );
                    self.send_rpc_error(&request, &processor_error.to_string());
                    return;
                }
            };
        request.set_results_dir(results_dir);

        debug!(
            target: PROCESSOR_TARGET,
            module = request.module(),
            action = request.action(),
            transaction = request.transaction_id(),
            id = request.id(),
            "starting non-blocking job"
        );

        let store = match ResultsStore::new(&request, &self.mutexes) {
            Ok(store) => store,
            Err(store_error) => {
                let processor_error = ProcessorError::Store(store_error);
                error!(
                    target: PROCESSOR_TARGET,
                    module = request.module(),
                    action = request.action(),
                    transaction = request.transaction_id(),
                    error = %processor_error,
                    "failed to initialise result files"
                );
                self.send_rpc_error(&request, &processor_error.to_string());
                return;
            }
        };

        let done = Arc::new(AtomicBool::new(false));
        let task_request = request.clone();
        let task_connector = Arc::clone(&self.connector);
        let task_mutexes = Arc::clone(&self.mutexes);
        let task_done = Arc::clone(&done);
        let task = move || {
            non_blocking_task(
                module,
                task_request,
                store,
                task_connector,
                task_mutexes,
                task_done,
            );
        };

        match self.pool.add(task, done) {
            Ok(()) => {
                if let Err(send_error) = self.connector.send_provisional_response(&request) {
                    error!(
                        target: PROCESSOR_TARGET,
                        transaction = request.transaction_id(),
                        error = %send_error,
                        "failed to send provisional response"
                    );
                }
            }
            Err(pool_error) => {
                let processor_error = ProcessorError::TaskSpawn(pool_error);
                error!(
                    target: PROCESSOR_TARGET,
                    module = request.module(),
                    action = request.action(),
                    transaction = request.transaction_id(),
                    error = %processor_error,
                    "failed to spawn action job"
                );
                // The task never ran, so the mutex entry it would have
                // cleaned up must be removed here.
                if let Err(mutex_error) = self.mutexes.remove(request.transaction_id()) {
                    error!(
                        target: PROCESSOR_TARGET,
                        transaction = request.transaction_id(),
                        error = %mutex_error,
                        "failed to remove the transaction mutex"
                    );
                }
                self.send_rpc_error(&request, &processor_error.to_string());
            }
        }
    }

    fn send_rpc_error(&self, request: &ActionRequest, description: &str) {
        if let Err(send_error) = self.connector.send_rpc_error(request, description) {
            error!(
                target: PROCESSOR_TARGET,
                id = request.id(),
                transaction = request.transaction_id(),
                error = %send_error,
                "failed to send rpc error"
            );
        }
    }
}

/// Flips the done-flag when dropped, so the worker pool observes task
/// completion on every exit path, panics included.
struct DoneFlag(Arc<AtomicBool>);

impl Drop for DoneFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Body of a non-blocking action task.
///
/// Executes the module, pushes the outcome notification when requested,
/// and in all cases writes the final metadata, removes the transaction
/// mutex entry, and releases the lock, in that order.
fn non_blocking_task<C: Connector>(
    module: Arc<AgentModule>,
    request: ActionRequest,
    store: ResultsStore,
    connector: Arc<C>,
    mutexes: Arc<TransactionMutexTable>,
    done: Arc<AtomicBool>,
) {
    let timer = Instant::now();
    let _done = DoneFlag(done);
    let transaction_id = request.transaction_id().to_owned();

    let mutex = match mutexes.get(&transaction_id) {
        Ok(mutex) => Some(mutex),
        Err(table_error) => {
            error!(
                target: PROCESSOR_TARGET,
                transaction = %transaction_id,
                error = %table_error,
                "failed to obtain the transaction mutex"
            );
            None
        }
    };

    let mut response = ActionResponse::from_request(module.kind(), &request);
    let mut exec_error = String::new();
    let mut exitcode = 1;

    let execution = module.execute(&request);

    // Lock before any metadata side-effect; the status-query path reads
    // under the same mutex.
    let guard = mutex
        .as_ref()
        .map(|mutex| mutex.lock().unwrap_or_else(PoisonError::into_inner));
    if guard.is_none() {
        debug!(
            target: PROCESSOR_TARGET,
            transaction = %transaction_id,
            "no transaction mutex available; metadata access is unguarded"
        );
    }

    match execution {
        Ok(outcome) => {
            exitcode = outcome.exitcode();
            if let Some(output) = outcome.output() {
                response.set_output(output.clone());
                if let Err(store_error) = store.write_output(output) {
                    error!(
                        target: PROCESSOR_TARGET,
                        transaction = %transaction_id,
                        error = %store_error,
                        "failed to write captured process output"
                    );
                }
            }

            info!(
                target: PROCESSOR_TARGET,
                id = request.id(),
                sender = request.sender(),
                transaction = %transaction_id,
                "non-blocking request has completed"
            );

            if request.notify_outcome()
                && let Err(send_error) =
                    connector.send_non_blocking_response(&request, outcome.results(), &transaction_id)
            {
                exec_error = format!("failed to send outcome notification: {send_error}");
                error!(
                    target: PROCESSOR_TARGET,
                    transaction = %transaction_id,
                    error = %send_error,
                    "failed to send non-blocking response"
                );
            }

            let note = (!exec_error.is_empty()).then_some(exec_error.as_str());
            if let Err(response_error) = response.mark_success(outcome.results().clone(), note) {
                error!(
                    target: PROCESSOR_TARGET,
                    transaction = %transaction_id,
                    error = %response_error,
                    "response transition produced invalid metadata"
                );
            }
        }
        Err(execution_error) => {
            exitcode = execution_error.exitcode().unwrap_or(1);
            if let Some(output) = execution_error.output() {
                response.set_output(output.clone());
                if let Err(store_error) = store.write_output(output) {
                    error!(
                        target: PROCESSOR_TARGET,
                        transaction = %transaction_id,
                        error = %store_error,
                        "failed to write captured process output"
                    );
                }
            }

            exec_error = format!("failed to execute: {execution_error}");
            error!(
                target: PROCESSOR_TARGET,
                module = request.module(),
                action = request.action(),
                transaction = %transaction_id,
                error = %execution_error,
                "failed to execute non-blocking request"
            );

            if let Err(send_error) = connector.send_rpc_error(&request, &execution_error.to_string())
            {
                error!(
                    target: PROCESSOR_TARGET,
                    transaction = %transaction_id,
                    error = %send_error,
                    "failed to send rpc error for failed request"
                );
            }

            if let Err(response_error) = response.mark_failure(&exec_error) {
                error!(
                    target: PROCESSOR_TARGET,
                    transaction = %transaction_id,
                    error = %response_error,
                    "response transition produced invalid metadata"
                );
            }
        }
    }

    // Durable tail: final metadata, then the table entry, then the lock.
    if let Err(store_error) = store.write_metadata(&response, exitcode, &exec_error, timer.elapsed())
    {
        error!(
            target: PROCESSOR_TARGET,
            transaction = %transaction_id,
            error = %store_error,
            "failed to write final metadata"
        );
    }
    if let Err(table_error) = mutexes.remove(&transaction_id) {
        error!(
            target: PROCESSOR_TARGET,
            transaction = %transaction_id,
            error = %table_error,
            "failed to remove the transaction mutex"
        );
    }
    drop(guard);
}

fn chunk_field(envelope: &Value, field: &str) -> String {
    envelope
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Loads `<module>.conf` JSON files from the configuration directory.
fn load_modules_configuration(dir: Option<&Path>) -> HashMap<String, Value> {
    let mut configurations = HashMap::new();
    let Some(dir) = dir else {
        return configurations;
    };
    if !dir.is_dir() {
        debug!(
            target: PROCESSOR_TARGET,
            directory = %dir.display(),
            "modules configuration directory does not exist; no module configuration will be loaded"
        );
        return configurations;
    }

    info!(
        target: PROCESSOR_TARGET,
        directory = %dir.display(),
        "loading external modules configuration"
    );
    let Ok(entries) = fs::read_dir(dir) else {
        warn!(
            target: PROCESSOR_TARGET,
            directory = %dir.display(),
            "failed to enumerate the modules configuration directory"
        );
        return configurations;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(MODULE_CONFIG_EXTENSION) {
            continue;
        }
        let Some(module_name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match fs::read_to_string(&path)
            .map_err(|error| error.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|error| error.to_string()))
        {
            Ok(configuration) => {
                debug!(
                    target: PROCESSOR_TARGET,
                    module = module_name,
                    path = %path.display(),
                    "loaded module configuration"
                );
                configurations.insert(module_name.to_owned(), configuration);
            }
            Err(parse_error) => {
                warn!(
                    target: PROCESSOR_TARGET,
                    path = %path.display(),
                    error = %parse_error,
                    "cannot load module configuration file"
                );
            }
        }
    }
    configurations
}

/// Scans the modules directory and registers every loadable executable.
fn load_external_modules(
    registry: &mut ModuleRegistry,
    dir: &Path,
    configurations: &HashMap<String, Value>,
) {
    if !dir.is_dir() {
        warn!(
            target: PROCESSOR_TARGET,
            directory = %dir.display(),
            "failed to locate the modules directory; no external modules will be loaded"
        );
        return;
    }

    info!(
        target: PROCESSOR_TARGET,
        directory = %dir.display(),
        "loading external modules"
    );
    let Ok(entries) = fs::read_dir(dir) else {
        warn!(
            target: PROCESSOR_TARGET,
            directory = %dir.display(),
            "failed to enumerate the modules directory"
        );
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() || !is_module_candidate(&path) {
            continue;
        }
        let configuration = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| configurations.get(stem))
            .cloned();
        match ExternalModule::load_with_config(&path, configuration) {
            Ok(module) => registry.register(AgentModule::External(module)),
            Err(loading_error) => {
                error!(
                    target: PROCESSOR_TARGET,
                    path = %path.display(),
                    error = %loading_error,
                    "failed to load external module"
                );
            }
        }
    }
}

/// Valid modules have no extension on Unix and a `.bat` extension on
/// Windows.
#[cfg(not(windows))]
fn is_module_candidate(path: &Path) -> bool {
    path.extension().is_none()
}

#[cfg(windows)]
fn is_module_candidate(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bat"))
}

fn log_loaded_modules(registry: &ModuleRegistry) {
    for module in registry.iter() {
        debug!(
            target: PROCESSOR_TARGET,
            module = module.name(),
            kind = %module.kind(),
            actions = module.actions().join(", "),
            "loaded module"
        );
    }
}
