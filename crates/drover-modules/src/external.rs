//! External module loading and execution.
//!
//! An external module is a standalone executable. At load time it is run
//! with the single argument `metadata` and must print a JSON document
//! describing its actions and schemas. At execution time it is run with the
//! action name as its single argument, receives
//! `{"input": <params>, "configuration": <config>}` on stdin, and prints its
//! results as JSON on stdout. Stdout, stderr, and the exit code are captured
//! in full so they can be persisted for non-blocking transactions.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::error::ModuleError;
use crate::metadata::ModuleMetadata;
use crate::outcome::{ActionOutcome, RawOutput};
use crate::request::ActionRequest;
use crate::schema::SchemaRegistry;

/// Tracing target for external module operations.
const MODULE_TARGET: &str = "drover_modules::external";

/// Argument passed to query a module's self-description.
const METADATA_ARG: &str = "metadata";

/// A module implemented as an external executable.
#[derive(Debug)]
pub struct ExternalModule {
    name: String,
    executable: PathBuf,
    description: String,
    actions: Vec<String>,
    configuration: Value,
    input_schemas: SchemaRegistry,
    output_schemas: SchemaRegistry,
}

impl ExternalModule {
    /// Loads a module without a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Loading`] when the executable cannot be run,
    /// its metadata is not valid JSON, or the metadata violates the module
    /// description contract.
    pub fn load(executable: impl Into<PathBuf>) -> Result<Self, ModuleError> {
        Self::load_with_config(executable, None)
    }

    /// Loads a module, validating the supplied configuration against the
    /// schema the module declares, when it declares one.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Loading`] on any metadata or configuration
    /// failure.
    pub fn load_with_config(
        executable: impl Into<PathBuf>,
        configuration: Option<Value>,
    ) -> Result<Self, ModuleError> {
        let executable = executable.into();
        let name = module_name(&executable)?;

        let output = Command::new(&executable)
            .arg(METADATA_ARG)
            .stdin(Stdio::null())
            .output()
            .map_err(|error| loading(&name, format!("failed to run metadata query: {error}")))?;

        if !output.status.success() {
            return Err(loading(
                &name,
                format!(
                    "metadata query exited with status {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let metadata: ModuleMetadata = serde_json::from_slice(&output.stdout)
            .map_err(|error| loading(&name, format!("metadata is not valid JSON: {error}")))?;

        if let Some(message) = metadata.structural_error() {
            return Err(loading(&name, message));
        }

        let mut input_schemas = SchemaRegistry::new();
        let mut output_schemas = SchemaRegistry::new();
        let mut actions = Vec::with_capacity(metadata.actions.len());
        for action in &metadata.actions {
            input_schemas
                .register(action.name.clone(), &action.input)
                .map_err(|error| loading(&name, error.to_string()))?;
            output_schemas
                .register(action.name.clone(), &action.output)
                .map_err(|error| loading(&name, error.to_string()))?;
            actions.push(action.name.clone());
        }

        if let (Some(schema), Some(config)) = (&metadata.configuration, configuration.as_ref()) {
            validate_configuration(&name, schema, config)?;
        }

        debug!(
            target: MODULE_TARGET,
            module = %name,
            executable = %executable.display(),
            actions = actions.len(),
            "loaded external module"
        );

        Ok(Self {
            name,
            executable,
            description: metadata.description,
            actions,
            configuration: configuration.unwrap_or_else(|| json!({})),
            input_schemas,
            output_schemas,
        })
    }

    /// Returns the module name (the executable's file stem).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the module description from its metadata.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the action names in declaration order.
    #[must_use]
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Returns the per-action input schema registry.
    #[must_use]
    pub const fn input_schemas(&self) -> &SchemaRegistry {
        &self.input_schemas
    }

    /// Returns the per-action output schema registry.
    #[must_use]
    pub const fn output_schemas(&self) -> &SchemaRegistry {
        &self.output_schemas
    }

    /// Runs the requested action in a child process.
    ///
    /// The subprocess runs to completion; no timeout is imposed.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Spawn`] or [`ModuleError::Io`] when the
    /// process cannot be run, [`ModuleError::NonZeroExit`] on a non-zero
    /// exit status, [`ModuleError::InvalidJson`] when stdout is not JSON,
    /// and [`ModuleError::OutputRejected`] when the results do not conform
    /// to the action's output schema. The last three preserve the captured
    /// process output.
    pub fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome, ModuleError> {
        let action = request.action();
        if !self.actions.iter().any(|name| name == action) {
            return Err(ModuleError::UnknownAction {
                module: self.name.clone(),
                action: action.to_owned(),
            });
        }

        let mut child = Command::new(&self.executable)
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| ModuleError::Spawn {
                module: self.name.clone(),
                action: action.to_owned(),
                source: Arc::new(error),
            })?;

        let invocation = json!({
            "input": request.params(),
            "configuration": self.configuration,
        });

        // Invocation payloads are small; the write completes before the
        // child can fill its output pipes.
        let mut stdin = child.stdin.take().ok_or_else(|| self.io_error(
            action,
            std::io::Error::other("failed to capture module stdin"),
        ))?;
        stdin
            .write_all(invocation.to_string().as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .map_err(|error| self.io_error(action, error))?;
        // Dropping stdin closes the pipe to signal no more input.
        drop(stdin);

        let output = child
            .wait_with_output()
            .map_err(|error| self.io_error(action, error))?;

        let raw = RawOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exitcode: output.status.code().unwrap_or(-1),
        };

        debug!(
            target: MODULE_TARGET,
            module = %self.name,
            action,
            exitcode = raw.exitcode,
            stdout_bytes = raw.stdout.len(),
            "external action completed"
        );

        if !output.status.success() {
            return Err(ModuleError::NonZeroExit {
                module: self.name.clone(),
                action: action.to_owned(),
                output: raw,
            });
        }

        let results: Value =
            serde_json::from_str(raw.stdout.trim()).map_err(|error| ModuleError::InvalidJson {
                module: self.name.clone(),
                action: action.to_owned(),
                message: error.to_string(),
                output: raw.clone(),
            })?;

        self.output_schemas
            .validate(action, &results)
            .map_err(|error| ModuleError::OutputRejected {
                module: self.name.clone(),
                action: action.to_owned(),
                reason: error.to_string(),
                output: raw.clone(),
            })?;

        Ok(ActionOutcome::External {
            output: raw,
            results,
        })
    }

    fn io_error(&self, action: &str, source: std::io::Error) -> ModuleError {
        ModuleError::Io {
            module: self.name.clone(),
            action: action.to_owned(),
            source: Arc::new(source),
        }
    }
}

fn module_name(executable: &Path) -> Result<String, ModuleError> {
    executable
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            loading(
                &executable.display().to_string(),
                String::from("executable path has no usable file name"),
            )
        })
}

fn validate_configuration(
    name: &str,
    schema: &Value,
    configuration: &Value,
) -> Result<(), ModuleError> {
    let mut registry = SchemaRegistry::new();
    registry
        .register("configuration", schema)
        .map_err(|error| loading(name, error.to_string()))?;
    registry
        .validate("configuration", configuration)
        .map_err(|error| loading(name, format!("configuration rejected: {error}")))
}

fn loading(module: &str, message: String) -> ModuleError {
    ModuleError::Loading {
        module: module.to_owned(),
        message,
    }
}
