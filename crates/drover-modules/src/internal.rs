//! Modules built into the agent process.
//!
//! Internal modules complete synchronously in-process; by contract they
//! accept only blocking requests, which the request processor enforces. Each
//! action pairs a handler closure with its input and output schemas.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::ModuleError;
use crate::outcome::ActionOutcome;
use crate::request::ActionRequest;
use crate::schema::{SchemaError, SchemaRegistry};

type ActionHandler = Box<dyn Fn(&ActionRequest) -> Result<Value, ModuleError> + Send + Sync>;

/// A module implemented inside the agent process.
pub struct InternalModule {
    name: String,
    actions: Vec<String>,
    input_schemas: SchemaRegistry,
    output_schemas: SchemaRegistry,
    handlers: HashMap<String, ActionHandler>,
}

impl fmt::Debug for InternalModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalModule")
            .field("name", &self.name)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

impl InternalModule {
    /// Creates a module with no actions.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            input_schemas: SchemaRegistry::new(),
            output_schemas: SchemaRegistry::new(),
            handlers: HashMap::new(),
        }
    }

    /// Adds an action with its schemas and handler.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Compile`] when either schema document is not a
    /// valid JSON Schema.
    pub fn action<F>(
        mut self,
        name: impl Into<String>,
        input_schema: &Value,
        output_schema: &Value,
        handler: F,
    ) -> Result<Self, SchemaError>
    where
        F: Fn(&ActionRequest) -> Result<Value, ModuleError> + Send + Sync + 'static,
    {
        let name = name.into();
        self.input_schemas.register(name.clone(), input_schema)?;
        self.output_schemas.register(name.clone(), output_schema)?;
        self.actions.push(name.clone());
        self.handlers.insert(name, Box::new(handler));
        Ok(self)
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the action names in registration order.
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

    /// Runs the requested action's handler.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownAction`] for an action the module does
    /// not expose, or whatever error the handler raises.
    pub fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome, ModuleError> {
        let handler =
            self.handlers
                .get(request.action())
                .ok_or_else(|| ModuleError::UnknownAction {
                    module: self.name.clone(),
                    action: request.action().to_owned(),
                })?;
        let results = handler(request)?;
        Ok(ActionOutcome::Internal { results })
    }
}
