//! Per-action JSON Schema registry.
//!
//! Modules declare one input and one output schema per action; the schemas
//! are compiled once at registration and consulted on every request. The
//! registry keys schemas by action name.

use std::collections::HashMap;
use std::fmt;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by schema registration and validation.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema document itself is not a valid JSON Schema.
    #[error("invalid schema '{name}': {message}")]
    Compile {
        /// Registration name of the offending schema.
        name: String,
        /// Description of the compilation failure.
        message: String,
    },

    /// No schema is registered under the requested name.
    #[error("no schema registered under '{name}'")]
    Unknown {
        /// Name that was looked up.
        name: String,
    },

    /// The document did not conform to the schema.
    #[error("document rejected by schema '{name}': {message}")]
    Rejected {
        /// Name of the schema that rejected the document.
        name: String,
        /// Validation error details.
        message: String,
    },
}

/// Registry of compiled JSON Schemas keyed by action name.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, JSONSchema>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and registers a schema under the given name.
    ///
    /// A later registration for the same name replaces the earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Compile`] when the document is not a valid
    /// JSON Schema.
    pub fn register(&mut self, name: impl Into<String>, schema: &Value) -> Result<(), SchemaError> {
        let name = name.into();
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|error| SchemaError::Compile {
                name: name.clone(),
                message: error.to_string(),
            })?;
        self.schemas.insert(name, compiled);
        Ok(())
    }

    /// Returns `true` when a schema is registered under the given name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Validates a document against the named schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Unknown`] when no schema matches the name and
    /// [`SchemaError::Rejected`] when the document does not conform.
    pub fn validate(&self, name: &str, document: &Value) -> Result<(), SchemaError> {
        let schema = self.schemas.get(name).ok_or_else(|| SchemaError::Unknown {
            name: name.to_owned(),
        })?;

        if let Err(errors) = schema.validate(document) {
            let message = errors
                .map(|error| error.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SchemaError::Rejected {
                name: name.to_owned(),
                message,
            });
        }
        Ok(())
    }
}
