//! Self-description document produced by external modules.
//!
//! Invoked with the single argument `metadata`, an external module prints a
//! JSON document naming its actions and their input and output schemas. The
//! document may also declare a `configuration` schema that the module's
//! configuration file is validated against at load time.

use serde::Deserialize;
use serde_json::Value;

/// Metadata document read from an external module's stdout at load time.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMetadata {
    /// Human-readable module description.
    pub description: String,
    /// Optional schema for the module's configuration file.
    #[serde(default)]
    pub configuration: Option<Value>,
    /// Actions the module exposes.
    pub actions: Vec<ActionMetadata>,
}

/// Description of a single action within a module metadata document.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionMetadata {
    /// Action name; used as the argv argument at execution time.
    pub name: String,
    /// Optional human-readable action description.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema for the action's input parameters.
    pub input: Value,
    /// JSON Schema for the action's output document.
    pub output: Value,
    /// Optional behaviour hint forwarded to orchestration layers.
    #[serde(default)]
    pub behaviour: Option<String>,
}

impl ModuleMetadata {
    /// Checks structural rules serde typing cannot express.
    ///
    /// Returns a description of the first violation: a module without
    /// actions, an action without a name, or two actions sharing a name.
    #[must_use]
    pub fn structural_error(&self) -> Option<String> {
        if self.actions.is_empty() {
            return Some(String::from("metadata declares no actions"));
        }
        let mut seen = std::collections::HashSet::new();
        for action in &self.actions {
            if action.name.trim().is_empty() {
                return Some(String::from("metadata declares an action with no name"));
            }
            if !seen.insert(action.name.as_str()) {
                return Some(format!(
                    "metadata declares action '{}' more than once",
                    action.name
                ));
            }
        }
        None
    }
}
