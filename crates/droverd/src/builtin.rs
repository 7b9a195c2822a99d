//! Modules built into the agent process.
//!
//! Internal modules are registered before any external module is discovered
//! and accept only blocking requests.

use serde_json::{Value, json};

use drover_modules::{AgentModule, InternalModule, SchemaError};

/// Builds the `echo` module: returns its `argument` parameter unchanged.
pub(crate) fn echo_module() -> Result<AgentModule, SchemaError> {
    let input = json!({
        "type": "object",
        "properties": {"argument": {"type": "string"}},
        "required": ["argument"],
    });
    let output = json!({
        "type": "object",
        "properties": {"outcome": {"type": "string"}},
        "required": ["outcome"],
    });

    let module = InternalModule::new("echo").action("echo", &input, &output, |request| {
        let argument = request
            .params()
            .get("argument")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(json!({"outcome": argument}))
    })?;
    Ok(AgentModule::Internal(module))
}
