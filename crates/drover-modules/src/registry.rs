//! Module registry for name-based lookup.
//!
//! The registry stores modules behind `Arc` so non-blocking tasks can hold
//! a module across threads while the registry itself stays immutable after
//! startup. Internal modules are registered first, then external modules
//! discovered on disk; a later registration for the same name replaces the
//! earlier one with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::module::AgentModule;

/// Tracing target for registry operations.
const REGISTRY_TARGET: &str = "drover_modules::registry";

/// Registry of loaded modules keyed by name.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<AgentModule>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module, replacing any earlier module of the same name.
    pub fn register(&mut self, module: AgentModule) {
        let name = module.name().to_owned();
        if self.modules.insert(name.clone(), Arc::new(module)).is_some() {
            warn!(
                target: REGISTRY_TARGET,
                module = %name,
                "module registered twice, replacing the earlier registration"
            );
        }
    }

    /// Looks up a module by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<AgentModule>> {
        self.modules.get(name).cloned()
    }

    /// Iterates over the registered modules.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentModule>> {
        self.modules.values()
    }

    /// Returns the number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` when no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
