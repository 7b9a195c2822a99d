//! The closed sum of module implementations.
//!
//! Modules are either built into the agent process or implemented as
//! external executables. The distinction is part of the request contract:
//! internal modules complete synchronously and therefore accept only
//! blocking requests, a rule the request processor enforces through
//! [`AgentModule::kind`].

use crate::error::ModuleError;
use crate::external::ExternalModule;
use crate::internal::InternalModule;
use crate::outcome::ActionOutcome;
use crate::request::ActionRequest;
use crate::schema::SchemaRegistry;

/// Category of a module implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Built into the agent process; blocking requests only.
    Internal,
    /// Implemented as an external executable.
    External,
}

impl ModuleKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named unit of executable capability.
#[derive(Debug)]
pub enum AgentModule {
    /// Module implemented inside the agent process.
    Internal(InternalModule),
    /// Module implemented as an external executable.
    External(ExternalModule),
}

impl AgentModule {
    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Internal(module) => module.name(),
            Self::External(module) => module.name(),
        }
    }

    /// Returns the module category.
    #[must_use]
    pub const fn kind(&self) -> ModuleKind {
        match self {
            Self::Internal(_) => ModuleKind::Internal,
            Self::External(_) => ModuleKind::External,
        }
    }

    /// Returns the action names the module exposes.
    #[must_use]
    pub fn actions(&self) -> &[String] {
        match self {
            Self::Internal(module) => module.actions(),
            Self::External(module) => module.actions(),
        }
    }

    /// Returns `true` when the module exposes the named action.
    #[must_use]
    pub fn has_action(&self, name: &str) -> bool {
        self.actions().iter().any(|action| action == name)
    }

    /// Returns the per-action input schema registry.
    #[must_use]
    pub const fn input_schemas(&self) -> &SchemaRegistry {
        match self {
            Self::Internal(module) => module.input_schemas(),
            Self::External(module) => module.input_schemas(),
        }
    }

    /// Returns the per-action output schema registry.
    #[must_use]
    pub const fn output_schemas(&self) -> &SchemaRegistry {
        match self {
            Self::Internal(module) => module.output_schemas(),
            Self::External(module) => module.output_schemas(),
        }
    }

    /// Executes the requested action.
    ///
    /// # Errors
    ///
    /// Propagates the implementation's [`ModuleError`].
    pub fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome, ModuleError> {
        match self {
            Self::Internal(module) => module.execute(request),
            Self::External(module) => module.execute(request),
        }
    }
}
