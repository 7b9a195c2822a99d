//! Request vocabulary and module execution framework for the drover agent.
//!
//! The `drover-modules` crate owns the language the agent daemon speaks
//! internally: the [`ActionRequest`] constructed from parsed transport
//! chunks, the closed [`AgentModule`] sum of internal and external modules,
//! the per-action [`SchemaRegistry`] guarding module inputs and outputs, and
//! the [`ModuleRegistry`] the request processor routes through.
//!
//! External modules are short-lived child processes that communicate with
//! the agent via JSON over standard I/O. At load time a module is invoked
//! with the single argument `metadata` and describes itself with a JSON
//! document naming its actions and their input and output schemas. At
//! execution time the module is invoked with the action name as its single
//! argument and receives `{"input": …, "configuration": …}` on stdin.
//!
//! # Example
//!
//! ```rust,no_run
//! use drover_modules::{AgentModule, ExternalModule, ModuleRegistry};
//!
//! let module = ExternalModule::load("/usr/libexec/drover/reverse")?;
//! let mut registry = ModuleRegistry::new();
//! registry.register(AgentModule::External(module));
//! # Ok::<(), drover_modules::ModuleError>(())
//! ```

pub mod error;
pub mod external;
pub mod internal;
pub mod metadata;
pub mod module;
pub mod outcome;
pub mod registry;
pub mod request;
pub mod schema;

pub use self::error::ModuleError;
pub use self::external::ExternalModule;
pub use self::internal::InternalModule;
pub use self::metadata::{ActionMetadata, ModuleMetadata};
pub use self::module::{AgentModule, ModuleKind};
pub use self::outcome::{ActionOutcome, RawOutput};
pub use self::registry::ModuleRegistry;
pub use self::request::{ActionRequest, ChunkData, ParsedChunks, RequestError, RequestKind};
pub use self::schema::{SchemaError, SchemaRegistry};
