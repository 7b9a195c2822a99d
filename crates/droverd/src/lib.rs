//! Request-processing core of the drover remote-execution agent.
//!
//! The agent receives structured RPC-style messages over a persistent
//! connection maintained by the transport layer, validates them against a
//! registry of named modules, and dispatches each to the module that
//! implements the requested action. Blocking requests answer inline;
//! non-blocking requests are acknowledged immediately, executed on a worker
//! thread, and tracked durably on disk so a status query can observe the
//! transaction after the fact.
//!
//! The transport itself is out of scope: the core consumes
//! [`drover_modules::ParsedChunks`] and calls back through the narrow
//! [`Connector`] trait to deliver responses and errors. Everything between
//! those two seams lives here: the [`RequestProcessor`] orchestrator, the
//! [`ActionResponse`] builder, the per-transaction [`ResultsStore`] and
//! [`TransactionMutexTable`], and the [`WorkerPool`] of background action
//! tasks.

mod bootstrap;
mod builtin;
mod connector;
mod mutex_table;
mod pool;
mod processor;
mod response;
mod spool;
mod telemetry;

pub use bootstrap::{
    Agent, BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use connector::{ConnectionError, Connector};
pub use mutex_table::{MutexTableError, TransactionMutexTable};
pub use pool::{PoolError, WorkerPool};
pub use processor::{ProcessorError, RequestProcessor};
pub use response::{ActionResponse, ActionStatus, ResponseError, ResponseKind, is_valid_metadata};
pub use spool::{ResultsStore, ResultsStoreError, transaction_results_dir};
pub use telemetry::{TelemetryError, TelemetryHandle};
