//! Domain errors raised by module loading and execution.
//!
//! Loading failures occur at startup and abort only the offending module;
//! processing failures occur per request and either surface to the sender
//! (blocking) or land in the transaction's durable metadata (non-blocking).
//! Processing variants retain the captured process output so the spool can
//! record stdout, stderr, and exit code even for failed runs. I/O errors are
//! wrapped in `Arc` to satisfy the `result_large_err` Clippy lint.

use std::sync::Arc;

use thiserror::Error;

use crate::outcome::RawOutput;

/// Errors arising from module operations.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The module could not be loaded at startup.
    #[error("module '{module}' failed to load: {message}")]
    Loading {
        /// Module name or executable path.
        module: String,
        /// Human-readable failure description.
        message: String,
    },

    /// The module executable could not be spawned.
    #[error("failed to spawn module '{module}' for action '{action}': {source}")]
    Spawn {
        /// Module name.
        module: String,
        /// Action being executed.
        action: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// An I/O error occurred while communicating with the module process.
    #[error("I/O error while running '{module} {action}': {source}")]
    Io {
        /// Module name.
        module: String,
        /// Action being executed.
        action: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The module process exited with a non-zero status.
    #[error("'{module} {action}' exited with status {}", .output.exitcode)]
    NonZeroExit {
        /// Module name.
        module: String,
        /// Action being executed.
        action: String,
        /// Captured process output.
        output: RawOutput,
    },

    /// The module wrote something other than JSON on stdout.
    #[error("'{module} {action}' produced invalid JSON output: {message}")]
    InvalidJson {
        /// Module name.
        module: String,
        /// Action being executed.
        action: String,
        /// Description of the parse failure.
        message: String,
        /// Captured process output.
        output: RawOutput,
    },

    /// The module's results did not conform to its declared output schema.
    #[error("'{module} {action}' produced results rejected by the output schema: {reason}")]
    OutputRejected {
        /// Module name.
        module: String,
        /// Action being executed.
        action: String,
        /// Validation error details.
        reason: String,
        /// Captured process output.
        output: RawOutput,
    },

    /// The action is not exposed by the module.
    #[error("module '{module}' has no action '{action}'")]
    UnknownAction {
        /// Module name.
        module: String,
        /// Action that was requested.
        action: String,
    },
}

impl ModuleError {
    /// Returns the captured process output when the failure preserved one.
    #[must_use]
    pub const fn output(&self) -> Option<&RawOutput> {
        match self {
            Self::NonZeroExit { output, .. }
            | Self::InvalidJson { output, .. }
            | Self::OutputRejected { output, .. } => Some(output),
            Self::Loading { .. }
            | Self::Spawn { .. }
            | Self::Io { .. }
            | Self::UnknownAction { .. } => None,
        }
    }

    /// Returns the process exit code recorded by the failure, if any.
    #[must_use]
    pub const fn exitcode(&self) -> Option<i32> {
        match self.output() {
            Some(output) => Some(output.exitcode),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_exit_preserves_output() {
        let error = ModuleError::NonZeroExit {
            module: String::from("reverse"),
            action: String::from("broken"),
            output: RawOutput {
                stdout: String::new(),
                stderr: String::from("boom"),
                exitcode: 3,
            },
        };
        assert_eq!(error.exitcode(), Some(3));
        assert!(error.to_string().contains("status 3"));
    }

    #[test]
    fn loading_error_carries_no_output() {
        let error = ModuleError::Loading {
            module: String::from("reverse"),
            message: String::from("invalid metadata"),
        };
        assert!(error.output().is_none());
        assert!(error.exitcode().is_none());
    }
}
