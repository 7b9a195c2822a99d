//! Result of executing a module action.

use serde_json::Value;

/// Captured process output of an external action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Raw standard output.
    pub stdout: String,
    /// Raw standard error.
    pub stderr: String,
    /// Process exit code; `-1` when terminated by a signal.
    pub exitcode: i32,
}

/// Outcome of a successfully executed action.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Produced by an internal module; carries only the structured results.
    Internal {
        /// Structured results returned to the requester.
        results: Value,
    },
    /// Produced by an external module; retains the captured process output
    /// alongside the parsed results.
    External {
        /// Captured stdout, stderr, and exit code.
        output: RawOutput,
        /// Results parsed from the process stdout.
        results: Value,
    },
}

impl ActionOutcome {
    /// Returns the structured results.
    #[must_use]
    pub const fn results(&self) -> &Value {
        match self {
            Self::Internal { results } | Self::External { results, .. } => results,
        }
    }

    /// Returns the captured process output for external outcomes.
    #[must_use]
    pub const fn output(&self) -> Option<&RawOutput> {
        match self {
            Self::Internal { .. } => None,
            Self::External { output, .. } => Some(output),
        }
    }

    /// Returns the process exit code, zero for internal outcomes.
    #[must_use]
    pub const fn exitcode(&self) -> i32 {
        match self {
            Self::Internal { .. } => 0,
            Self::External { output, .. } => output.exitcode,
        }
    }
}
