//! Error types for gate evaluation.

use thiserror::Error;

/// Errors surfaced by the diff matcher, the stop primitive and input parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The diff could not be computed (bad revision, missing checkout, I/O).
    ///
    /// Never folded into "match" or "no match".
    #[error("diff unavailable for filter '{filter}': {reason}")]
    DiffUnavailable { filter: String, reason: String },

    /// The stop request itself failed. The STOPPED decision still stands.
    #[error("stop request for execution '{execution}' failed: {reason}")]
    StopRequestFailed { execution: String, reason: String },

    /// Filters, revisions or execution handle are unusable.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GateError {
    /// Whether this error aborts evaluation (everything except a failed stop).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GateError::StopRequestFailed { .. })
    }
}

/// Result type for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
