//! Revision references and execution handles.

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Opaque identifier for a point in source history (commit id, ref, `sha~1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionRef(String);

impl RevisionRef {
    /// Parse a revision reference.
    ///
    /// Rejects empty input, whitespace, control characters, a leading `-`
    /// (the diff tool would read it as an option) and `..` range syntax.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let rev = raw.as_ref().trim();
        if let Some(reason) = malformed_reason(rev) {
            return Err(GateError::Configuration(format!(
                "malformed revision '{}': {}",
                rev, reason
            )));
        }
        Ok(RevisionRef(rev.to_string()))
    }

    /// The conventional base for `head`: its first parent, `<head>~1`.
    pub fn parent_of(head: &RevisionRef) -> Self {
        RevisionRef(format!("{}~1", head.0))
    }

    /// Return the raw reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the reference again; used by matchers that receive it from
    /// deserialized or hand-built input.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match malformed_reason(&self.0) {
            Some(reason) => Err(format!("malformed revision '{}': {}", self.0, reason)),
            None => Ok(()),
        }
    }
}

fn malformed_reason(rev: &str) -> Option<&'static str> {
    if rev.is_empty() {
        Some("empty")
    } else if rev.starts_with('-') {
        Some("starts with '-'")
    } else if rev.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("contains whitespace or control characters")
    } else if rev.contains("..") {
        Some("range syntax is not a single revision")
    } else {
        None
    }
}

impl std::fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the running build/pipeline execution, used only as the
/// target of a stop request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHandle(String);

impl ExecutionHandle {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let id = raw.as_ref().trim();
        if id.is_empty() {
            return Err(GateError::Configuration(
                "execution handle must not be empty".to_string(),
            ));
        }
        Ok(ExecutionHandle(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
