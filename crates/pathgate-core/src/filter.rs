//! Path filters and the ordered filter set.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GateError, Result};

/// A path or path prefix whose modification keeps a build running.
///
/// Matched literally: `*.md` names a file called `*.md`, and `:!docs` is a
/// path, not an exclusion. A change matches when it is equal to the filter or
/// nested under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathFilter(String);

impl PathFilter {
    /// Parse one filter. A trailing `/` is dropped; `.` scopes the whole tree.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        let path = match trimmed.trim_end_matches('/') {
            "" if !trimmed.is_empty() => "/",
            p => p,
        };

        if path.is_empty() {
            return Err(GateError::Configuration(
                "path filter must not be empty".to_string(),
            ));
        }
        if path.chars().any(|c| c.is_control()) {
            return Err(GateError::Configuration(format!(
                "path filter {:?} contains control characters",
                path
            )));
        }
        if path.starts_with('/') {
            return Err(GateError::Configuration(format!(
                "path filter '{}' must be relative to the repository root",
                path
            )));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(GateError::Configuration(format!(
                "path filter '{}' escapes the repository",
                path
            )));
        }

        Ok(PathFilter(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PathFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered sequence of filters, OR-combined by the gate.
///
/// Order carries no meaning for the decision but is kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathFilterSet(Vec<PathFilter>);

impl PathFilterSet {
    pub fn new(filters: Vec<PathFilter>) -> Self {
        Self(filters)
    }

    /// Parse a comma-separated list: entries are trimmed and empty ones
    /// discarded. An input with no entries yields an empty set.
    pub fn parse_csv(raw: &str) -> Result<Self> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(PathFilter::new)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathFilter> {
        self.0.iter()
    }

    /// Deterministic digest of the ordered filter strings.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for filter in &self.0 {
            hasher.update(filter.as_str().as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

impl<'a> IntoIterator for &'a PathFilterSet {
    type Item = &'a PathFilter;
    type IntoIter = std::slice::Iter<'a, PathFilter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
