//! In-memory fakes for the gate's capabilities (testing only)
//!
//! Provides `StaticDiffMatcher` and `RecordingStop`, which satisfy the
//! `DiffMatcher` and `StopPrimitive` contracts without git or a network.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::diff::{DiffMatcher, DiffResult};
use crate::error::{GateError, Result};
use crate::filter::PathFilter;
use crate::revision::{ExecutionHandle, RevisionRef};
use crate::stop::{StopAck, StopPrimitive};

// ---------------------------------------------------------------------------
// StaticDiffMatcher
// ---------------------------------------------------------------------------

/// Diff matcher over a fixed list of changed paths.
#[derive(Debug, Default)]
pub struct StaticDiffMatcher {
    changed: Vec<String>,
    base_missing: bool,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl StaticDiffMatcher {
    pub fn new<I, S>(changed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changed: changed.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Simulate a root commit: every filter reports `BaseUnresolvable`.
    pub fn with_missing_base(mut self) -> Self {
        self.base_missing = true;
        self
    }

    /// Make `filter` fail with `DiffUnavailable`.
    pub fn failing_on(mut self, filter: &str) -> Self {
        self.failing.insert(filter.to_string());
        self
    }

    /// Filters queried so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn touches(&self, filter: &str) -> bool {
        filter == "."
            || self.changed.iter().any(|path| {
                path == filter
                    || path
                        .strip_prefix(filter)
                        .map_or(false, |rest| rest.starts_with('/'))
            })
    }
}

#[async_trait]
impl DiffMatcher for StaticDiffMatcher {
    async fn matches(
        &self,
        _base: &RevisionRef,
        _head: &RevisionRef,
        filter: &PathFilter,
    ) -> Result<DiffResult> {
        self.calls.lock().unwrap().push(filter.as_str().to_string());

        if self.failing.contains(filter.as_str()) {
            return Err(GateError::DiffUnavailable {
                filter: filter.as_str().to_string(),
                reason: "fatal: bad revision".to_string(),
            });
        }
        if self.base_missing {
            return Ok(DiffResult::BaseUnresolvable);
        }
        if self.touches(filter.as_str()) {
            Ok(DiffResult::Changed)
        } else {
            Ok(DiffResult::Unchanged)
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingStop
// ---------------------------------------------------------------------------

/// Stop primitive that records every call.
///
/// Behaves like a real orchestrator: the first request for an execution is
/// `Requested`, later ones `AlreadyRequested`.
#[derive(Debug, Default)]
pub struct RecordingStop {
    failure: Option<String>,
    calls: Mutex<Vec<ExecutionHandle>>,
}

impl RecordingStop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `StopRequestFailed` carrying `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ExecutionHandle> {
        self.calls.lock().unwrap().clone()
    }

    /// Executions a stop was requested for, without repeats.
    pub fn stopped(&self) -> HashSet<ExecutionHandle> {
        self.calls().into_iter().collect()
    }
}

#[async_trait]
impl StopPrimitive for RecordingStop {
    async fn stop(&self, execution: &ExecutionHandle) -> Result<StopAck> {
        let mut calls = self.calls.lock().unwrap();
        let seen = calls.contains(execution);
        calls.push(execution.clone());

        if let Some(reason) = &self.failure {
            return Err(GateError::StopRequestFailed {
                execution: execution.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(if seen {
            StopAck::AlreadyRequested
        } else {
            StopAck::Requested
        })
    }
}
