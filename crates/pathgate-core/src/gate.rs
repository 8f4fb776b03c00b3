//! Execution gate: decide whether a change set is relevant to the configured
//! path filters, and stop the running execution when it is not.
//!
//! Per invocation the gate moves `EVALUATING -> CONTINUE | STOPPED | FAILED`:
//! - no filters configured: CONTINUE without consulting the matcher
//! - any filter matches (first match short-circuits): CONTINUE
//! - the matcher fails before a match: FAILED (`Err`), no stop is issued
//! - every filter misses: the stop primitive is called once, then STOPPED
//!
//! A failed stop request does not flip STOPPED; it is logged and carried in
//! the report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::diff::{DiffMatcher, DiffResult};
use crate::error::{GateError, Result};
use crate::filter::{PathFilter, PathFilterSet};
use crate::revision::{ExecutionHandle, RevisionRef};
use crate::stop::{StopAck, StopPrimitive};

/// Everything one evaluation needs, supplied explicitly by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateInput {
    /// Previous revision. May not exist (first commit).
    pub base: RevisionRef,

    /// Revision being built.
    pub head: RevisionRef,

    /// Filters, OR-combined.
    pub filters: PathFilterSet,

    /// Execution to stop when nothing matches.
    pub execution: ExecutionHandle,
}

impl GateInput {
    pub fn new(
        base: RevisionRef,
        head: RevisionRef,
        filters: PathFilterSet,
        execution: ExecutionHandle,
    ) -> Self {
        Self {
            base,
            head,
            filters,
            execution,
        }
    }
}

/// Gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Continue,
    Stopped,
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateDecision::Continue => write!(f, "continue"),
            GateDecision::Stopped => write!(f, "stopped"),
        }
    }
}

/// Result of matching one filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterEvaluation {
    pub filter: PathFilter,
    pub result: DiffResult,
}

/// What happened to the stop request on the STOPPED path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopOutcome {
    Acknowledged { ack: StopAck },
    Failed { reason: String },
}

/// Diagnostic record of one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub decision: GateDecision,

    /// First filter that matched, if any.
    pub matched_filter: Option<PathFilter>,

    /// Filters checked, in order. Stops at the first match.
    pub evaluated: Vec<FilterEvaluation>,

    /// Digest of the ordered filter configuration.
    pub filters_digest: String,

    pub base: RevisionRef,
    pub head: RevisionRef,
    pub execution: ExecutionHandle,

    /// Set only for STOPPED.
    pub stop: Option<StopOutcome>,

    pub evaluated_at: DateTime<Utc>,
}

impl GateReport {
    fn new(input: &GateInput, decision: GateDecision) -> Self {
        Self {
            decision,
            matched_filter: None,
            evaluated: Vec::new(),
            filters_digest: input.filters.digest(),
            base: input.base.clone(),
            head: input.head.clone(),
            execution: input.execution.clone(),
            stop: None,
            evaluated_at: Utc::now(),
        }
    }

    /// STOPPED, but the stop request itself failed; the execution may still
    /// be running.
    pub fn stop_failed(&self) -> bool {
        matches!(self.stop, Some(StopOutcome::Failed { .. }))
    }
}

/// Path-filtered execution gate.
pub struct ExecutionGate<M, S> {
    matcher: M,
    stop: S,
}

impl<M: DiffMatcher, S: StopPrimitive> ExecutionGate<M, S> {
    pub fn new(matcher: M, stop: S) -> Self {
        Self { matcher, stop }
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn stop_primitive(&self) -> &S {
        &self.stop
    }

    /// Evaluate the gate once for `input`.
    ///
    /// Returns `Err` only for `DiffUnavailable`; stop failures are reported
    /// through [`GateReport::stop`].
    pub async fn evaluate(&self, input: &GateInput) -> Result<GateReport> {
        info!(
            head = %input.head,
            base = %input.base,
            execution = %input.execution,
            filters = input.filters.len(),
            "evaluating path filters"
        );

        // OR over zero filters is false, but no filters means no restriction.
        if input.filters.is_empty() {
            info!("no path filters configured; continuing");
            return Ok(GateReport::new(input, GateDecision::Continue));
        }

        let mut report = GateReport::new(input, GateDecision::Continue);

        for filter in &input.filters {
            let result = match self.matcher.matches(&input.base, &input.head, filter).await {
                Ok(result) => result,
                Err(e) => {
                    error!(filter = %filter, error = %e, "diff unavailable; aborting gate");
                    return Err(e);
                }
            };
            debug!(filter = %filter, ?result, "filter evaluated");
            report.evaluated.push(FilterEvaluation {
                filter: filter.clone(),
                result,
            });

            if result.is_match() {
                info!(filter = %filter, "commit went through filters; continuing");
                report.matched_filter = Some(filter.clone());
                return Ok(report);
            }
        }

        let checked: Vec<&str> = input.filters.iter().map(PathFilter::as_str).collect();
        info!(
            execution = %input.execution,
            filters = ?checked,
            "no filter matched, requesting stop"
        );
        report.decision = GateDecision::Stopped;
        report.stop = Some(match self.stop.stop(&input.execution).await {
            Ok(ack) => StopOutcome::Acknowledged { ack },
            Err(e) => {
                error!(
                    execution = %input.execution,
                    error = %e,
                    "stop request failed; execution may keep running"
                );
                StopOutcome::Failed {
                    reason: match e {
                        GateError::StopRequestFailed { reason, .. } => reason,
                        other => other.to_string(),
                    },
                }
            }
        });

        Ok(report)
    }
}
