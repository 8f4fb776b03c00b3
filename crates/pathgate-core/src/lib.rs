//! Pathgate Core - path-filtered execution gate
//!
//! Decides whether the change set between two revisions touches any of the
//! configured path filters and, when none is touched, asks the orchestrator
//! to stop the running execution:
//! - `diff`: the `DiffMatcher` seam and its git-backed implementation
//! - `stop`: the `StopPrimitive` seam, its adapters and the idempotency wrapper
//! - `gate`: the decision procedure tying both together
//!
//! Nothing in this crate reads the process environment; callers build a
//! [`GateInput`] explicitly.

pub mod diff;
pub mod error;
pub mod fakes;
pub mod filter;
pub mod gate;
pub mod revision;
pub mod stop;
pub mod telemetry;

pub use diff::{DiffMatcher, DiffResult, GitDiffMatcher};
pub use error::{GateError, Result};
pub use filter::{PathFilter, PathFilterSet};
pub use gate::{ExecutionGate, FilterEvaluation, GateDecision, GateInput, GateReport, StopOutcome};
pub use revision::{ExecutionHandle, RevisionRef};
pub use stop::{
    CommandStop, HttpStop, HttpStopConfig, IdempotentStop, NoopStop, StatusCheck, StopAck,
    StopPrimitive, STOP_REASON,
};
pub use telemetry::init_tracing;
