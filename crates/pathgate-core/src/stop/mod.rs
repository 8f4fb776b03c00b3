//! Stop primitive: the capability to request termination of a running
//! execution.
//!
//! Backends:
//! - [`CommandStop`]: runs an external command (AWS CLI preset for CodePipeline)
//! - [`HttpStop`]: POSTs a stop request to an orchestrator endpoint
//! - [`NoopStop`]: logs the request only
//!
//! [`IdempotentStop`] wraps any backend so repeat calls for the same
//! execution are answered from the first acknowledgement.

pub mod command;
pub mod http;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::revision::ExecutionHandle;

pub use command::{CommandStop, StatusCheck};
pub use http::{HttpStop, HttpStopConfig};

/// Reason attached to stop requests issued by the gate.
pub const STOP_REASON: &str = "no configured path filter matched the change set";

/// Acknowledgement of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAck {
    /// The orchestrator accepted a new stop request.
    Requested,

    /// A stop was already in progress for this execution.
    AlreadyRequested,
}

/// Request termination of a running execution.
///
/// Fire-and-forget: implementations return once the request is accepted and
/// do not wait for the execution to be torn down. A repeat call for the same
/// execution must not fail where the first call succeeded.
#[async_trait]
pub trait StopPrimitive: Send + Sync {
    async fn stop(&self, execution: &ExecutionHandle) -> Result<StopAck>;
}

#[async_trait]
impl<T: StopPrimitive + ?Sized> StopPrimitive for std::sync::Arc<T> {
    async fn stop(&self, execution: &ExecutionHandle) -> Result<StopAck> {
        (**self).stop(execution).await
    }
}

#[async_trait]
impl<T: StopPrimitive + ?Sized> StopPrimitive for Box<T> {
    async fn stop(&self, execution: &ExecutionHandle) -> Result<StopAck> {
        (**self).stop(execution).await
    }
}

/// Backend that only logs. Used for dry runs.
#[derive(Debug, Default, Clone)]
pub struct NoopStop;

#[async_trait]
impl StopPrimitive for NoopStop {
    async fn stop(&self, execution: &ExecutionHandle) -> Result<StopAck> {
        info!(execution = %execution, "dry run: stop request not sent");
        Ok(StopAck::Requested)
    }
}

/// Single-shot wrapper around a stop backend.
///
/// The first successful acknowledgement per execution is cached; later calls
/// return it without reaching the backend. Failures are not cached, so a
/// caller may try again.
#[derive(Debug)]
pub struct IdempotentStop<S> {
    inner: S,
    acknowledged: Mutex<HashMap<ExecutionHandle, StopAck>>,
}

impl<S> IdempotentStop<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            acknowledged: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn cached(&self, execution: &ExecutionHandle) -> Option<StopAck> {
        self.acknowledged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(execution)
            .copied()
    }
}

#[async_trait]
impl<S: StopPrimitive> StopPrimitive for IdempotentStop<S> {
    async fn stop(&self, execution: &ExecutionHandle) -> Result<StopAck> {
        if let Some(ack) = self.cached(execution) {
            debug!(execution = %execution, ?ack, "stop already acknowledged");
            return Ok(ack);
        }

        let ack = self.inner.stop(execution).await?;
        self.acknowledged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(execution.clone())
            .or_insert(ack);
        Ok(ack)
    }
}
