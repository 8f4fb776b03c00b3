//! Stop backend that calls an orchestrator's HTTP control endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{StopAck, StopPrimitive, STOP_REASON};
use crate::error::{GateError, Result};
use crate::revision::ExecutionHandle;

/// HTTP stop endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStopConfig {
    /// Endpoint receiving the stop request.
    pub url: String,
    /// Bearer token (optional).
    pub token: Option<String>,
}

impl HttpStopConfig {
    pub fn new(url: &str) -> Self {
        HttpStopConfig {
            url: url.trim().to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

#[derive(Debug, Serialize)]
struct StopRequestBody<'a> {
    execution_id: &'a str,
    reason: &'a str,
}

/// POSTs `{"execution_id", "reason"}` to the configured endpoint.
pub struct HttpStop {
    config: HttpStopConfig,
    http_client: reqwest::Client,
}

impl HttpStop {
    pub fn new(config: HttpStopConfig) -> Result<Self> {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(GateError::Configuration(format!(
                "stop url '{}' must be http(s)",
                config.url
            )));
        }
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pathgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GateError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(HttpStop {
            config,
            http_client,
        })
    }
}

/// Map a response status to an acknowledgement. `None` means failure.
fn ack_for_status(status: StatusCode) -> Option<StopAck> {
    if status.is_success() {
        Some(StopAck::Requested)
    } else if status == StatusCode::CONFLICT {
        Some(StopAck::AlreadyRequested)
    } else {
        None
    }
}

#[async_trait]
impl StopPrimitive for HttpStop {
    async fn stop(&self, execution: &ExecutionHandle) -> Result<StopAck> {
        let body = StopRequestBody {
            execution_id: execution.as_str(),
            reason: STOP_REASON,
        };

        let mut request = self.http_client.post(&self.config.url).json(&body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| GateError::StopRequestFailed {
            execution: execution.to_string(),
            reason: format!("request to {} failed: {}", self.config.url, e),
        })?;

        let status = response.status();
        match ack_for_status(status) {
            Some(StopAck::Requested) => {
                info!(execution = %execution, %status, "stop requested");
                Ok(StopAck::Requested)
            }
            Some(StopAck::AlreadyRequested) => {
                warn!(execution = %execution, "stop already in progress");
                Ok(StopAck::AlreadyRequested)
            }
            None => {
                let text = response.text().await.unwrap_or_default();
                Err(GateError::StopRequestFailed {
                    execution: execution.to_string(),
                    reason: format!("{} responded {}: {}", self.config.url, status, text.trim()),
                })
            }
        }
    }
}
