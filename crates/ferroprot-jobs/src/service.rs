//! The seam between the job client and a concrete remote compute backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Network failure, 5xx or rate limiting; worth retrying.
    #[error("transient: {message}")]
    Transient { status: Option<u16>, message: String, retry_after: Option<Duration> },

    #[error("fatal: {message}")]
    Fatal { status: Option<u16>, message: String },
}

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        ServiceError::Transient { status: None, message: message.into(), retry_after: None }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ServiceError::Fatal { status: None, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::Transient { retry_after, .. } => *retry_after,
            ServiceError::Fatal { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::Transient { status, .. } | ServiceError::Fatal { status, .. } => *status,
        }
    }

    /// Classify an HTTP status: 429 and 5xx are transient, everything else fatal.
    pub fn from_http(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = format!("HTTP {status}: {}", body.chars().take(500).collect::<String>());
        if status == 429 || (500..600).contains(&status) {
            ServiceError::Transient { status: Some(status), message, retry_after }
        } else {
            ServiceError::Fatal { status: Some(status), message }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RemotePoll {
    pub state: RemoteState,
    /// Status string as reported by the backend (e.g. `IN_QUEUE`, `TIMED_OUT`).
    pub raw_status: String,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl RemotePoll {
    pub fn completed(output: Value) -> Self {
        Self { state: RemoteState::Completed, raw_status: "COMPLETED".into(), output: Some(output), error: None }
    }

    pub fn running() -> Self {
        Self { state: RemoteState::Running, raw_status: "IN_PROGRESS".into(), output: None, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { state: RemoteState::Failed, raw_status: "FAILED".into(), output: None, error: Some(error.into()) }
    }
}

/// An asynchronous job backend: submit returns a job id, poll reports progress.
#[async_trait]
pub trait RemoteJobService: Send + Sync {
    async fn submit(&self, endpoint: &str, payload: &Value) -> Result<String, ServiceError>;

    async fn poll(&self, endpoint: &str, job_id: &str) -> Result<RemotePoll, ServiceError>;
}
