//! Remote job error types.

use ferroprot_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Transient service error after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    #[error("Service rejected request: {message}")]
    Rejected { status: Option<u16>, message: String },

    #[error("Remote job {job_id} failed ({status}): {message}")]
    Failed { job_id: String, status: String, message: String },

    #[error("Remote job {job_id} still {state} after {waited_s}s")]
    Timeout { job_id: String, state: String, waited_s: u64 },

    #[error("Malformed output from {service}: {message}")]
    Malformed { service: String, message: String },

    #[error("Service not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn malformed(service: &str, message: impl Into<String>) -> Self {
        JobError::Malformed { service: service.to_string(), message: message.into() }
    }

    /// Transient failures and wait timeouts; both may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transient { .. } | JobError::Timeout { .. })
    }
}
