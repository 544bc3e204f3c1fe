//! Pipeline error taxonomy.
//!
//! Every failure that ends a run maps onto a stable [`PipelineError::kind`]
//! string, which is what `status.json` records as `error_kind`.

use ferroprot_bio::BioError;
use ferroprot_common::{FormatError, TierKey};
use ferroprot_jobs::JobError;
use ferroprot_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Query/structure identity {identity:.3} for chain {chain_id} is below the minimum {min_identity:.3}")]
    AlignmentQuality { chain_id: String, identity: f64, min_identity: f64 },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Tier {tier}: {count} design(s) mutated fixed positions ({examples})")]
    FixedPositionViolation { tier: TierKey, count: usize, examples: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bio(#[from] BioError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation(message.into())
    }

    /// Stable machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation_error",
            PipelineError::AlignmentQuality { .. } => "alignment_quality_error",
            PipelineError::Job(job) => match job {
                JobError::Transient { .. } | JobError::Timeout { .. } => "transient_service_error",
                JobError::Failed { .. } => "job_failed",
                JobError::Rejected { .. } => "service_rejected",
                JobError::Malformed { .. } => "malformed_service_output",
                JobError::NotConfigured(_) => "service_not_configured",
                JobError::Store(_) => "storage_error",
                JobError::Serialization(_) => "serialization_error",
            },
            PipelineError::FixedPositionViolation { .. } => "fixed_position_violation",
            PipelineError::Store(_) => "storage_error",
            PipelineError::Bio(_) | PipelineError::Format(_) => "data_error",
            PipelineError::Serialization(_) => "serialization_error",
        }
    }

    pub fn as_job(&self) -> Option<&JobError> {
        match self {
            PipelineError::Job(job) => Some(job),
            _ => None,
        }
    }
}
