//! ferroprot-jobs: Talking to remote compute services.
//!
//! [`AsyncJobClient`] is the single path through which a stage runs a remote job:
//! it de-duplicates by parameter fingerprint, persists the remote job id before
//! polling, resumes an in-flight job instead of resubmitting, retries transient
//! failures through one [`RetryPolicy`], and marks the job completed only after
//! the caller has persisted its result.

pub mod client;
pub mod error;
pub mod fingerprint;
pub mod record;
pub mod retry;
pub mod runpod;
pub mod service;
pub mod services;

pub use client::{AsyncJobClient, JobOutcome, JobSpec, PollSettings};
pub use error::{JobError, Result};
pub use fingerprint::Fingerprint;
pub use record::{JobRecord, JobStatus};
pub use retry::{RetryExhausted, RetryPolicy};
pub use runpod::RunPodService;
pub use service::{RemoteJobService, RemotePoll, RemoteState, ServiceError};
pub use services::soluprot::{HttpScoringService, SequenceScorer};
