//! Resumable submit/poll client.
//!
//! A job is identified inside a run by its key (`msa`, `design_30`, `af2_30_s3`...).
//! The remote job id is written to `jobs/<key>.json` immediately after submission,
//! so a crashed or timed-out invocation picks the same job back up instead of
//! paying for a second one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use ferroprot_store::{ArtifactStore, EventKind, RunEvent};

use crate::error::{JobError, Result};
use crate::fingerprint::Fingerprint;
use crate::record::{JobRecord, JobStatus};
use crate::retry::{RetryExhausted, RetryPolicy};
use crate::service::{RemoteJobService, RemotePoll, RemoteState, ServiceError};

/// What to run. `stage` only labels events.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub key: String,
    pub stage: String,
    pub endpoint: String,
    pub payload: Value,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self { interval: Duration::from_secs(2), max_wait: Duration::from_secs(6 * 60 * 60) }
    }
}

#[derive(Debug, Clone)]
pub struct JobOutcome<T> {
    pub value: T,
    pub record: JobRecord,
    /// True when an already-submitted job was picked up instead of submitting.
    pub resumed: bool,
}

#[derive(Clone)]
pub struct AsyncJobClient {
    service: Arc<dyn RemoteJobService>,
    store: ArtifactStore,
    retry: RetryPolicy,
    poll: PollSettings,
}

fn retry_hint(err: &ServiceError) -> Option<Option<Duration>> {
    err.is_retryable().then(|| err.retry_after())
}

fn exhausted(e: RetryExhausted<ServiceError>) -> JobError {
    match e.error {
        ServiceError::Transient { message, .. } => JobError::Transient { attempts: e.attempts, message },
        ServiceError::Fatal { status, message } => JobError::Rejected { status, message },
    }
}

impl AsyncJobClient {
    pub fn new(service: Arc<dyn RemoteJobService>, store: ArtifactStore) -> Self {
        Self { service, store, retry: RetryPolicy::default(), poll: PollSettings::default() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Load the persisted record for `key`, if any.
    pub fn record(&self, run_id: &str, key: &str) -> Option<JobRecord> {
        self.store.read_json_opt(run_id, &JobRecord::path_for(key))
    }

    fn save(&self, run_id: &str, record: &mut JobRecord) -> Result<()> {
        record.updated_at = Utc::now();
        self.store.write_json(run_id, &JobRecord::path_for(&record.key), record)?;
        Ok(())
    }

    fn event(&self, run_id: &str, kind: EventKind, spec: &JobSpec, message: String, record: &JobRecord) -> Result<()> {
        let ev = RunEvent::new(run_id, kind, Some(&spec.stage), message).with_data(json!({
            "key": record.key,
            "endpoint": record.endpoint,
            "job_id": record.remote_job_id,
        }));
        self.store.append_event(run_id, &ev)?;
        Ok(())
    }

    /// Run `spec` to completion, reusing a persisted job when its fingerprint
    /// matches and it has not failed (unless `force`).
    ///
    /// `handle` receives the job output and must persist whatever the caller
    /// needs; the record is marked completed only after it returns `Ok`.
    pub async fn submit_or_resume<T, E, H>(&self, run_id: &str, spec: &JobSpec, force: bool, handle: H) -> std::result::Result<JobOutcome<T>, E>
    where
        H: FnOnce(&Value) -> std::result::Result<T, E>,
        E: From<JobError>,
    {
        let existing = self.record(run_id, &spec.key);
        let previous_submissions = existing.as_ref().map(|r| r.submissions).unwrap_or(0);

        if let Some(mut record) = existing.filter(|r| !force && r.is_reusable_for(&spec.fingerprint)) {
            info!(run_id, key = %spec.key, job_id = %record.remote_job_id, "Resuming remote job");
            self.event(run_id, EventKind::JobResumed, spec, format!("Resuming job {}", record.remote_job_id), &record)?;
            match self.wait(run_id, &mut record).await {
                Ok(output) => return self.finish(run_id, spec, record, &output, true, handle),
                // The backend no longer knows the job; fall through and resubmit.
                Err(JobError::Rejected { message, .. }) => {
                    warn!(run_id, key = %spec.key, error = %message, "Persisted job could not be resumed");
                    let ev = RunEvent::new(run_id, EventKind::Warning, Some(&spec.stage), format!("Job {} could not be resumed: {message}", record.remote_job_id));
                    self.store.append_event(run_id, &ev).map_err(JobError::from)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let job_id = self
            .retry
            .run("submit", retry_hint, || self.service.submit(&spec.endpoint, &spec.payload))
            .await
            .map_err(exhausted)?;

        let now = Utc::now();
        let mut record = JobRecord {
            key: spec.key.clone(),
            endpoint: spec.endpoint.clone(),
            remote_job_id: job_id,
            fingerprint: spec.fingerprint.clone(),
            status: JobStatus::Queued,
            submitted_at: now,
            updated_at: now,
            submissions: previous_submissions + 1,
            last_error: None,
        };
        self.save(run_id, &mut record)?;
        info!(run_id, key = %spec.key, job_id = %record.remote_job_id, "Remote job submitted");
        self.event(run_id, EventKind::JobSubmitted, spec, format!("Submitted job {}", record.remote_job_id), &record)?;

        let output = self.wait(run_id, &mut record).await?;
        self.finish(run_id, spec, record, &output, false, handle)
    }

    fn finish<T, E, H>(&self, run_id: &str, spec: &JobSpec, mut record: JobRecord, output: &Value, resumed: bool, handle: H) -> std::result::Result<JobOutcome<T>, E>
    where
        H: FnOnce(&Value) -> std::result::Result<T, E>,
        E: From<JobError>,
    {
        let value = handle(output)?;
        record.status = JobStatus::Completed;
        record.last_error = None;
        self.save(run_id, &mut record)?;
        self.event(run_id, EventKind::JobCompleted, spec, format!("Job {} completed", record.remote_job_id), &record)?;
        Ok(JobOutcome { value, record, resumed })
    }

    /// Poll until the job reaches a terminal state or `max_wait` elapses.
    async fn wait(&self, run_id: &str, record: &mut JobRecord) -> Result<Value> {
        let started = Instant::now();
        loop {
            let (endpoint, job_id) = (record.endpoint.clone(), record.remote_job_id.clone());
            let poll: RemotePoll = self
                .retry
                .run("poll", retry_hint, || self.service.poll(&endpoint, &job_id))
                .await
                .map_err(exhausted)?;

            match poll.state {
                RemoteState::Completed => {
                    return Ok(poll.output.unwrap_or(Value::Null));
                }
                RemoteState::Failed => {
                    let message = poll.error.unwrap_or_else(|| "no error detail".to_string());
                    record.status = JobStatus::Failed;
                    record.last_error = Some(format!("{}: {message}", poll.raw_status));
                    self.save(run_id, record)?;
                    return Err(JobError::Failed { job_id: record.remote_job_id.clone(), status: poll.raw_status, message });
                }
                RemoteState::Queued | RemoteState::Running => {
                    let status = if poll.state == RemoteState::Running { JobStatus::Running } else { JobStatus::Queued };
                    if record.status != status {
                        record.status = status;
                        self.save(run_id, record)?;
                    }
                    debug!(run_id, key = %record.key, status = %poll.raw_status, "Job not finished");
                }
            }

            let waited = started.elapsed();
            if waited >= self.poll.max_wait {
                record.last_error = Some(format!("still {} after {}s", poll.raw_status, waited.as_secs()));
                self.save(run_id, record)?;
                return Err(JobError::Timeout { job_id: record.remote_job_id.clone(), state: poll.raw_status, waited_s: waited.as_secs() });
            }
            tokio::time::sleep(self.poll.interval).await;
        }
    }
}
