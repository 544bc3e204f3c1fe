//! Fake remote services for exercising the job client and the pipeline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use ferroprot_common::SequenceRecord;
use ferroprot_jobs::{RemoteJobService, RemotePoll, SequenceScorer, ServiceError};

/// Wraps another service and records every submission.
pub struct RecordingService {
    inner: Arc<dyn RemoteJobService>,
    submissions: Mutex<Vec<(String, Value)>>,
    polls: AtomicUsize,
}

impl RecordingService {
    pub fn new(inner: Arc<dyn RemoteJobService>) -> Self {
        Self { inner, submissions: Mutex::new(Vec::new()), polls: AtomicUsize::new(0) }
    }

    pub fn submissions(&self) -> Vec<(String, Value)> {
        self.submissions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn submit_count(&self) -> usize {
        self.submissions().len()
    }

    pub fn submit_count_for(&self, endpoint: &str) -> usize {
        self.submissions().iter().filter(|(e, _)| e == endpoint).count()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteJobService for RecordingService {
    async fn submit(&self, endpoint: &str, payload: &Value) -> Result<String, ServiceError> {
        if let Ok(mut subs) = self.submissions.lock() {
            subs.push((endpoint.to_string(), payload.clone()));
        }
        self.inner.submit(endpoint, payload).await
    }

    async fn poll(&self, endpoint: &str, job_id: &str) -> Result<RemotePoll, ServiceError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.poll(endpoint, job_id).await
    }
}

#[derive(Debug, Clone)]
enum FailureMode {
    Submit(ServiceError),
    Job(String),
}

/// A service whose submissions or jobs always fail.
#[derive(Clone)]
pub struct FailingService {
    mode: FailureMode,
    endpoints: Option<Vec<String>>,
    fallback: Option<Arc<dyn RemoteJobService>>,
}

impl FailingService {
    /// Every submission is refused with `error`.
    pub fn rejecting(error: ServiceError) -> Self {
        Self { mode: FailureMode::Submit(error), endpoints: None, fallback: None }
    }

    /// Submissions succeed, every job reports `FAILED` with `message`.
    pub fn failing_jobs(message: impl Into<String>) -> Self {
        Self { mode: FailureMode::Job(message.into()), endpoints: None, fallback: None }
    }

    /// Only fail on `endpoint`; everything else goes to `fallback`.
    pub fn only_on(mut self, endpoint: &str, fallback: Arc<dyn RemoteJobService>) -> Self {
        self.endpoints.get_or_insert_with(Vec::new).push(endpoint.to_string());
        self.fallback = Some(fallback);
        self
    }

    fn applies_to(&self, endpoint: &str) -> bool {
        self.endpoints.as_ref().map_or(true, |e| e.iter().any(|x| x == endpoint))
    }
}

#[async_trait]
impl RemoteJobService for FailingService {
    async fn submit(&self, endpoint: &str, payload: &Value) -> Result<String, ServiceError> {
        if !self.applies_to(endpoint) {
            if let Some(fallback) = &self.fallback {
                return fallback.submit(endpoint, payload).await;
            }
        }
        match &self.mode {
            FailureMode::Submit(err) => Err(err.clone()),
            FailureMode::Job(_) => Ok(format!("failing-{endpoint}")),
        }
    }

    async fn poll(&self, endpoint: &str, job_id: &str) -> Result<RemotePoll, ServiceError> {
        if !self.applies_to(endpoint) {
            if let Some(fallback) = &self.fallback {
                return fallback.poll(endpoint, job_id).await;
            }
        }
        match &self.mode {
            FailureMode::Submit(err) => Err(err.clone()),
            FailureMode::Job(message) => Ok(RemotePoll::failed(message.clone())),
        }
    }
}

/// Scores sequences from a fixed table; unknown ids get `default`.
#[derive(Debug, Clone, Default)]
pub struct FixedScorer {
    pub scores: BTreeMap<String, f64>,
    pub default: f64,
}

impl FixedScorer {
    pub fn constant(score: f64) -> Self {
        Self { scores: BTreeMap::new(), default: score }
    }
}

#[async_trait]
impl SequenceScorer for FixedScorer {
    async fn score(&self, sequences: &[SequenceRecord]) -> Result<BTreeMap<String, f64>, ServiceError> {
        Ok(sequences
            .iter()
            .map(|s| (s.id.clone(), self.scores.get(&s.id).copied().unwrap_or(self.default)))
            .collect())
    }
}
