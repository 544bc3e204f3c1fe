//! Shared setup for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use ferroprot_config::DefaultsConfig;
use ferroprot_jobs::{PollSettings, RemoteJobService, RemotePoll, RetryPolicy, ServiceError};
use ferroprot_pipeline::dry_run::{SimulatedJobService, SimulatedScorer};
use ferroprot_pipeline::{Backends, Endpoints, PipelineService, StageRequest};
use ferroprot_store::ArtifactStore;
use ferroprot_test_utils::fixtures::zinc_site_pdb;
use ferroprot_test_utils::temp_store;

pub const TARGET_SEQUENCE: &str = "MKVLAGWEHRT";

/// A scripted reply for one submission.
pub enum Scripted {
    Fail(String),
    Output(Value),
}

type Rule = Box<dyn Fn(&str, &Value) -> Option<Scripted> + Send + Sync>;

/// The simulator, except where `rule` scripts a reply for a submission.
pub struct ScriptedService {
    inner: SimulatedJobService,
    rule: Rule,
    scripted: Mutex<HashMap<String, RemotePoll>>,
    next: AtomicUsize,
}

impl ScriptedService {
    pub fn new(rule: impl Fn(&str, &Value) -> Option<Scripted> + Send + Sync + 'static) -> Self {
        Self {
            inner: SimulatedJobService::new(),
            rule: Box::new(rule),
            scripted: Mutex::new(HashMap::new()),
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteJobService for ScriptedService {
    async fn submit(&self, endpoint: &str, payload: &Value) -> Result<String, ServiceError> {
        let Some(reply) = (self.rule)(endpoint, payload) else {
            return self.inner.submit(endpoint, payload).await;
        };
        let id = format!("scripted-{endpoint}-{}", self.next.fetch_add(1, Ordering::SeqCst));
        let poll = match reply {
            Scripted::Fail(message) => RemotePoll::failed(message),
            Scripted::Output(output) => RemotePoll::completed(output),
        };
        self.scripted.lock().unwrap().insert(id.clone(), poll);
        Ok(id)
    }

    async fn poll(&self, endpoint: &str, job_id: &str) -> Result<RemotePoll, ServiceError> {
        if let Some(poll) = self.scripted.lock().unwrap().get(job_id) {
            return Ok(poll.clone());
        }
        self.inner.poll(endpoint, job_id).await
    }
}

/// Backends over `jobs` with the simulated scorer and no waiting.
pub fn backends(jobs: Arc<dyn RemoteJobService>) -> Backends {
    Backends::new(jobs, Endpoints::by_service_name())
        .with_scorer(Arc::new(SimulatedScorer))
        .with_retry(RetryPolicy::no_delay(1))
        .with_poll(PollSettings { interval: Duration::ZERO, max_wait: Duration::from_secs(30) })
}

pub fn service(jobs: Arc<dyn RemoteJobService>) -> (TempDir, ArtifactStore, PipelineService) {
    let (dir, store) = temp_store();
    let svc = PipelineService::new(store.clone(), backends(jobs), DefaultsConfig::default());
    (dir, store, svc)
}

/// Structure-only request on the zinc-site fixture, single tier.
pub fn request(extra: Value) -> StageRequest {
    let mut args = json!({
        "target_pdb": zinc_site_pdb(TARGET_SEQUENCE),
        "conservation_tiers": [0.3],
        "af2_plddt_cutoff": 0.0,
    });
    if let (Some(base), Some(extra)) = (args.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    StageRequest::from_value(args).expect("valid request")
}

pub fn event_kinds(store: &ArtifactStore, run_id: &str) -> Vec<String> {
    let text = store.read_text(run_id, "events.jsonl").unwrap_or_default();
    text.lines()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .filter_map(|v| v["kind"].as_str().map(str::to_string))
        .collect()
}
