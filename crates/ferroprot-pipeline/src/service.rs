//! Pipeline service: the entry point behind `pipeline.run` and friends.
//!
//! One invocation per run at a time, guarded twice: an in-process claim set
//! and the on-disk `running` status. `force` overrides the on-disk guard
//! (a stuck run) but never the in-process claim.
//!
//! Errors never escape `run`: every outcome is a [`RunReport`], and any
//! failure after the run id is known is also written to `status.json`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use ferroprot_common::fasta::to_fasta;
use ferroprot_config::{AppConfig, DefaultsConfig};
use ferroprot_jobs::AsyncJobClient;
use ferroprot_store::{
    new_run_id, normalize_run_id, ArtifactStore, EventKind, RunEvent, RunState, RunStatus, RunStatusStore,
};

use crate::backends::Backends;
use crate::context::{PipelineState, RunContext};
use crate::error::{PipelineError, Result};
use crate::request::{Stage, StageRequest};
use crate::runner::{StageFailure, StageRunner};
use crate::summary::{RunSummary, SUMMARY_FILE};
use crate::target::{resolve_target, Target};

pub const REQUEST_FILE: &str = "request.json";
pub const TARGET_FASTA: &str = "target.fasta";
pub const TARGET_PDB: &str = "target.pdb";
pub const RUN_ID_PREFIX: &str = "pipeline";

const VALIDATE_STAGE: &str = "validate";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunErrorInfo {
    pub kind: String,
    pub message: String,
}

/// Outcome of one `run` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub stage: String,
    /// True when the invocation did not touch the run.
    pub rejected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunReport {
    fn rejected(status: &RunStatus, kind: &str, message: impl Into<String>) -> Self {
        Self {
            run_id: status.run_id.clone(),
            state: status.state,
            stage: status.stage.clone(),
            rejected: true,
            error: Some(RunErrorInfo { kind: kind.to_string(), message: message.into() }),
            summary: None,
            warnings: status.warnings.clone(),
        }
    }

    fn from_status(status: &RunStatus, error: Option<&PipelineError>, summary: Option<RunSummary>) -> Self {
        Self {
            run_id: status.run_id.clone(),
            state: status.state,
            stage: status.stage.clone(),
            rejected: false,
            error: error.map(|e| RunErrorInfo { kind: e.kind().to_string(), message: e.to_string() }),
            summary,
            warnings: status.warnings.clone(),
        }
    }
}

// ── In-process claims ───────────────────────────────────────────────────────

type Claims = Arc<Mutex<HashSet<String>>>;

/// Held for the duration of an invocation; releases the run id on drop.
struct RunClaim {
    claims: Claims,
    run_id: String,
}

impl RunClaim {
    fn acquire(claims: &Claims, run_id: &str) -> Option<Self> {
        let mut held = claims.lock().unwrap_or_else(|e| e.into_inner());
        held.insert(run_id.to_string()).then(|| Self { claims: claims.clone(), run_id: run_id.to_string() })
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        let mut held = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.run_id);
    }
}

// ── Service ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PipelineService {
    store: ArtifactStore,
    status: RunStatusStore,
    backends: Backends,
    simulated: Backends,
    defaults: DefaultsConfig,
    claims: Claims,
}

impl PipelineService {
    pub fn new(store: ArtifactStore, backends: Backends, defaults: DefaultsConfig) -> Self {
        Self {
            status: RunStatusStore::new(store.clone()),
            store,
            backends,
            simulated: Backends::simulated(),
            defaults,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = ArtifactStore::new(config.storage.output_root.clone());
        let backends = Backends::from_config(config)?;
        info!(output_root = %config.storage.output_root.display(), "Pipeline service ready");
        Ok(Self::new(store, backends, config.defaults.clone()))
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn status(&self, run_id: &str) -> Result<RunStatus> {
        let run_id = normalize_run_id(run_id)?;
        Ok(self.status.get_status(&run_id)?)
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunStatus>> {
        Ok(self.status.list_runs(limit)?)
    }

    pub fn events(&self, run_id: &str) -> Result<Vec<RunEvent>> {
        let run_id = normalize_run_id(run_id)?;
        Ok(self.status.events(&run_id)?)
    }

    /// Start or resume a run. Without `run_id` a fresh id is generated.
    #[instrument(skip(self, request))]
    pub async fn run(&self, run_id: Option<&str>, request: StageRequest) -> RunReport {
        let run_id = match run_id {
            Some(raw) => match normalize_run_id(raw) {
                Ok(id) => id,
                Err(e) => {
                    let status = RunStatus::not_found(raw);
                    return RunReport::rejected(&status, "validation_error", e.to_string());
                }
            },
            None => new_run_id(RUN_ID_PREFIX),
        };

        let Some(_claim) = RunClaim::acquire(&self.claims, &run_id) else {
            let status = self.status.get_status(&run_id).unwrap_or_else(|_| RunStatus::not_found(&run_id));
            return RunReport::rejected(&status, "run_in_progress", "run is already executing in this process");
        };

        let current = match self.status.get_status(&run_id) {
            Ok(status) => status,
            Err(e) => return self.fail(&run_id, VALIDATE_STAGE, &PipelineError::from(e), Vec::new(), None),
        };
        if current.state == RunState::Running {
            if !request.force {
                info!(%run_id, stage = %current.stage, "Run already running; rejecting");
                return RunReport::rejected(&current, "run_in_progress", "run is already running; pass force=true to take it over");
            }
            warn!(%run_id, stage = %current.stage, "Taking over a run marked running");
        }

        match self.invoke(&run_id, request).await {
            Ok(report) => report,
            Err(e) => self.fail(&run_id, VALIDATE_STAGE, &e, Vec::new(), None),
        }
    }

    async fn invoke(&self, run_id: &str, mut request: StageRequest) -> Result<RunReport> {
        request.fill_defaults(&self.defaults);
        let target = match resolve_target(&request) {
            Ok(target) => target,
            Err(e) => return Ok(self.fail(run_id, VALIDATE_STAGE, &e, Vec::new(), None)),
        };

        self.store.ensure_run_dir(run_id)?;
        self.persist_request(run_id, &request, &target)?;

        let stop_after = request.stop_after();
        self.status.set_status(RunStatus::new(run_id, Stage::Msa.as_str(), RunState::Running))?;
        self.event(run_id, EventKind::RunStarted, format!("Run started (stop_after={stop_after})"), Some(json!({
            "stop_after": stop_after,
            "force": request.force,
            "dry_run": request.dry_run,
            "auto_recover": request.auto_recover,
        })))?;
        info!(run_id, %stop_after, dry_run = request.dry_run, force = request.force, "Run started");

        let backends = if request.dry_run { &self.simulated } else { &self.backends };
        let ctx = RunContext {
            run_id: run_id.to_string(),
            jobs: AsyncJobClient::new(backends.jobs.clone(), self.store.clone())
                .with_retry(backends.retry.clone())
                .with_poll(backends.poll.clone()),
            scorer: backends.scorer.clone(),
            endpoints: backends.endpoints.clone(),
            retry: backends.retry.clone(),
            store: self.store.clone(),
            status: self.status.clone(),
            request,
        };
        let mut state = PipelineState::new(target);
        let outcome = StageRunner::new(&ctx).run(&mut state).await;
        let summary = RunSummary::from_state(run_id, stop_after, &state);

        match outcome {
            Ok(()) => {
                self.store.write_json(run_id, SUMMARY_FILE, &summary)?;
                let status = self.status.set_status(
                    RunStatus::new(run_id, stop_after.as_str(), RunState::Completed).with_warnings(state.warnings.clone()),
                )?;
                self.event(run_id, EventKind::RunCompleted, format!("Run completed through {stop_after}"), None)?;
                info!(run_id, %stop_after, warnings = state.warnings.len(), "Run completed");
                Ok(RunReport::from_status(&status, None, Some(summary)))
            }
            Err(StageFailure { stage, error }) => {
                if let Err(e) = self.store.write_json(run_id, SUMMARY_FILE, &summary) {
                    warn!(run_id, error = %e, "Could not write summary for failed run");
                }
                Ok(self.fail(run_id, stage.as_str(), &error, state.warnings, Some(summary)))
            }
        }
    }

    /// `request.json` (with a `request_changed` event against the previous
    /// one), `target.fasta` and `target.pdb`.
    fn persist_request(&self, run_id: &str, request: &StageRequest, target: &Target) -> Result<()> {
        if let Some(previous) = self.store.read_json_opt::<Value>(run_id, REQUEST_FILE) {
            let changed = request.diff(&previous)?;
            if !changed.is_empty() {
                let fields: Vec<&String> = changed.keys().collect();
                info!(run_id, ?fields, "Request changed since the previous invocation");
                self.event(
                    run_id,
                    EventKind::RequestChanged,
                    format!("Request changed: {}", fields.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", ")),
                    Some(Value::Object(changed.clone())),
                )?;
            }
        }
        self.store.write_json(run_id, REQUEST_FILE, request)?;
        self.store.write_text(run_id, TARGET_FASTA, &to_fasta(std::slice::from_ref(&target.query)))?;
        if let Some(pdb) = &target.pdb_text {
            self.store.write_text(run_id, TARGET_PDB, pdb)?;
        }
        Ok(())
    }

    fn event(&self, run_id: &str, kind: EventKind, message: impl Into<String>, data: Option<Value>) -> Result<()> {
        let mut ev = RunEvent::new(run_id, kind, None, message);
        if let Some(data) = data {
            ev = ev.with_data(data);
        }
        self.store.append_event(run_id, &ev)?;
        Ok(())
    }

    /// Record a failed invocation. Storage problems here are logged, not raised.
    fn fail(
        &self,
        run_id: &str,
        stage: &str,
        err: &PipelineError,
        warnings: Vec<String>,
        summary: Option<RunSummary>,
    ) -> RunReport {
        error!(run_id, stage, kind = err.kind(), error = %err, "Run failed");
        let status = RunStatus::new(run_id, stage, RunState::Failed)
            .with_error_kind(err.kind())
            .with_detail(err.to_string())
            .with_warnings(warnings);
        let status = match self.status.set_status(status.clone()) {
            Ok(written) => written,
            Err(e) => {
                warn!(run_id, error = %e, "Could not persist failed status");
                status
            }
        };
        let ev = RunEvent::new(run_id, EventKind::RunFailed, Some(stage), err.to_string())
            .with_data(json!({ "error_kind": err.kind() }));
        if let Err(e) = self.store.append_event(run_id, &ev) {
            warn!(run_id, error = %e, "Could not append run_failed event");
        }
        RunReport::from_status(&status, Some(err), summary)
    }
}
