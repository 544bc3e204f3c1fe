//! Per-invocation context and the state carried from one stage to the next.
//!
//! Each completed stage leaves a stamp at `stages/<stage>.json` recording the
//! fingerprint of its inputs and the artifacts it produced. A later invocation
//! reuses the stage only if the stamp's fingerprint matches and every listed
//! artifact still exists.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use ferroprot_bio::conservation::Conservation;
use ferroprot_bio::ligand_mask::LigandMask;
use ferroprot_common::{ChainPositions, SequenceRecord, TierKey};
use ferroprot_jobs::{AsyncJobClient, Fingerprint, JobError, RetryPolicy, SequenceScorer};
use ferroprot_store::{ArtifactStore, EventKind, RunEvent, RunState, RunStatus, RunStatusStore};

use crate::backends::Endpoints;
use crate::error::Result;
use crate::request::{Stage, StageRequest};
use crate::target::Target;

// ── Stage stamps ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStamp {
    pub stage: Stage,
    pub fingerprint: Fingerprint,
    pub completed_at: DateTime<Utc>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub notes: Value,
}

impl StageStamp {
    pub fn path_for(stage: Stage) -> String {
        format!("stages/{stage}.json")
    }
}

/// What a stage execution produced.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub outputs: Vec<String>,
    pub notes: Value,
    /// Set when an optional stage did not run; no stamp is written.
    pub skipped: Option<String>,
}

impl StageOutput {
    pub fn new(outputs: Vec<String>) -> Self {
        Self { outputs, notes: Value::Null, skipped: None }
    }

    pub fn with_notes(mut self, notes: Value) -> Self {
        self.notes = notes;
        self
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self { outputs: Vec::new(), notes: Value::Null, skipped: Some(reason.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Executed,
    Cached,
    Skipped,
    Failed,
}

// ── Run state ───────────────────────────────────────────────────────────────

/// Per-tier results, filled in stage order.
#[derive(Debug, Clone, Default)]
pub struct TierState {
    pub tier: f64,
    pub fixed: ChainPositions,
    pub native: Option<SequenceRecord>,
    pub designs: Vec<SequenceRecord>,
    pub soluble: Vec<SequenceRecord>,
    pub selected: Vec<SequenceRecord>,
    pub af2_scored: usize,
    pub novelty_hits: Option<usize>,
    pub errors: Vec<String>,
}

impl TierState {
    pub fn new(tier: f64) -> Self {
        Self { tier, ..Default::default() }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineState {
    pub target: Target,
    pub fingerprints: BTreeMap<Stage, Fingerprint>,
    pub outcomes: BTreeMap<Stage, StageOutcome>,
    pub msa_a3m: Option<String>,
    pub conservation: Option<Conservation>,
    pub ligand_mask: Option<LigandMask>,
    pub tiers: BTreeMap<TierKey, TierState>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl PipelineState {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            fingerprints: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            msa_a3m: None,
            conservation: None,
            ligand_mask: None,
            tiers: BTreeMap::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Fingerprint of an upstream stage that must already have run.
    pub fn upstream(&self, stage: Stage) -> Option<&str> {
        self.fingerprints.get(&stage).map(Fingerprint::as_str)
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

/// Everything a stage needs besides the running state.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub request: StageRequest,
    pub store: ArtifactStore,
    pub status: RunStatusStore,
    pub jobs: AsyncJobClient,
    pub scorer: Option<Arc<dyn SequenceScorer>>,
    pub endpoints: Endpoints,
    pub retry: RetryPolicy,
}

impl RunContext {
    pub fn force(&self) -> bool {
        self.request.force
    }

    pub fn event(&self, kind: EventKind, stage: Option<Stage>, message: impl Into<String>, data: Option<Value>) -> Result<()> {
        let stage_name = stage.map(|s| s.as_str());
        let mut ev = RunEvent::new(&self.run_id, kind, stage_name, message);
        if let Some(data) = data {
            ev = ev.with_data(data);
        }
        self.store.append_event(&self.run_id, &ev)?;
        Ok(())
    }

    /// Record a non-fatal problem in the state, the event log and the log stream.
    pub fn warn(&self, state: &mut PipelineState, stage: Stage, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        warn!(run_id = %self.run_id, stage = %stage, "{message}");
        self.event(EventKind::Warning, Some(stage), message.clone(), None)?;
        state.warnings.push(message);
        Ok(())
    }

    pub fn recovery(&self, stage: Stage, message: impl Into<String>, data: Value) -> Result<()> {
        let message = message.into();
        warn!(run_id = %self.run_id, stage = %stage, "Recovering: {message}");
        self.event(EventKind::Recovery, Some(stage), message, Some(data))
    }

    pub fn mark_running(&self, stage: Stage, warnings: &[String]) -> Result<RunStatus> {
        let status = RunStatus::new(&self.run_id, stage.as_str(), RunState::Running).with_warnings(warnings.to_vec());
        Ok(self.status.set_status(status)?)
    }

    pub fn scorer(&self) -> std::result::Result<&Arc<dyn SequenceScorer>, JobError> {
        self.scorer
            .as_ref()
            .ok_or_else(|| JobError::NotConfigured("SOLUPROT_URL is not set".to_string()))
    }

    /// The stamp for `stage`, if it can be reused for `fingerprint`.
    pub fn reusable_stamp(&self, stage: Stage, fingerprint: &Fingerprint) -> Option<StageStamp> {
        if self.force() {
            return None;
        }
        let stamp: StageStamp = self.store.read_json_opt(&self.run_id, &StageStamp::path_for(stage))?;
        if &stamp.fingerprint != fingerprint {
            debug!(run_id = %self.run_id, stage = %stage, "Stage inputs changed; re-running");
            return None;
        }
        if let Some(missing) = stamp.outputs.iter().find(|p| !self.store.exists(&self.run_id, p)) {
            debug!(run_id = %self.run_id, stage = %stage, missing = %missing, "Stage output missing; re-running");
            return None;
        }
        Some(stamp)
    }

    pub fn write_stamp(&self, stage: Stage, fingerprint: Fingerprint, output: &StageOutput) -> Result<StageStamp> {
        let stamp = StageStamp {
            stage,
            fingerprint,
            completed_at: Utc::now(),
            outputs: output.outputs.clone(),
            notes: output.notes.clone(),
        };
        self.store.write_json(&self.run_id, &StageStamp::path_for(stage), &stamp)?;
        Ok(stamp)
    }

    pub fn tier_path(&self, key: TierKey, name: &str) -> String {
        format!("{}/{name}", key.dir())
    }
}
