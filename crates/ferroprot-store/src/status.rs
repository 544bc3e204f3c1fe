//! Run status document (`status.json`) and the run-level state machine values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artifacts::{ArtifactStore, EVENTS_FILE, INTERNAL_READ_LIMIT};
use crate::error::{Result, StoreError};
use crate::events::{parse_events, RunEvent};

pub const STATUS_FILE: &str = "status.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotFound,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::NotFound => "not_found",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: String,
    pub stage: String,
    pub state: RunState,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunStatus {
    pub fn not_found(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            stage: String::new(),
            state: RunState::NotFound,
            updated_at: Utc::now(),
            detail: None,
            error_kind: None,
            warnings: Vec::new(),
        }
    }

    pub fn new(run_id: &str, stage: &str, state: RunState) -> Self {
        Self {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            state,
            updated_at: Utc::now(),
            detail: None,
            error_kind: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Reads and writes `status.json` through an [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct RunStatusStore {
    artifacts: ArtifactStore,
}

impl RunStatusStore {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self { artifacts }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Current status; `not_found` when the run has no status document.
    pub fn get_status(&self, run_id: &str) -> Result<RunStatus> {
        match self.artifacts.read_json::<RunStatus>(run_id, STATUS_FILE) {
            Ok(status) => Ok(status),
            Err(StoreError::NotFound(_)) => Ok(RunStatus::not_found(run_id)),
            Err(e) => Err(e),
        }
    }

    /// Persist `status`, stamping `updated_at`. `not_found` is never written.
    pub fn set_status(&self, mut status: RunStatus) -> Result<RunStatus> {
        if status.state == RunState::NotFound {
            return Err(StoreError::InvalidStatus(status.run_id));
        }
        status.updated_at = Utc::now();
        self.artifacts.write_json(&status.run_id, STATUS_FILE, &status)?;
        Ok(status)
    }

    pub fn events(&self, run_id: &str) -> Result<Vec<RunEvent>> {
        match self.artifacts.read(run_id, EVENTS_FILE, INTERNAL_READ_LIMIT) {
            Ok(bytes) => Ok(parse_events(&String::from_utf8_lossy(&bytes))),
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Runs ordered newest first by `updated_at`, then by id descending.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunStatus>> {
        let mut runs: Vec<RunStatus> = self
            .artifacts
            .run_ids()?
            .into_iter()
            .map(|id| match self.get_status(&id) {
                Ok(status) => status,
                Err(e) => {
                    warn!(run_id = %id, error = %e, "Unreadable run status");
                    RunStatus::not_found(&id).with_detail(format!("unreadable {STATUS_FILE}: {e}"))
                }
            })
            .collect();
        runs.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RunStatusStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = RunStatusStore::new(ArtifactStore::new(dir.path()));
        (dir, s)
    }

    #[test]
    fn test_missing_run_is_not_found() {
        let (_d, s) = store();
        let st = s.get_status("nope").unwrap();
        assert_eq!(st.state, RunState::NotFound);
    }

    #[test]
    fn test_set_status_round_trips_and_stamps_time() {
        let (_d, s) = store();
        let mut draft = RunStatus::new("r1", "msa", RunState::Running);
        draft.updated_at = DateTime::<Utc>::MIN_UTC;
        let written = s.set_status(draft).unwrap();
        assert!(written.updated_at > DateTime::<Utc>::MIN_UTC);

        let read = s.get_status("r1").unwrap();
        assert_eq!(read, written);
        assert_eq!(read.state.as_str(), "running");
    }

    #[test]
    fn test_not_found_is_never_persisted() {
        let (_d, s) = store();
        assert!(s.set_status(RunStatus::not_found("r1")).is_err());
        assert!(!s.artifacts().exists("r1", STATUS_FILE));
    }

    #[test]
    fn test_list_runs_newest_first() {
        let (_d, s) = store();
        s.set_status(RunStatus::new("old", "msa", RunState::Completed)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.set_status(RunStatus::new("new", "design", RunState::Failed).with_detail("boom"))
            .unwrap();
        let runs = s.list_runs(10).unwrap();
        let ids: Vec<_> = runs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(runs[0].detail.as_deref(), Some("boom"));
        assert_eq!(s.list_runs(1).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_status_is_listed_with_detail() {
        let (_d, s) = store();
        s.set_status(RunStatus::new("good", "msa", RunState::Completed)).unwrap();
        s.artifacts().write_text("broken", STATUS_FILE, "{ not json").unwrap();

        let runs = s.list_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        let broken = runs.iter().find(|r| r.run_id == "broken").unwrap();
        assert_eq!(broken.state, RunState::NotFound);
        assert!(broken.detail.as_deref().unwrap().contains("unreadable status.json"));
        assert!(s.get_status("broken").is_err());
    }
}
