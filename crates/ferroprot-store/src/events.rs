//! Append-only run timeline persisted as `events.jsonl`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    RunCompleted,
    RunFailed,
    RequestChanged,
    StageStarted,
    StageCompleted,
    StageSkipped,
    StageFailed,
    JobSubmitted,
    JobResumed,
    JobCompleted,
    Recovery,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RunEvent {
    pub fn new(run_id: &str, kind: EventKind, stage: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            run_id: run_id.to_string(),
            kind,
            stage: stage.map(str::to_string),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Parse an `events.jsonl` body, skipping lines that are not valid events.
pub fn parse_events(text: &str) -> Vec<RunEvent> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}
