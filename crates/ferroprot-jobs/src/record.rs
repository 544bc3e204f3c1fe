//! Persisted job records (`jobs/<key>.json`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferroprot_store::safe_component;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: String,
    pub endpoint: String,
    pub remote_job_id: String,
    pub fingerprint: Fingerprint,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// How many times a job has been submitted under this key.
    #[serde(default)]
    pub submissions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn path_for(key: &str) -> String {
        format!("jobs/{}.json", safe_component(key))
    }

    /// A record that may be resumed for a request with `fingerprint`.
    pub fn is_reusable_for(&self, fingerprint: &Fingerprint) -> bool {
        &self.fingerprint == fingerprint && self.status != JobStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: JobStatus) -> JobRecord {
        JobRecord {
            key: "msa".into(),
            endpoint: "ep".into(),
            remote_job_id: "j1".into(),
            fingerprint: Fingerprint::of(&1).unwrap(),
            status,
            submitted_at: Utc::now(),
            updated_at: Utc::now(),
            submissions: 1,
            last_error: None,
        }
    }

    #[test]
    fn test_failed_jobs_are_not_reused() {
        let fp = Fingerprint::of(&1).unwrap();
        assert!(record(JobStatus::Running).is_reusable_for(&fp));
        assert!(record(JobStatus::Completed).is_reusable_for(&fp));
        assert!(!record(JobStatus::Failed).is_reusable_for(&fp));
        assert!(!record(JobStatus::Running).is_reusable_for(&Fingerprint::of(&2).unwrap()));
    }

    #[test]
    fn test_path_is_sanitized() {
        assert_eq!(JobRecord::path_for("af2_30/s 1"), "jobs/af2_30_s_1.json");
    }
}
