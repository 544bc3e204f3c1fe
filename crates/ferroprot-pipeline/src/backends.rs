//! Remote services a run talks to, resolved once from configuration.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use ferroprot_config::AppConfig;
use ferroprot_jobs::services::{alphafold, mmseqs, proteinmpnn};
use ferroprot_jobs::{
    HttpScoringService, JobError, PollSettings, RemoteJobService, RetryPolicy, RunPodService, SequenceScorer,
};

use crate::dry_run::{SimulatedJobService, SimulatedScorer};

/// Endpoint ids per remote service. `None` means not configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub mmseqs: Option<String>,
    pub proteinmpnn: Option<String>,
    pub alphafold2: Option<String>,
}

impl Endpoints {
    /// Endpoints named after the services themselves, as the simulator expects.
    pub fn by_service_name() -> Self {
        Self {
            mmseqs: Some(mmseqs::SERVICE.to_string()),
            proteinmpnn: Some(proteinmpnn::SERVICE.to_string()),
            alphafold2: Some(alphafold::SERVICE.to_string()),
        }
    }

    fn require<'a>(id: &'a Option<String>, env: &str) -> Result<&'a str, JobError> {
        id.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| JobError::NotConfigured(format!("{env} is not set")))
    }

    pub fn mmseqs(&self) -> Result<&str, JobError> {
        Self::require(&self.mmseqs, "MMSEQS_ENDPOINT_ID")
    }

    pub fn proteinmpnn(&self) -> Result<&str, JobError> {
        Self::require(&self.proteinmpnn, "PROTEINMPNN_ENDPOINT_ID")
    }

    pub fn alphafold2(&self) -> Result<&str, JobError> {
        Self::require(&self.alphafold2, "ALPHAFOLD2_ENDPOINT_ID")
    }
}

/// Job backend, scoring backend, endpoints and the shared retry/poll bounds.
#[derive(Clone)]
pub struct Backends {
    pub jobs: Arc<dyn RemoteJobService>,
    pub scorer: Option<Arc<dyn SequenceScorer>>,
    pub endpoints: Endpoints,
    pub retry: RetryPolicy,
    pub poll: PollSettings,
}

impl Backends {
    pub fn new(jobs: Arc<dyn RemoteJobService>, endpoints: Endpoints) -> Self {
        Self { jobs, scorer: None, endpoints, retry: RetryPolicy::default(), poll: PollSettings::default() }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SequenceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// The RunPod job backend plus the optional HTTP scoring service.
    pub fn from_config(config: &AppConfig) -> Result<Self, JobError> {
        let runpod = &config.runpod;
        let api_key = runpod
            .api_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_string()));
        let timeout = Duration::from_secs(runpod.request_timeout_s.max(1));
        let jobs = RunPodService::new(runpod.base_url.clone(), api_key, timeout)?;

        let scorer: Option<Arc<dyn SequenceScorer>> = match config.soluprot.url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Some(Arc::new(HttpScoringService::new(
                url.trim(),
                Duration::from_secs(config.soluprot.timeout_s.max(1)),
            )?)),
            None => None,
        };

        let endpoints = Endpoints {
            mmseqs: runpod.mmseqs_endpoint_id.clone(),
            proteinmpnn: runpod.proteinmpnn_endpoint_id.clone(),
            alphafold2: runpod.alphafold2_endpoint_id.clone(),
        };

        let jobs_cfg = &config.jobs;
        Ok(Self {
            jobs: Arc::new(jobs),
            scorer,
            endpoints,
            retry: RetryPolicy::new(
                jobs_cfg.retry_max_attempts.max(1),
                Duration::from_millis(jobs_cfg.retry_base_delay_ms),
                Duration::from_millis(jobs_cfg.retry_max_delay_ms),
            ),
            poll: PollSettings {
                interval: Duration::from_millis(jobs_cfg.poll_interval_ms),
                max_wait: Duration::from_secs(jobs_cfg.max_wait_s),
            },
        })
    }

    /// Deterministic in-process services for `dry_run`.
    pub fn simulated() -> Self {
        Self::new(Arc::new(SimulatedJobService::new()), Endpoints::by_service_name())
            .with_scorer(Arc::new(SimulatedScorer))
            .with_retry(RetryPolicy::no_delay(1))
            .with_poll(PollSettings { interval: Duration::ZERO, max_wait: Duration::from_secs(60) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_endpoint_is_not_configured() {
        let e = Endpoints::default();
        let err = e.mmseqs().unwrap_err();
        assert!(matches!(err, JobError::NotConfigured(ref m) if m.contains("MMSEQS_ENDPOINT_ID")));
        let e = Endpoints { alphafold2: Some("  ".into()), ..Default::default() };
        assert!(e.alphafold2().is_err());
    }

    #[test]
    fn test_from_config_reads_endpoints_and_bounds() {
        let mut config = AppConfig::default();
        config.runpod.mmseqs_endpoint_id = Some("ep-mmseqs".into());
        config.jobs.poll_interval_ms = 250;
        config.jobs.retry_max_attempts = 2;
        let b = Backends::from_config(&config).unwrap();
        assert_eq!(b.endpoints.mmseqs().unwrap(), "ep-mmseqs");
        assert!(b.endpoints.proteinmpnn().is_err());
        assert!(b.scorer.is_none());
        assert_eq!(b.poll.interval, Duration::from_millis(250));
        assert_eq!(b.retry.max_attempts, 2);
    }
}
