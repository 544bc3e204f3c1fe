//! Synchronous scoring service (SoluProt).
//!
//! Contract: `POST {url}` with `{"sequences": [{id, sequence}]}` →
//! `{"results": [{id, score}]}`. Entries without a numeric score are ignored.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use ferroprot_common::SequenceRecord;

use crate::error::{JobError, Result};
use crate::retry::RetryPolicy;
use crate::service::ServiceError;

pub const SERVICE: &str = "soluprot";

#[async_trait]
pub trait SequenceScorer: Send + Sync {
    async fn score(&self, sequences: &[SequenceRecord]) -> std::result::Result<BTreeMap<String, f64>, ServiceError>;
}

pub struct HttpScoringService {
    client: Client,
    url: String,
}

impl HttpScoringService {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JobError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { client, url: url.into() })
    }
}

pub fn parse_scores(body: &Value) -> std::result::Result<BTreeMap<String, f64>, ServiceError> {
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| ServiceError::fatal(format!("scoring response missing results: {}", super::short(body))))?;
    Ok(results
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_str).filter(|s| !s.is_empty())?;
            let score = item.get("score").and_then(Value::as_f64)?;
            Some((id.to_string(), score))
        })
        .collect())
}

#[async_trait]
impl SequenceScorer for HttpScoringService {
    #[instrument(skip(self, sequences), fields(n = sequences.len()))]
    async fn score(&self, sequences: &[SequenceRecord]) -> std::result::Result<BTreeMap<String, f64>, ServiceError> {
        let payload = json!({
            "sequences": sequences.iter().map(|s| json!({"id": s.id, "sequence": s.sequence})).collect::<Vec<_>>(),
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::from_http(status.as_u16(), &body, None));
        }
        let body: Value = resp.json().await.map_err(|e| ServiceError::fatal(format!("undecodable response: {e}")))?;
        let scores = parse_scores(&body)?;
        debug!(scored = scores.len(), "Scoring response received");
        Ok(scores)
    }
}

/// Score through `policy`, mapping exhaustion onto the job error taxonomy.
pub async fn score_with_retry(scorer: &dyn SequenceScorer, policy: &RetryPolicy, sequences: &[SequenceRecord]) -> Result<BTreeMap<String, f64>> {
    policy
        .run("score", |e: &ServiceError| e.is_retryable().then(|| e.retry_after()), || scorer.score(sequences))
        .await
        .map_err(|e| match e.error {
            ServiceError::Transient { message, .. } => JobError::Transient { attempts: e.attempts, message },
            ServiceError::Fatal { status, message } => JobError::Rejected { status, message },
        })
}
