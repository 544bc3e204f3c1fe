//! RunPod serverless backend.
//!
//! API: `POST {base}/{endpoint}/run` with `{"input": payload}` → `{"id": ...}`,
//! `GET {base}/{endpoint}/status/{id}` → `{"status": ..., "output": ...}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::JobError;
use crate::service::{RemoteJobService, RemotePoll, RemoteState, ServiceError};

pub const DEFAULT_BASE_URL: &str = "https://api.runpod.ai/v2";

pub struct RunPodService {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

/// Map a RunPod status string onto the client's state machine.
pub fn classify_status(status: &str) -> RemoteState {
    match status {
        "COMPLETED" | "COMPLETED_WITH_ERRORS" => RemoteState::Completed,
        "FAILED" | "CANCELLED" | "TIMED_OUT" => RemoteState::Failed,
        "IN_QUEUE" => RemoteState::Queued,
        _ => RemoteState::Running,
    }
}

fn from_reqwest(e: reqwest::Error) -> ServiceError {
    if e.is_decode() {
        ServiceError::fatal(format!("undecodable response: {e}"))
    } else {
        ServiceError::Transient { status: e.status().map(|s| s.as_u16()), message: e.to_string(), retry_after: None }
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Interpret a status document. A completed job whose output carries an
/// `error` field is reported as failed.
pub fn parse_status(body: &Value) -> Result<RemotePoll, ServiceError> {
    let raw = body
        .get("status")
        .or_else(|| body.get("state"))
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::fatal(format!("status response has no status: {body}")))?
        .to_string();
    let state = classify_status(&raw);
    let output = body.get("output").filter(|v| !v.is_null()).cloned();
    let output_error = output
        .as_ref()
        .and_then(|o| o.get("error"))
        .filter(|e| !e.is_null() && e.as_str() != Some(""))
        .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()));
    let body_error = body.get("error").and_then(Value::as_str).map(str::to_string);

    let poll = match state {
        RemoteState::Completed if output_error.is_some() => {
            RemotePoll { state: RemoteState::Failed, raw_status: raw, output, error: output_error }
        }
        RemoteState::Failed => RemotePoll { state, raw_status: raw, output, error: body_error.or(output_error) },
        _ => RemotePoll { state, raw_status: raw, output, error: None },
    };
    Ok(poll)
}

impl RunPodService {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>, timeout: Duration) -> Result<Self, JobError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JobError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string(), api_key })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key.expose_secret()),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ServiceError> {
        let resp = self.authorize(req).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let hint = retry_after(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::from_http(status.as_u16(), &body, hint));
        }
        resp.json::<Value>().await.map_err(from_reqwest)
    }
}

#[async_trait]
impl RemoteJobService for RunPodService {
    #[instrument(skip(self, payload))]
    async fn submit(&self, endpoint: &str, payload: &Value) -> Result<String, ServiceError> {
        let url = format!("{}/{}/run", self.base_url, endpoint);
        let body = self.send(self.client.post(&url).json(&json!({ "input": payload }))).await?;
        let id = match body.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(ServiceError::fatal(format!("RunPod response missing job id: {body}"))),
        };
        debug!(endpoint, job_id = %id, "RunPod job accepted");
        Ok(id)
    }

    async fn poll(&self, endpoint: &str, job_id: &str) -> Result<RemotePoll, ServiceError> {
        let url = format!("{}/{}/status/{}", self.base_url, endpoint, job_id);
        let body = self.send(self.client.get(&url)).await?;
        parse_status(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(classify_status("IN_QUEUE"), RemoteState::Queued);
        assert_eq!(classify_status("IN_PROGRESS"), RemoteState::Running);
        assert_eq!(classify_status("COMPLETED_WITH_ERRORS"), RemoteState::Completed);
        assert_eq!(classify_status("TIMED_OUT"), RemoteState::Failed);
        assert_eq!(classify_status("CANCELLED"), RemoteState::Failed);
    }

    #[test]
    fn test_parse_status_uses_state_fallback() {
        let p = parse_status(&json!({"state": "IN_PROGRESS"})).unwrap();
        assert_eq!(p.state, RemoteState::Running);
        assert!(parse_status(&json!({"id": "x"})).is_err());
    }

    #[test]
    fn test_completed_with_output_error_is_failure() {
        let p = parse_status(&json!({
            "status": "COMPLETED",
            "output": {"error": "persistent db uniref50 not found"}
        }))
        .unwrap();
        assert_eq!(p.state, RemoteState::Failed);
        assert_eq!(p.error.as_deref(), Some("persistent db uniref50 not found"));
    }

    #[test]
    fn test_failed_job_reports_error() {
        let p = parse_status(&json!({"status": "FAILED", "error": "CUDA OOM"})).unwrap();
        assert_eq!(p.state, RemoteState::Failed);
        assert_eq!(p.error.as_deref(), Some("CUDA OOM"));
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let svc = RunPodService::new("https://example.test/v2/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(svc.base_url, "https://example.test/v2");
    }
}
