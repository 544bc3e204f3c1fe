//! Read-only artifact access: the only file-system exposure outside the
//! pipeline itself. Listing is bounded in depth and count, reading in bytes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use ferroprot_pipeline::PipelineService;

use super::{parse_args, PipelineTool};

const DEFAULT_MAX_DEPTH: usize = 4;
const MAX_DEPTH_CAP: usize = 16;
const DEFAULT_LIST_LIMIT: usize = 200;
const LIST_LIMIT_CAP: usize = 5000;
const DEFAULT_MAX_BYTES: u64 = 2_000_000;
const MAX_BYTES_CAP: u64 = 20_000_000;

// ─────────────────────────────────────────────
//  pipeline.list_artifacts
// ─────────────────────────────────────────────

pub struct ListArtifactsTool {
    service: Arc<PipelineService>,
}

impl ListArtifactsTool {
    pub fn new(service: Arc<PipelineService>) -> Self { Self { service } }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListArtifactsArgs {
    run_id: String,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl PipelineTool for ListArtifactsTool {
    fn name(&self) -> &str { "pipeline.list_artifacts" }

    fn description(&self) -> &str {
        "List artifact paths under a run directory, optionally below a prefix such as tiers/30."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "run_id": { "type": "string" },
                "prefix": { "type": "string" },
                "max_depth": { "type": "integer", "default": DEFAULT_MAX_DEPTH, "maximum": MAX_DEPTH_CAP },
                "limit": { "type": "integer", "default": DEFAULT_LIST_LIMIT, "maximum": LIST_LIMIT_CAP }
            },
            "required": ["run_id"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let args: ListArtifactsArgs = parse_args(self.name(), params)?;
        let max_depth = args.max_depth.unwrap_or(DEFAULT_MAX_DEPTH).clamp(1, MAX_DEPTH_CAP);
        let limit = args.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(LIST_LIMIT_CAP);
        let artifacts = self.service.store().list_artifacts(&args.run_id, args.prefix.as_deref(), max_depth, limit)?;
        Ok(json!({
            "run_id": args.run_id,
            "count": artifacts.len(),
            "truncated": artifacts.len() >= limit,
            "artifacts": artifacts,
        }))
    }
}

// ─────────────────────────────────────────────
//  pipeline.read_artifact
// ─────────────────────────────────────────────

pub struct ReadArtifactTool {
    service: Arc<PipelineService>,
}

impl ReadArtifactTool {
    pub fn new(service: Arc<PipelineService>) -> Self { Self { service } }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadArtifactArgs {
    run_id: String,
    path: String,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    max_bytes: Option<u64>,
    /// Return the bytes base64-encoded instead of as UTF-8 text.
    #[serde(default)]
    base64: bool,
}

#[async_trait]
impl PipelineTool for ReadArtifactTool {
    fn name(&self) -> &str { "pipeline.read_artifact" }

    fn description(&self) -> &str {
        "Read a window of an artifact file under a run directory. Text is decoded as \
         UTF-8 (invalid bytes replaced); set base64=true for binary files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "run_id": { "type": "string" },
                "path": { "type": "string" },
                "offset": { "type": "integer", "default": 0 },
                "max_bytes": { "type": "integer", "default": DEFAULT_MAX_BYTES, "maximum": MAX_BYTES_CAP },
                "base64": { "type": "boolean", "default": false }
            },
            "required": ["run_id", "path"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let args: ReadArtifactArgs = parse_args(self.name(), params)?;
        if args.path.trim().is_empty() {
            anyhow::bail!("pipeline.read_artifact: path is required");
        }
        let max_bytes = args.max_bytes.unwrap_or(DEFAULT_MAX_BYTES).min(MAX_BYTES_CAP);
        let chunk = self.service.store().read_window(&args.run_id, &args.path, args.offset, max_bytes)?;

        let mut out = json!({
            "run_id": args.run_id,
            "path": chunk.path,
            "size": chunk.size,
            "offset": chunk.offset,
            "bytes_read": chunk.data.len(),
            "truncated": chunk.truncated,
        });
        if args.base64 {
            out["base64"] = json!(base64::engine::general_purpose::STANDARD.encode(&chunk.data));
        } else {
            out["encoding"] = json!("utf-8");
            out["text"] = json!(String::from_utf8_lossy(&chunk.data));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;
    use pretty_assertions::assert_eq;

    fn seeded() -> (tempfile::TempDir, Arc<PipelineService>) {
        let (dir, svc) = test_support::service();
        let store = svc.store();
        store.write_text("demo", "request.json", "{}").unwrap();
        store.write_text("demo", "tiers/30/designs.fasta", ">s1\nMKVLAGWEHRT\n").unwrap();
        store.write("demo", "tiers/30/af2/s1/blob.bin", &[0xff, 0x00, 0x41]).unwrap();
        (dir, svc)
    }

    #[tokio::test]
    async fn test_list_artifacts_with_prefix_and_depth() {
        let (_dir, svc) = seeded();
        let tool = ListArtifactsTool::new(svc);

        let out = tool.invoke(json!({ "run_id": "demo", "prefix": "tiers/30", "max_depth": 1 })).await.unwrap();
        let paths: Vec<&str> = out["artifacts"].as_array().unwrap().iter().filter_map(|a| a["path"].as_str()).collect();
        assert!(paths.contains(&"tiers/30/designs.fasta"));
        assert!(!paths.contains(&"tiers/30/af2/s1/blob.bin"));

        let out = tool.invoke(json!({ "run_id": "demo", "limit": 1 })).await.unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn test_list_artifacts_unknown_run_errors() {
        let (_dir, svc) = seeded();
        assert!(ListArtifactsTool::new(svc).invoke(json!({ "run_id": "other" })).await.is_err());
    }

    #[tokio::test]
    async fn test_read_artifact_window() {
        let (_dir, svc) = seeded();
        let tool = ReadArtifactTool::new(svc);
        let out = tool
            .invoke(json!({ "run_id": "demo", "path": "tiers/30/designs.fasta", "offset": 4, "max_bytes": 3 }))
            .await
            .unwrap();
        assert_eq!(out["text"], "MKV");
        assert_eq!(out["size"], 16);
        assert_eq!(out["bytes_read"], 3);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn test_read_artifact_base64() {
        let (_dir, svc) = seeded();
        let tool = ReadArtifactTool::new(svc);
        let out = tool
            .invoke(json!({ "run_id": "demo", "path": "tiers/30/af2/s1/blob.bin", "base64": true }))
            .await
            .unwrap();
        assert_eq!(out["base64"], "/wBB");
        assert_eq!(out["truncated"], false);
        assert!(out.get("text").is_none());
    }

    #[tokio::test]
    async fn test_read_artifact_rejects_escape() {
        let (_dir, svc) = seeded();
        let tool = ReadArtifactTool::new(svc);
        assert!(tool.invoke(json!({ "run_id": "demo", "path": "../demo/request.json" })).await.is_err());
        assert!(tool.invoke(json!({ "run_id": "demo", "path": "" })).await.is_err());
        assert!(tool.invoke(json!({ "run_id": "demo", "path": "request.json", "encoding": "latin-1" })).await.is_err());
    }
}
