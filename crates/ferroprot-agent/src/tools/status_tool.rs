//! Run status and run listing.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use ferroprot_pipeline::PipelineService;
use ferroprot_store::RunState;

use super::{parse_args, PipelineTool};

const DEFAULT_RUN_LIMIT: usize = 50;
const MAX_RUN_LIMIT: usize = 1000;

// ─────────────────────────────────────────────
//  pipeline.status
// ─────────────────────────────────────────────

pub struct StatusTool {
    service: Arc<PipelineService>,
}

impl StatusTool {
    pub fn new(service: Arc<PipelineService>) -> Self { Self { service } }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusArgs {
    run_id: String,
    /// Include the event timeline.
    #[serde(default)]
    events: bool,
}

#[async_trait]
impl PipelineTool for StatusTool {
    fn name(&self) -> &str { "pipeline.status" }

    fn description(&self) -> &str {
        "Get the status of a run: state, last stage, error kind and warnings. \
         Set events=true to include the run's event timeline."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "run_id": { "type": "string" },
                "events": { "type": "boolean", "default": false }
            },
            "required": ["run_id"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let args: StatusArgs = parse_args(self.name(), params)?;
        let status = self.service.status(&args.run_id)?;
        let found = status.state != RunState::NotFound;
        let mut out = json!({ "run_id": status.run_id, "found": found, "status": status });
        if args.events && found {
            out["events"] = serde_json::to_value(self.service.events(&args.run_id)?)?;
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────
//  pipeline.list_runs
// ─────────────────────────────────────────────

pub struct ListRunsTool {
    service: Arc<PipelineService>,
}

impl ListRunsTool {
    pub fn new(service: Arc<PipelineService>) -> Self { Self { service } }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListRunsArgs {
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl PipelineTool for ListRunsTool {
    fn name(&self) -> &str { "pipeline.list_runs" }

    fn description(&self) -> &str { "List recent runs, newest first." }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "default": DEFAULT_RUN_LIMIT, "maximum": MAX_RUN_LIMIT }
            },
            "additionalProperties": false
        })
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let args: ListRunsArgs = parse_args(self.name(), params)?;
        let limit = args.limit.unwrap_or(DEFAULT_RUN_LIMIT).min(MAX_RUN_LIMIT);
        let runs = self.service.list_runs(limit)?;
        Ok(json!({ "runs": runs }))
    }
}
