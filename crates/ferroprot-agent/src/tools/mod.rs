//! Tool-call boundary for ferroprot.
//!
//! Every operation the outside world can trigger is a `PipelineTool` registered in
//! a `ToolRegistry`. A call is a tool name plus a flat JSON argument map; unknown
//! argument names are rejected rather than ignored.
//!
//! Tool lifecycle:
//!   1. Implement `PipelineTool` for your type.
//!   2. Register with `ToolRegistry::register`.
//!   3. The stdio loop invokes tools via `ToolRegistry::invoke(name, params)`.

pub mod artifact_tool;
pub mod run_tool;
pub mod status_tool;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use ferroprot_pipeline::PipelineService;

// ─────────────────────────────────────────────
//  Core trait
// ─────────────────────────────────────────────

/// A callable pipeline operation.
///
/// # Minimal contract
/// - `name()` must be unique across the registry (e.g. `"pipeline.status"`).
/// - `parameters_schema()` returns a JSON Schema object for the argument map.
/// - `invoke()` receives the raw argument map and returns JSON output.
#[async_trait]
pub trait PipelineTool: Send + Sync {
    fn name(&self) -> &str;

    /// Short description shown to the caller's planner.
    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    async fn invoke(&self, params: Value) -> Result<Value>;

    /// Read-only tools never create or modify run directories.
    fn read_only(&self) -> bool { true }
}

/// Decode a flat argument map into `T`; a missing map counts as empty.
pub fn parse_args<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T> {
    let params = match params {
        Value::Null => json!({}),
        Value::Object(_) => params,
        other => anyhow::bail!("{tool}: arguments must be an object, got {other}"),
    };
    serde_json::from_value(params).with_context(|| format!("{tool}: invalid arguments"))
}

// ─────────────────────────────────────────────
//  Tool registry
// ─────────────────────────────────────────────

/// Central registry mapping tool names to trait objects, in name order.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn PipelineTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: BTreeMap::new() }
    }

    /// Register a tool. Panics if the name is already registered.
    pub fn register<T: PipelineTool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        assert!(!self.tools.contains_key(&name), "Duplicate tool name: {name}");
        self.tools.insert(name, Arc::new(tool));
    }

    /// Invoke a registered tool by name.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value> {
        let tool = self.tools.get(name).ok_or_else(|| anyhow::anyhow!("Unknown tool: {name}"))?;
        tracing::info!(tool = name, read_only = tool.read_only(), "Invoking tool");
        tool.invoke(params).await
    }

    /// All registered tools with their argument schemas.
    pub fn manifest(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .values()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.parameters_schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    pub fn len(&self) -> usize { self.tools.len() }

    pub fn is_empty(&self) -> bool { self.tools.is_empty() }
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

/// Build the registry of every pipeline tool over one shared service.
pub fn build_default_registry(service: Arc<PipelineService>) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(run_tool::RunTool::new(service.clone()));
    reg.register(status_tool::StatusTool::new(service.clone()));
    reg.register(status_tool::ListRunsTool::new(service.clone()));
    reg.register(artifact_tool::ListArtifactsTool::new(service.clone()));
    reg.register(artifact_tool::ReadArtifactTool::new(service));
    tracing::info!("ToolRegistry ready with {} tools", reg.len());
    reg
}

// ─────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use ferroprot_config::DefaultsConfig;
    use ferroprot_pipeline::dry_run::SimulatedJobService;
    use ferroprot_pipeline::{Backends, Endpoints, PipelineService};
    use ferroprot_test_utils::temp_store;
    use tempfile::TempDir;

    /// A service whose real backend is the simulator, rooted in a temp dir.
    pub fn service() -> (TempDir, Arc<PipelineService>) {
        let (dir, store) = temp_store();
        let backends = Backends::new(Arc::new(SimulatedJobService::new()), Endpoints::by_service_name());
        (dir, Arc::new(PipelineService::new(store, backends, DefaultsConfig::default())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct EchoTool;

    #[async_trait]
    impl PipelineTool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes the message back." }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            })
        }
        async fn invoke(&self, params: Value) -> Result<Value> {
            #[derive(Deserialize)]
            #[serde(deny_unknown_fields)]
            struct Args {
                message: String,
            }
            let args: Args = parse_args(self.name(), params)?;
            Ok(json!({ "echo": args.message }))
        }
    }

    #[tokio::test]
    async fn test_registry_register_and_invoke() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        assert_eq!(reg.len(), 1);

        let result = reg.invoke("echo", json!({ "message": "hello" })).await.unwrap();
        assert_eq!(result["echo"], "hello");
    }

    #[tokio::test]
    async fn test_registry_unknown_tool_errors() {
        let reg = ToolRegistry::new();
        let err = reg.invoke("nonexistent", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_unknown_argument_is_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        let err = reg.invoke("echo", json!({ "message": "hi", "colour": "red" })).await.unwrap_err();
        assert!(format!("{err:#}").contains("unknown field"));
    }

    #[test]
    fn test_non_object_arguments_are_rejected() {
        #[derive(Deserialize)]
        struct Empty {}
        assert!(parse_args::<Empty>("t", Value::Null).is_ok());
        assert!(parse_args::<Empty>("t", json!([1, 2])).is_err());
    }

    #[test]
    fn test_default_registry_manifest() {
        let (_dir, svc) = test_support::service();
        let reg = build_default_registry(svc);
        let manifest = reg.manifest();
        let names: Vec<&str> = manifest["tools"].as_array().unwrap().iter().filter_map(|t| t["name"].as_str()).collect();
        assert_eq!(
            names,
            vec!["pipeline.list_artifacts", "pipeline.list_runs", "pipeline.read_artifact", "pipeline.run", "pipeline.status"]
        );
    }

    #[test]
    #[should_panic(expected = "Duplicate tool name")]
    fn test_duplicate_registration_panics() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(EchoTool);
    }
}
