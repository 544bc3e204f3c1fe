//! `pipeline.run`: start, resume or extend a run.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use ferroprot_pipeline::{PipelineService, StageRequest};

use super::PipelineTool;

pub struct RunTool {
    service: Arc<PipelineService>,
}

impl RunTool {
    pub fn new(service: Arc<PipelineService>) -> Self { Self { service } }
}

/// Split `run_id` off the argument map; everything else is the stage request.
fn split_run_id(params: Value) -> Result<(Option<String>, Value)> {
    let mut args = match params {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => anyhow::bail!("pipeline.run: arguments must be an object, got {other}"),
    };
    let run_id = match args.remove("run_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => anyhow::bail!("pipeline.run: run_id must be a string, got {other}"),
    };
    Ok((run_id, Value::Object(args)))
}

#[async_trait]
impl PipelineTool for RunTool {
    fn name(&self) -> &str { "pipeline.run" }

    fn description(&self) -> &str {
        "Run the protein design pipeline (MSA, conservation, ligand mask, ProteinMPNN, \
         SoluProt, AlphaFold2, novelty) up to stop_after. Completed stages are reused \
         unless force is set; dry_run swaps every external service for a simulator."
    }

    fn parameters_schema(&self) -> Value {
        let stages = ["msa", "conservation", "ligand_mask", "design", "soluprot", "af2", "novelty"];
        json!({
            "type": "object",
            "properties": {
                "run_id": { "type": "string" },
                "target_fasta": { "type": "string" },
                "target_pdb": { "type": "string" },
                "design_chains": { "type": "array", "items": { "type": "string" } },
                "fixed_positions_extra": {
                    "anyOf": [
                        { "type": "object", "additionalProperties": { "type": "array", "items": { "type": "integer" } } },
                        { "type": "array", "items": { "type": "integer" } }
                    ],
                    "description": "Extra fixed positions per chain (1-based, query numbering). Use '*' for all chains."
                },
                "conservation_tiers": { "type": "array", "items": { "type": "number" } },
                "conservation_mode": { "type": "string", "enum": ["quantile", "threshold"] },
                "msa_min_coverage": { "type": "number" },
                "msa_min_identity": { "type": "number" },
                "ligand_mask_distance": { "type": "number" },
                "ligand_resnames": { "type": "array", "items": { "type": "string" } },
                "query_pdb_min_identity": { "type": "number" },
                "query_pdb_policy": { "type": "string", "enum": ["error", "warn", "ignore"] },
                "num_seq_per_tier": { "type": "integer" },
                "batch_size": { "type": "integer" },
                "sampling_temp": { "type": "number" },
                "seed": { "type": "integer" },
                "allow_fixed_position_violations": { "type": "boolean" },
                "soluprot_cutoff": { "type": "number" },
                "af2_model_preset": { "type": "string" },
                "af2_db_preset": { "type": "string" },
                "af2_max_template_date": { "type": "string" },
                "af2_extra_flags": { "type": "string" },
                "af2_plddt_cutoff": { "type": "number" },
                "af2_top_k": { "type": "integer" },
                "af2_rmsd_cutoff": { "type": "number" },
                "af2_sequence_ids": { "type": "array", "items": { "type": "string" } },
                "mmseqs_target_db": { "type": "string" },
                "mmseqs_max_seqs": { "type": "integer" },
                "mmseqs_threads": { "type": "integer" },
                "mmseqs_use_gpu": { "type": "boolean" },
                "novelty_target_db": { "type": "string" },
                "stop_after": { "type": "string", "enum": stages },
                "force": { "type": "boolean" },
                "dry_run": { "type": "boolean" },
                "auto_recover": { "type": "boolean" }
            },
            "anyOf": [
                { "required": ["target_fasta"] },
                { "required": ["target_pdb"] }
            ],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool { false }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let (run_id, args) = split_run_id(params)?;
        let request = StageRequest::from_value(args)?;
        let report = self.service.run(run_id.as_deref(), request).await;
        let output_dir = self.service.store().root().join(&report.run_id);
        let mut out = serde_json::to_value(&report)?;
        if let Some(map) = out.as_object_mut() {
            map.insert("output_dir".to_string(), json!(output_dir.display().to_string()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;
    use ferroprot_test_utils::fixtures::zinc_site_pdb;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_run_id() {
        let (id, rest) = split_run_id(json!({ "run_id": "abc", "dry_run": true })).unwrap();
        assert_eq!(id.as_deref(), Some("abc"));
        assert_eq!(rest, json!({ "dry_run": true }));

        let (id, rest) = split_run_id(Value::Null).unwrap();
        assert_eq!(id, None);
        assert_eq!(rest, json!({}));

        assert!(split_run_id(json!({ "run_id": 7 })).is_err());
        assert!(split_run_id(json!("msa")).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_through_tool() {
        let (_dir, svc) = test_support::service();
        let tool = RunTool::new(svc.clone());
        let out = tool
            .invoke(json!({
                "run_id": "tool_run",
                "target_pdb": zinc_site_pdb("MKVLAGWEHRT"),
                "conservation_tiers": [0.3],
                "dry_run": true,
                "stop_after": "design",
            }))
            .await
            .unwrap();

        assert_eq!(out["run_id"], "tool_run");
        assert_eq!(out["state"], "completed");
        assert_eq!(out["stage"], "design");
        assert!(out["output_dir"].as_str().unwrap().ends_with("tool_run"));
        assert!(svc.store().exists("tool_run", "tiers/30/designs.json"));
    }

    #[tokio::test]
    async fn test_unknown_request_field_is_rejected() {
        let (_dir, svc) = test_support::service();
        let tool = RunTool::new(svc.clone());
        let err = tool.invoke(json!({ "target_fasta": ">q\nMKV", "rfd3_contig": "A1-10" })).await.unwrap_err();
        assert!(err.to_string().contains("rfd3_contig"));
        assert!(svc.list_runs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_is_reported_not_raised() {
        let (_dir, svc) = test_support::service();
        let tool = RunTool::new(svc);
        let out = tool
            .invoke(json!({ "run_id": "seq_only", "target_fasta": ">q\nMKVLA", "stop_after": "design", "dry_run": true }))
            .await
            .unwrap();
        assert_eq!(out["state"], "failed");
        assert_eq!(out["error"]["kind"], "validation_error");
    }
}
