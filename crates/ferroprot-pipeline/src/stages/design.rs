//! `design`: inverse folding per conservation tier.
//!
//! Fixed positions are recomputed here from the conservation, ligand mask and
//! alignment inputs every time the stage executes. Each returned sample is
//! checked against those positions before it can reach later stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use ferroprot_bio::fixed_check::{check_fixed_positions, DesignViolation};
use ferroprot_common::fasta::to_fasta;
use ferroprot_common::{SequenceRecord, TierKey};
use ferroprot_jobs::fingerprint::text_digest;
use ferroprot_jobs::services::proteinmpnn::{parse_design_output, DesignOutput, DesignRequest};
use ferroprot_jobs::{Fingerprint, JobError, JobSpec};
use ferroprot_store::EventKind;

use crate::context::{PipelineState, RunContext, StageOutput, StageStamp, TierState};
use crate::error::{PipelineError, Result};
use crate::fixed::{align_design_chains, tier_fixed_positions, TierFixedPositions, ALIGNMENT_FILE};
use crate::request::Stage;

pub const FIXED_FILE: &str = "fixed_positions.json";
pub const DESIGNS_FILE: &str = "designs.json";
pub const DESIGNS_FASTA: &str = "designs.fasta";
pub const CHECK_FILE: &str = "fixed_positions_check.json";

/// `tiers/<k>/designs.json`: the native sequence and the samples that passed
/// the fixed-position check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignsDocument {
    pub tier: f64,
    pub native: SequenceRecord,
    pub samples: Vec<SequenceRecord>,
    pub fixed_positions: BTreeMap<String, Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedCheckDocument {
    pub checked: usize,
    pub violations: Vec<DesignViolation>,
    pub dropped: Vec<String>,
    pub allowed: bool,
}

pub fn job_key(key: TierKey) -> String {
    format!("design_{key}")
}

pub fn fingerprint(ctx: &RunContext, state: &PipelineState) -> Result<Fingerprint> {
    let r = &ctx.request;
    Ok(Fingerprint::of(&json!({
        "conservation": state.upstream(Stage::Conservation),
        "ligand_mask": state.upstream(Stage::LigandMask),
        "pdb_sha256": state.target.pdb_text.as_deref().map(text_digest),
        "query": state.target.query.sequence,
        "design_chains": state.target.design_chains,
        "fixed_positions_extra": r.fixed_positions_extra,
        "query_pdb_min_identity": r.query_pdb_min_identity,
        "query_pdb_policy": r.query_pdb_policy,
        "num_seq_per_tier": r.num_seq_per_tier,
        "batch_size": r.batch_size,
        "sampling_temp": r.sampling_temp,
        "seed": r.seed,
        "allow_fixed_position_violations": r.allow_fixed_position_violations,
    }))?)
}

pub fn load(ctx: &RunContext, state: &mut PipelineState, _stamp: &StageStamp) -> Result<()> {
    for (tier, key) in ctx.request.tier_keys()? {
        let fixed: TierFixedPositions = ctx.store.read_json(&ctx.run_id, &ctx.tier_path(key, FIXED_FILE))?;
        let doc: DesignsDocument = ctx.store.read_json(&ctx.run_id, &ctx.tier_path(key, DESIGNS_FILE))?;
        let tier_state = state.tiers.entry(key).or_insert_with(|| TierState::new(tier));
        tier_state.fixed = fixed.fixed();
        tier_state.native = Some(doc.native);
        tier_state.designs = doc.samples;
    }
    Ok(())
}

/// Split samples into those that kept every fixed residue and the violations.
fn screen_samples(
    output: &DesignOutput,
    design_chains: &[String],
    fixed: &TierFixedPositions,
) -> Result<(Vec<SequenceRecord>, Vec<DesignViolation>)> {
    let positions = fixed.fixed();
    let mut kept = Vec::new();
    let mut violations = Vec::new();
    for sample in &output.samples {
        match check_fixed_positions(&output.native.sequence, sample, design_chains, &positions)? {
            None => kept.push(sample.clone()),
            Some(v) => violations.push(v),
        }
    }
    Ok((kept, violations))
}

async fn run_tier(
    ctx: &RunContext,
    state: &PipelineState,
    endpoint: &str,
    fixed: &TierFixedPositions,
    force: bool,
) -> Result<DesignOutput> {
    let pdb_text = state.target.pdb_text.clone().unwrap_or_default();
    let request = DesignRequest {
        pdb_text,
        design_chains: state.target.design_chains.clone(),
        fixed_positions: fixed.as_lists(),
        num_seq_per_target: ctx.request.num_seq_per_tier,
        batch_size: ctx.request.batch_size,
        sampling_temp: ctx.request.sampling_temp,
        seed: ctx.request.seed,
    };
    let spec = JobSpec {
        key: job_key(fixed.key),
        stage: Stage::Design.to_string(),
        endpoint: endpoint.to_string(),
        payload: request.payload(),
        fingerprint: request.fingerprint()?,
    };
    let outcome = ctx
        .jobs
        .submit_or_resume(&ctx.run_id, &spec, force, |output: &Value| -> Result<DesignOutput> {
            let parsed = parse_design_output(output)?;
            if parsed.samples.is_empty() {
                return Err(JobError::malformed("proteinmpnn", "design returned no samples").into());
            }
            Ok(parsed)
        })
        .await?;
    Ok(outcome.value)
}

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn execute(ctx: &RunContext, state: &mut PipelineState) -> Result<StageOutput> {
    let endpoint = ctx.endpoints.proteinmpnn()?.to_string();
    let conservation = state
        .conservation
        .clone()
        .ok_or_else(|| PipelineError::validation("design needs the conservation stage output"))?;
    let ligand_mask = state
        .ligand_mask
        .clone()
        .ok_or_else(|| PipelineError::validation("design needs the ligand_mask stage output"))?;

    let mappings = align_design_chains(&state.target, &ctx.request)?;
    for warning in &mappings.warnings {
        ctx.warn(state, Stage::Design, warning.clone())?;
    }
    ctx.store.write_json(&ctx.run_id, ALIGNMENT_FILE, &json!({
        "query_id": state.target.query.id,
        "query_length": state.target.query.len(),
        "policy": ctx.request.query_pdb_policy,
        "chains": mappings.reports,
    }))?;

    let mut outputs = vec![ALIGNMENT_FILE.to_string()];
    let mut notes = serde_json::Map::new();

    for (tier, key) in ctx.request.tier_keys()? {
        let fixed = tier_fixed_positions(tier, key, &conservation, &ligand_mask, &mappings, &ctx.request)?;
        let fixed_path = ctx.tier_path(key, FIXED_FILE);
        ctx.store.write_json(&ctx.run_id, &fixed_path, &fixed)?;

        let output = match run_tier(ctx, state, &endpoint, &fixed, ctx.force()).await {
            Ok(output) => output,
            Err(err) if ctx.request.auto_recover && matches!(err.as_job(), Some(JobError::Failed { .. })) => {
                ctx.recovery(
                    Stage::Design,
                    format!("tier {key}: design job failed; resubmitting once"),
                    json!({ "tier": key, "error": err.to_string() }),
                )?;
                run_tier(ctx, state, &endpoint, &fixed, true).await?
            }
            Err(err) => return Err(err),
        };

        let (kept, violations) = screen_samples(&output, &state.target.design_chains, &fixed)?;
        let dropped: Vec<String> = violations.iter().map(|v| v.design_id.clone()).collect();
        let check = FixedCheckDocument {
            checked: output.samples.len(),
            violations: violations.clone(),
            dropped: if ctx.request.allow_fixed_position_violations { dropped.clone() } else { Vec::new() },
            allowed: ctx.request.allow_fixed_position_violations,
        };
        let check_path = ctx.tier_path(key, CHECK_FILE);
        ctx.store.write_json(&ctx.run_id, &check_path, &check)?;

        if !violations.is_empty() {
            let examples = violations
                .iter()
                .take(3)
                .map(|v| {
                    let at: Vec<String> = v.positions().iter().take(5).map(|(c, p)| format!("{c}{p}")).collect();
                    format!("{} at {}", v.design_id, at.join(","))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !ctx.request.allow_fixed_position_violations {
                return Err(PipelineError::FixedPositionViolation { tier: key, count: violations.len(), examples });
            }
            warn!(tier = %key, dropped = dropped.len(), "Dropping designs that mutated fixed positions");
            ctx.event(
                EventKind::Warning,
                Some(Stage::Design),
                format!("tier {key}: dropped {} design(s) that mutated fixed positions", dropped.len()),
                Some(json!({ "tier": key, "dropped": dropped })),
            )?;
            state.warnings.push(format!("tier {key}: {} design(s) violated fixed positions ({examples})", dropped.len()));
        }

        let doc = DesignsDocument { tier, native: output.native.clone(), samples: kept.clone(), fixed_positions: fixed.as_lists() };
        let designs_path = ctx.tier_path(key, DESIGNS_FILE);
        let fasta_path = ctx.tier_path(key, DESIGNS_FASTA);
        ctx.store.write_json(&ctx.run_id, &designs_path, &doc)?;
        ctx.store.write_text(&ctx.run_id, &fasta_path, &to_fasta(&kept))?;
        info!(tier = %key, samples = output.samples.len(), kept = kept.len(), "Designs ready");

        notes.insert(key.to_string(), json!({ "samples": output.samples.len(), "kept": kept.len() }));
        let tier_state = state.tiers.entry(key).or_insert_with(|| TierState::new(tier));
        tier_state.fixed = fixed.fixed();
        tier_state.native = Some(output.native);
        tier_state.designs = kept;
        outputs.extend([fixed_path, designs_path, fasta_path, check_path]);
    }

    Ok(StageOutput::new(outputs).with_notes(Value::Object(notes)))
}
