//! `conservation`: quality-filter the MSA and select fixed positions per tier.

use serde_json::json;
use tracing::{info, instrument};

use ferroprot_bio::a3m::Msa;
use ferroprot_bio::conservation::{compute_conservation, Conservation};
use ferroprot_bio::msa_filter::{MsaQualityFilter, MsaQualityReport};
use ferroprot_jobs::Fingerprint;

use crate::context::{PipelineState, RunContext, StageOutput, StageStamp};
use crate::error::{PipelineError, Result};
use crate::request::Stage;

pub const CONSERVATION_PATH: &str = "conservation.json";
pub const QUALITY_PATH: &str = "msa/quality.json";

pub fn fingerprint(ctx: &RunContext, state: &PipelineState) -> Result<Fingerprint> {
    let r = &ctx.request;
    Ok(Fingerprint::of(&json!({
        "msa": state.upstream(Stage::Msa),
        "tiers": r.conservation_tiers,
        "mode": r.conservation_mode,
        "msa_min_coverage": r.msa_min_coverage,
        "msa_min_identity": r.msa_min_identity,
    }))?)
}

pub fn load(ctx: &RunContext, state: &mut PipelineState, _stamp: &StageStamp) -> Result<()> {
    state.conservation = Some(ctx.store.read_json(&ctx.run_id, CONSERVATION_PATH)?);
    Ok(())
}

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn execute(ctx: &RunContext, state: &mut PipelineState) -> Result<StageOutput> {
    let a3m = state
        .msa_a3m
        .as_deref()
        .ok_or_else(|| PipelineError::validation("conservation needs the msa stage output"))?;
    let msa = Msa::parse(a3m)?;
    if msa.query_len() != state.target.query.len() {
        ctx.warn(
            state,
            Stage::Conservation,
            format!(
                "MSA query length {} differs from target query length {}",
                msa.query_len(),
                state.target.query.len()
            ),
        )?;
    }

    let filter = MsaQualityFilter { min_coverage: ctx.request.msa_min_coverage, min_identity: ctx.request.msa_min_identity };
    let (msa, report) = if filter.is_enabled() {
        filter.apply(&msa)
    } else {
        let report = MsaQualityReport {
            total_hits: msa.hits.len(),
            kept: msa.usable_hits().count(),
            dropped_length: msa.excluded_hits(),
            ..Default::default()
        };
        (msa, report)
    };
    ctx.store.write_json(&ctx.run_id, QUALITY_PATH, &report)?;

    let conservation: Conservation = compute_conservation(&msa, &ctx.request.conservation_tiers, ctx.request.conservation_mode)?;
    ctx.store.write_json(&ctx.run_id, CONSERVATION_PATH, &conservation)?;
    info!(
        hits_used = conservation.hits_used,
        hits_excluded = conservation.hits_excluded,
        tiers = conservation.tiers.len(),
        "Conservation computed"
    );

    let notes = json!({
        "hits_used": conservation.hits_used,
        "hits_excluded": conservation.hits_excluded,
        "fixed_per_tier": conservation.tiers.iter().map(|t| (t.key.to_string(), json!(t.positions.len()))).collect::<serde_json::Map<_, _>>(),
    });
    state.conservation = Some(conservation);
    Ok(StageOutput::new(vec![CONSERVATION_PATH.to_string(), QUALITY_PATH.to_string()]).with_notes(notes))
}
