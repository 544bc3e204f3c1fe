//! `soluprot`: solubility scoring and cutoff per tier.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use ferroprot_bio::selection::{score_cutoff, ScoredCandidate};
use ferroprot_common::fasta::to_fasta;
use ferroprot_common::SequenceRecord;
use ferroprot_jobs::services::soluprot::score_with_retry;
use ferroprot_jobs::Fingerprint;

use crate::context::{PipelineState, RunContext, StageOutput, StageStamp};
use crate::error::Result;
use crate::request::Stage;

pub const SCORES_FILE: &str = "soluprot.json";
pub const FILTERED_FASTA: &str = "designs_filtered.fasta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoluprotDocument {
    pub cutoff: f64,
    pub scores: BTreeMap<String, f64>,
    pub passed_ids: Vec<String>,
    /// Designs the scorer returned nothing for; they do not pass.
    pub unscored: Vec<String>,
}

pub fn fingerprint(ctx: &RunContext, state: &PipelineState) -> Result<Fingerprint> {
    Ok(Fingerprint::of(&json!({
        "design": state.upstream(Stage::Design),
        "cutoff": ctx.request.soluprot_cutoff(),
    }))?)
}

fn passing(designs: &[SequenceRecord], passed_ids: &[String]) -> Vec<SequenceRecord> {
    let passed: BTreeSet<&str> = passed_ids.iter().map(String::as_str).collect();
    designs.iter().filter(|d| passed.contains(d.id.as_str())).cloned().collect()
}

pub fn load(ctx: &RunContext, state: &mut PipelineState, _stamp: &StageStamp) -> Result<()> {
    for (key, tier) in state.tiers.iter_mut() {
        let doc: SoluprotDocument = ctx.store.read_json(&ctx.run_id, &ctx.tier_path(*key, SCORES_FILE))?;
        tier.soluble = passing(&tier.designs, &doc.passed_ids);
    }
    Ok(())
}

/// Apply the cutoff to whatever the scorer returned.
pub fn filter_scores(designs: &[SequenceRecord], scores: &BTreeMap<String, f64>, cutoff: f64) -> SoluprotDocument {
    let mut scored = Vec::new();
    let mut unscored = Vec::new();
    for design in designs {
        match scores.get(&design.id) {
            Some(score) => scored.push(ScoredCandidate::new(design.id.clone(), *score)),
            None => unscored.push(design.id.clone()),
        }
    }
    let passed_ids = score_cutoff(&scored, cutoff).into_iter().map(|c| c.id).collect();
    SoluprotDocument { cutoff, scores: scores.clone(), passed_ids, unscored }
}

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn execute(ctx: &RunContext, state: &mut PipelineState) -> Result<StageOutput> {
    let scorer = ctx.scorer()?.clone();
    let cutoff = ctx.request.soluprot_cutoff();
    let mut outputs = Vec::new();
    let mut notes = serde_json::Map::new();

    let keys: Vec<_> = state.tiers.keys().copied().collect();
    for key in keys {
        let designs = state.tiers.get(&key).map(|t| t.designs.clone()).unwrap_or_default();
        let scores = if designs.is_empty() {
            BTreeMap::new()
        } else {
            score_with_retry(scorer.as_ref(), &ctx.retry, &designs).await?
        };
        let doc = filter_scores(&designs, &scores, cutoff);
        if !doc.unscored.is_empty() {
            ctx.warn(
                state,
                Stage::Soluprot,
                format!("tier {key}: scorer returned no score for {} design(s)", doc.unscored.len()),
            )?;
        }

        let soluble = passing(&designs, &doc.passed_ids);
        let scores_path = ctx.tier_path(key, SCORES_FILE);
        let fasta_path = ctx.tier_path(key, FILTERED_FASTA);
        ctx.store.write_json(&ctx.run_id, &scores_path, &doc)?;
        ctx.store.write_text(&ctx.run_id, &fasta_path, &to_fasta(&soluble))?;
        info!(tier = %key, scored = doc.scores.len(), passed = soluble.len(), cutoff, "Solubility filter applied");

        notes.insert(key.to_string(), json!({ "scored": doc.scores.len(), "passed": soluble.len() }));
        if let Some(tier) = state.tiers.get_mut(&key) {
            tier.soluble = soluble;
        }
        outputs.extend([scores_path, fasta_path]);
    }

    Ok(StageOutput::new(outputs).with_notes(Value::Object(notes)))
}
