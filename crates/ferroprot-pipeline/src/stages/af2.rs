//! `af2`: structure prediction for every soluble design, then pLDDT selection.
//!
//! Each candidate is its own remote job (`af2_<k>_<id>`), so a rerun only
//! resubmits candidates whose job record is missing or failed. The predicted
//! model is compared with the target's first design chain; candidates with too
//! few matched residues are excluded before selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use ferroprot_bio::deviation::{ca_deviation, Deviation, MIN_MATCHED_RESIDUES};
use ferroprot_bio::selection::{top_k_with_floor, ScoredCandidate};
use ferroprot_bio::structure::Structure;
use ferroprot_common::fasta::to_fasta;
use ferroprot_common::{SequenceRecord, TierKey};
use ferroprot_jobs::services::alphafold::{parse_af2_output, Af2Prediction, Af2Request};
use ferroprot_jobs::{Fingerprint, JobSpec};
use ferroprot_store::safe_component;

use crate::context::{PipelineState, RunContext, StageOutput, StageStamp};
use crate::error::Result;
use crate::request::Stage;

pub const SCORES_FILE: &str = "af2_scores.json";
pub const SELECTED_FASTA: &str = "af2_selected.fasta";

/// One row of `af2_scores.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Af2Candidate {
    pub id: String,
    pub best_plddt: f64,
    pub best_model: Option<String>,
    pub deviation: Option<Deviation>,
    /// Why the candidate was not eligible for selection.
    pub excluded: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Af2ScoresDocument {
    pub plddt_cutoff: f64,
    pub top_k: usize,
    pub rmsd_cutoff: Option<f64>,
    pub model_preset: String,
    pub candidates: Vec<Af2Candidate>,
    pub selected: Vec<String>,
    /// Candidates whose prediction failed and were dropped.
    pub dropped: BTreeMap<String, String>,
}

pub fn job_key(key: TierKey, id: &str) -> String {
    format!("af2_{key}_{}", safe_component(id))
}

fn candidate_dir(ctx: &RunContext, key: TierKey, id: &str) -> String {
    ctx.tier_path(key, &format!("af2/{}", safe_component(id)))
}

pub fn fingerprint(ctx: &RunContext, state: &PipelineState) -> Result<Fingerprint> {
    let r = &ctx.request;
    Ok(Fingerprint::of(&json!({
        "soluprot": state.upstream(Stage::Soluprot),
        "model_preset": r.af2_model_preset,
        "db_preset": r.af2_db_preset,
        "max_template_date": r.af2_max_template_date,
        "extra_flags": r.af2_extra_flags,
        "plddt_cutoff": r.af2_plddt_cutoff(),
        "top_k": r.af2_top_k(),
        "rmsd_cutoff": r.af2_rmsd_cutoff,
        "sequence_ids": r.af2_sequence_ids,
    }))?)
}

fn pick(records: &[SequenceRecord], ids: &[String]) -> Vec<SequenceRecord> {
    records.iter().filter(|r| ids.contains(&r.id)).cloned().collect()
}

pub fn load(ctx: &RunContext, state: &mut PipelineState, _stamp: &StageStamp) -> Result<()> {
    for (key, tier) in state.tiers.iter_mut() {
        let doc: Af2ScoresDocument = ctx.store.read_json(&ctx.run_id, &ctx.tier_path(*key, SCORES_FILE))?;
        tier.selected = pick(&tier.soluble, &doc.selected);
        tier.af2_scored = doc.candidates.len();
    }
    Ok(())
}

fn candidates(ctx: &RunContext, soluble: &[SequenceRecord]) -> Vec<SequenceRecord> {
    match &ctx.request.af2_sequence_ids {
        Some(ids) if !ids.is_empty() => pick(soluble, ids),
        _ => soluble.to_vec(),
    }
}

/// Deviation of the predicted model from the target's first design chain.
fn deviation(state: &PipelineState, model_pdb: Option<&str>) -> Option<Deviation> {
    let reference = state
        .target
        .structure
        .as_ref()
        .zip(state.target.design_chains.first())
        .and_then(|(s, id)| s.chain(id))?;
    let model = Structure::parse(model_pdb?).chains().into_iter().next()?;
    Some(ca_deviation(&model.ca_by_ordinal(), &reference.ca_by_ordinal(), MIN_MATCHED_RESIDUES))
}

/// Exclusion reason, if the candidate may not be selected.
fn exclusion(deviation: Option<&Deviation>, rmsd_cutoff: Option<f64>) -> Option<String> {
    match (deviation, rmsd_cutoff) {
        (Some(Deviation::Insufficient { matched, required }), _) => {
            Some(format!("only {matched} residue(s) matched the target (need {required})"))
        }
        (Some(Deviation::Scored { rmsd, .. }), Some(cutoff)) if *rmsd > cutoff => {
            Some(format!("CA RMSD {rmsd:.2} exceeds {cutoff}"))
        }
        (None, Some(_)) => Some("no model to compare against the target".to_string()),
        _ => None,
    }
}

/// pLDDT selection over the eligible candidates.
pub fn select(candidates: &[Af2Candidate], plddt_cutoff: f64, top_k: usize) -> Vec<String> {
    let eligible: Vec<ScoredCandidate> = candidates
        .iter()
        .filter(|c| c.excluded.is_none())
        .map(|c| ScoredCandidate::new(c.id.clone(), c.best_plddt))
        .collect();
    top_k_with_floor(&eligible, plddt_cutoff, top_k).into_iter().map(|c| c.id).collect()
}

async fn predict(ctx: &RunContext, endpoint: &str, key: TierKey, seq: &SequenceRecord) -> Result<(Af2Prediction, Vec<String>)> {
    let r = &ctx.request;
    let request = Af2Request {
        sequence: seq.sequence.clone(),
        model_preset: Af2Request::resolve_model_preset(&r.af2_model_preset, &seq.sequence),
        db_preset: r.af2_db_preset.clone(),
        max_template_date: r.af2_max_template_date.clone(),
        extra_flags: r.af2_extra_flags.clone(),
    };
    let spec = JobSpec {
        key: job_key(key, &seq.id),
        stage: Stage::Af2.to_string(),
        endpoint: endpoint.to_string(),
        payload: request.payload(),
        fingerprint: request.fingerprint()?,
    };
    let dir = candidate_dir(ctx, key, &seq.id);
    let outcome = ctx
        .jobs
        .submit_or_resume(&ctx.run_id, &spec, ctx.force(), |output: &Value| -> Result<(Af2Prediction, Vec<String>)> {
            let prediction = parse_af2_output(output)?;
            let mut written = Vec::new();
            let ranking_path = format!("{dir}/ranking_debug.json");
            ctx.store.write_json(&ctx.run_id, &ranking_path, &prediction.ranking_debug)?;
            written.push(ranking_path);
            if let Some(pdb) = prediction.ranked_0_pdb.as_deref().filter(|p| !p.trim().is_empty()) {
                let pdb_path = format!("{dir}/ranked_0.pdb");
                ctx.store.write_text(&ctx.run_id, &pdb_path, pdb)?;
                written.push(pdb_path);
            }
            Ok((prediction, written))
        })
        .await?;
    Ok(outcome.value)
}

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn execute(ctx: &RunContext, state: &mut PipelineState) -> Result<StageOutput> {
    let endpoint = ctx.endpoints.alphafold2()?.to_string();
    let plddt_cutoff = ctx.request.af2_plddt_cutoff();
    let top_k = ctx.request.af2_top_k();
    let rmsd_cutoff = ctx.request.af2_rmsd_cutoff;
    let mut outputs = Vec::new();
    let mut notes = serde_json::Map::new();

    let keys: Vec<TierKey> = state.tiers.keys().copied().collect();
    for key in keys {
        let soluble = state.tiers.get(&key).map(|t| t.soluble.clone()).unwrap_or_default();
        let mut scored = Vec::new();
        let mut dropped = BTreeMap::new();

        for seq in candidates(ctx, &soluble) {
            let (prediction, written) = match predict(ctx, &endpoint, key, &seq).await {
                Ok(done) => done,
                Err(err) if ctx.request.auto_recover && err.as_job().is_some() => {
                    let message = format!("tier {key}: AlphaFold2 failed for {}; dropping candidate", seq.id);
                    ctx.recovery(Stage::Af2, message.clone(), json!({ "tier": key, "id": seq.id, "error": err.to_string() }))?;
                    if let Some(tier) = state.tiers.get_mut(&key) {
                        tier.errors.push(format!("af2 {}: {err}", seq.id));
                    }
                    state.warnings.push(message);
                    dropped.insert(seq.id.clone(), err.to_string());
                    continue;
                }
                Err(err) => return Err(err),
            };

            let deviation = deviation(state, prediction.ranked_0_pdb.as_deref());
            let excluded = exclusion(deviation.as_ref(), rmsd_cutoff);
            if let Some(reason) = &excluded {
                warn!(tier = %key, id = %seq.id, %reason, "Candidate excluded from selection");
            }
            let metrics_path = format!("{}/metrics.json", candidate_dir(ctx, key, &seq.id));
            ctx.store.write_json(&ctx.run_id, &metrics_path, &json!({
                "best_plddt": prediction.best_plddt,
                "best_model": prediction.best_model,
                "archive_name": prediction.archive_name,
                "deviation": deviation,
                "excluded": excluded,
            }))?;
            outputs.extend(written);
            outputs.push(metrics_path);
            scored.push(Af2Candidate {
                id: seq.id.clone(),
                best_plddt: prediction.best_plddt,
                best_model: prediction.best_model,
                deviation,
                excluded,
            });
        }

        let selected_ids = select(&scored, plddt_cutoff, top_k);
        let selected = pick(&soluble, &selected_ids);
        let doc = Af2ScoresDocument {
            plddt_cutoff,
            top_k,
            rmsd_cutoff,
            model_preset: ctx.request.af2_model_preset.clone(),
            candidates: scored,
            selected: selected_ids,
            dropped,
        };
        let scores_path = ctx.tier_path(key, SCORES_FILE);
        let fasta_path = ctx.tier_path(key, SELECTED_FASTA);
        ctx.store.write_json(&ctx.run_id, &scores_path, &doc)?;
        ctx.store.write_text(&ctx.run_id, &fasta_path, &to_fasta(&selected))?;
        info!(tier = %key, predicted = doc.candidates.len(), selected = selected.len(), "AlphaFold2 selection done");

        notes.insert(key.to_string(), json!({
            "predicted": doc.candidates.len(),
            "selected": selected.len(),
            "dropped": doc.dropped.len(),
        }));
        if let Some(tier) = state.tiers.get_mut(&key) {
            tier.af2_scored = doc.candidates.len();
            tier.selected = selected;
        }
        outputs.extend([scores_path, fasta_path]);
    }

    Ok(StageOutput::new(outputs).with_notes(Value::Object(notes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, plddt: f64, deviation: Option<Deviation>) -> Af2Candidate {
        let excluded = exclusion(deviation.as_ref(), Some(2.0));
        Af2Candidate { id: id.into(), best_plddt: plddt, best_model: None, deviation, excluded }
    }

    #[test]
    fn test_insufficient_match_is_excluded_not_scored() {
        let reason = exclusion(Some(&Deviation::Insufficient { matched: 2, required: 3 }), None);
        assert!(reason.unwrap().contains("only 2"));
        assert!(exclusion(Some(&Deviation::Scored { rmsd: 9.0, matched: 10 }), None).is_none());
        assert!(exclusion(None, None).is_none());
    }

    #[test]
    fn test_selection_applies_rmsd_then_plddt() {
        let scored = vec![
            candidate("a", 90.0, Some(Deviation::Scored { rmsd: 1.0, matched: 10 })),
            candidate("b", 95.0, Some(Deviation::Scored { rmsd: 3.5, matched: 10 })),
            candidate("c", 85.0, Some(Deviation::Scored { rmsd: 0.5, matched: 10 })),
            candidate("d", 60.0, Some(Deviation::Scored { rmsd: 0.5, matched: 10 })),
        ];
        assert_eq!(select(&scored, 80.0, 5), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(select(&scored, 80.0, 1), vec!["a".to_string()]);
    }

    #[test]
    fn test_job_key_is_path_safe() {
        assert_eq!(job_key(TierKey(30), "sample 1/2"), "af2_30_sample_1_2");
    }
}
