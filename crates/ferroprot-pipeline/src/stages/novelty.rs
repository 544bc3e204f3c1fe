//! `novelty`: search the selected designs against a reference database.
//!
//! Optional: without a search endpoint or without selected designs the stage
//! is skipped, and no stamp is written so a later invocation tries again.

use serde_json::{json, Value};
use tracing::{info, instrument};

use ferroprot_common::fasta::to_fasta;
use ferroprot_common::{SequenceRecord, TierKey};
use ferroprot_jobs::services::mmseqs::{parse_mmseqs_output, MmseqsSearch};
use ferroprot_jobs::{Fingerprint, JobSpec};

use crate::context::{PipelineState, RunContext, StageOutput, StageStamp};
use crate::error::Result;
use crate::request::Stage;

pub const NOVELTY_FILE: &str = "novelty.tsv";

pub fn job_key(key: TierKey) -> String {
    format!("novelty_{key}")
}

pub fn fingerprint(ctx: &RunContext, state: &PipelineState) -> Result<Fingerprint> {
    Ok(Fingerprint::of(&json!({
        "af2": state.upstream(Stage::Af2),
        "target_db": ctx.request.novelty_target_db,
        "max_seqs": ctx.request.novelty_max_seqs(),
        "threads": ctx.request.mmseqs_threads,
    }))?)
}

/// Non-empty TSV lines, one per reported hit.
pub fn count_hits(tsv: &str) -> usize {
    tsv.lines().filter(|l| !l.trim().is_empty()).count()
}

pub fn load(ctx: &RunContext, state: &mut PipelineState, _stamp: &StageStamp) -> Result<()> {
    for (key, tier) in state.tiers.iter_mut() {
        let path = ctx.tier_path(*key, NOVELTY_FILE);
        if ctx.store.exists(&ctx.run_id, &path) {
            tier.novelty_hits = Some(count_hits(&ctx.store.read_text(&ctx.run_id, &path)?));
        }
    }
    Ok(())
}

async fn search(ctx: &RunContext, endpoint: &str, key: TierKey, candidates: &[SequenceRecord]) -> Result<(String, String)> {
    let search = MmseqsSearch {
        query_fasta: to_fasta(candidates),
        target_db: ctx.request.novelty_target_db.clone(),
        threads: ctx.request.mmseqs_threads,
        use_gpu: ctx.request.mmseqs_use_gpu(),
        max_seqs: Some(ctx.request.novelty_max_seqs()),
        return_a3m: false,
    };
    let spec = JobSpec {
        key: job_key(key),
        stage: Stage::Novelty.to_string(),
        endpoint: endpoint.to_string(),
        payload: search.payload(),
        fingerprint: search.fingerprint()?,
    };
    let path = ctx.tier_path(key, NOVELTY_FILE);
    let outcome = ctx
        .jobs
        .submit_or_resume(&ctx.run_id, &spec, ctx.force(), |output: &Value| -> Result<String> {
            let parsed = parse_mmseqs_output(output, false)?;
            ctx.store.write_text(&ctx.run_id, &path, &parsed.tsv)?;
            Ok(parsed.tsv)
        })
        .await?;
    Ok((path, outcome.value))
}

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn execute(ctx: &RunContext, state: &mut PipelineState) -> Result<StageOutput> {
    let endpoint = match ctx.endpoints.mmseqs() {
        Ok(endpoint) => endpoint.to_string(),
        Err(err) => return Ok(StageOutput::skipped(format!("novelty search unavailable: {err}"))),
    };
    let work: Vec<(TierKey, Vec<SequenceRecord>)> = state
        .tiers
        .iter()
        .filter(|(_, t)| !t.selected.is_empty())
        .map(|(k, t)| (*k, t.selected.clone()))
        .collect();
    if work.is_empty() {
        return Ok(StageOutput::skipped("no selected designs to search"));
    }

    let mut outputs = Vec::new();
    let mut notes = serde_json::Map::new();
    for (key, candidates) in work {
        let (path, tsv) = match search(ctx, &endpoint, key, &candidates).await {
            Ok(done) => done,
            Err(err) if ctx.request.auto_recover => {
                let reason = format!("novelty search failed for tier {key}: {err}");
                ctx.recovery(Stage::Novelty, format!("{reason}; skipping novelty"), json!({ "tier": key, "error": err.to_string() }))?;
                state.warnings.push(reason.clone());
                return Ok(StageOutput::skipped(reason));
            }
            Err(err) => return Err(err),
        };
        let hits = count_hits(&tsv);
        info!(tier = %key, queries = candidates.len(), hits, "Novelty search done");
        notes.insert(key.to_string(), json!({ "queries": candidates.len(), "hits": hits }));
        if let Some(tier) = state.tiers.get_mut(&key) {
            tier.novelty_hits = Some(hits);
        }
        outputs.push(path);
    }

    Ok(StageOutput::new(outputs).with_notes(Value::Object(notes)))
}
