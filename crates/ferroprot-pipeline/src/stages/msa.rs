//! `msa`: homology search for the query.
//!
//! With `auto_recover`, a timed-out or transiently failing search is retried
//! with half the sequence budget (never below [`MIN_MAX_SEQS`]), and a search
//! that failed because its database is missing falls back to the default
//! database. The stamp keeps the fingerprint of the requested parameters, so a
//! recovered search is reused by later invocations with the same request.
//! Each recovery attempt has its own job key; the record of the original search
//! is never overwritten and a later invocation can still resume it.

use serde_json::{json, Value};
use tracing::{info, instrument};

use ferroprot_common::fasta::to_fasta;
use ferroprot_jobs::services::mmseqs::{parse_mmseqs_output, MmseqsSearch};
use ferroprot_jobs::{Fingerprint, JobError, JobSpec};

use crate::context::{PipelineState, RunContext, StageOutput, StageStamp};
use crate::error::{PipelineError, Result};
use crate::request::{Stage, DEFAULT_TARGET_DB};

pub const A3M_PATH: &str = "msa/result.a3m";
pub const TSV_PATH: &str = "msa/result.tsv";
pub const JOB_KEY: &str = "msa";

pub const MIN_MAX_SEQS: u32 = 50;
const MAX_RECOVERIES: usize = 2;

fn search(ctx: &RunContext, state: &PipelineState, target_db: &str, max_seqs: u32) -> MmseqsSearch {
    MmseqsSearch {
        query_fasta: to_fasta(std::slice::from_ref(&state.target.query)),
        target_db: target_db.to_string(),
        threads: ctx.request.mmseqs_threads,
        use_gpu: ctx.request.mmseqs_use_gpu(),
        max_seqs: Some(max_seqs),
        return_a3m: true,
    }
}

pub fn fingerprint(ctx: &RunContext, state: &PipelineState) -> Result<Fingerprint> {
    let requested = search(ctx, state, &ctx.request.mmseqs_target_db, ctx.request.mmseqs_max_seqs);
    Ok(requested.fingerprint()?)
}

pub fn load(ctx: &RunContext, state: &mut PipelineState, _stamp: &StageStamp) -> Result<()> {
    state.msa_a3m = Some(ctx.store.read_text(&ctx.run_id, A3M_PATH)?);
    Ok(())
}

/// Job key for the `attempt`-th search of this invocation (0 is the requested one).
pub fn job_key(attempt: usize) -> String {
    match attempt {
        0 => JOB_KEY.to_string(),
        n => format!("{JOB_KEY}_r{n}"),
    }
}

/// The next search parameters after `error`, or `None` when nothing applies.
pub fn fallback(error: &PipelineError, target_db: &str, max_seqs: u32) -> Option<(String, u32, String)> {
    match error.as_job()? {
        JobError::Transient { .. } | JobError::Timeout { .. } => {
            let reduced = (max_seqs / 2).max(MIN_MAX_SEQS);
            (reduced < max_seqs).then(|| {
                (target_db.to_string(), reduced, format!("reducing max_seqs from {max_seqs} to {reduced}"))
            })
        }
        JobError::Failed { message, .. } => {
            let lower = message.to_ascii_lowercase();
            let missing_db = lower.contains("not found") && (lower.contains("database") || lower.contains("db"));
            (missing_db && target_db != DEFAULT_TARGET_DB).then(|| {
                (DEFAULT_TARGET_DB.to_string(), max_seqs, format!("database {target_db} unavailable, using {DEFAULT_TARGET_DB}"))
            })
        }
        _ => None,
    }
}

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn execute(ctx: &RunContext, state: &mut PipelineState) -> Result<StageOutput> {
    let endpoint = ctx.endpoints.mmseqs()?.to_string();
    let mut target_db = ctx.request.mmseqs_target_db.clone();
    let mut max_seqs = ctx.request.mmseqs_max_seqs;
    let mut recoveries = 0;

    let outcome = loop {
        let params = search(ctx, state, &target_db, max_seqs);
        let spec = JobSpec {
            key: job_key(recoveries),
            stage: Stage::Msa.to_string(),
            endpoint: endpoint.clone(),
            payload: params.payload(),
            fingerprint: params.fingerprint()?,
        };
        let result = ctx
            .jobs
            .submit_or_resume(&ctx.run_id, &spec, ctx.force(), |output: &Value| -> Result<String> {
                let parsed = parse_mmseqs_output(output, true)?;
                let a3m = parsed.a3m.unwrap_or_default();
                ctx.store.write_text(&ctx.run_id, A3M_PATH, &a3m)?;
                ctx.store.write_text(&ctx.run_id, TSV_PATH, &parsed.tsv)?;
                Ok(a3m)
            })
            .await;

        match result {
            Ok(outcome) => break outcome,
            Err(err) if ctx.request.auto_recover && recoveries < MAX_RECOVERIES => {
                let Some((db, seqs, reason)) = fallback(&err, &target_db, max_seqs) else {
                    return Err(err);
                };
                ctx.recovery(
                    Stage::Msa,
                    format!("MSA search failed ({}); {reason}", err.kind()),
                    json!({ "error": err.to_string(), "target_db": db, "max_seqs": seqs }),
                )?;
                state.warnings.push(format!("msa recovered: {reason}"));
                target_db = db;
                max_seqs = seqs;
                recoveries += 1;
            }
            Err(err) => return Err(err),
        }
    };

    info!(resumed = outcome.resumed, job_id = %outcome.record.remote_job_id, "MSA ready");
    state.msa_a3m = Some(outcome.value);
    Ok(StageOutput::new(vec![A3M_PATH.to_string(), TSV_PATH.to_string()]).with_notes(json!({
        "job_id": outcome.record.remote_job_id,
        "job_key": outcome.record.key,
        "target_db": target_db,
        "max_seqs": max_seqs,
        "recoveries": recoveries,
    })))
}
