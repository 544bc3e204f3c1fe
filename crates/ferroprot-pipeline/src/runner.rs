//! Stage walk for one invocation.
//!
//! Stages run strictly in order up to `stop_after`. A stage whose stamp is
//! reusable is loaded instead of executed; its fingerprint still feeds the
//! downstream fingerprints, so a changed input invalidates everything after it.

use serde_json::json;
use tracing::{debug, info, instrument};

use ferroprot_store::EventKind;

use crate::context::{PipelineState, RunContext, StageOutcome};
use crate::error::PipelineError;
use crate::request::Stage;
use crate::stages;

/// The stage that ended the walk and why.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

pub struct StageRunner<'a> {
    ctx: &'a RunContext,
}

impl<'a> StageRunner<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(run_id = %self.ctx.run_id, stop_after = %self.ctx.request.stop_after()))]
    pub async fn run(&self, state: &mut PipelineState) -> Result<(), StageFailure> {
        for stage in Stage::through(self.ctx.request.stop_after()) {
            if let Err(error) = self.run_stage(stage, state).await {
                state.outcomes.insert(stage, StageOutcome::Failed);
                state.errors.push(format!("{stage}: {error}"));
                // Best effort: the stage error is what gets reported.
                let _ = self.ctx.event(
                    EventKind::StageFailed,
                    Some(stage),
                    error.to_string(),
                    Some(json!({ "error_kind": error.kind() })),
                );
                return Err(StageFailure { stage, error });
            }
        }
        Ok(())
    }

    async fn run_stage(&self, stage: Stage, state: &mut PipelineState) -> Result<(), PipelineError> {
        let ctx = self.ctx;
        ctx.mark_running(stage, &state.warnings)?;
        let fingerprint = stages::fingerprint(stage, ctx, state)?;

        if let Some(stamp) = ctx.reusable_stamp(stage, &fingerprint) {
            stages::load(stage, ctx, state, &stamp)?;
            info!(%stage, completed_at = %stamp.completed_at, "Reusing cached stage output");
            ctx.event(
                EventKind::StageSkipped,
                Some(stage),
                format!("{stage}: reusing output from {}", stamp.completed_at.to_rfc3339()),
                Some(json!({ "cached": true, "fingerprint": fingerprint })),
            )?;
            state.fingerprints.insert(stage, fingerprint);
            state.outcomes.insert(stage, StageOutcome::Cached);
            return Ok(());
        }

        info!(%stage, "Stage started");
        ctx.event(EventKind::StageStarted, Some(stage), format!("{stage} started"), None)?;
        let output = stages::execute(stage, ctx, state).await?;

        if let Some(reason) = &output.skipped {
            info!(%stage, %reason, "Stage skipped");
            ctx.event(
                EventKind::StageSkipped,
                Some(stage),
                format!("{stage} skipped: {reason}"),
                Some(json!({ "cached": false })),
            )?;
            state.outcomes.insert(stage, StageOutcome::Skipped);
            return Ok(());
        }

        let stamp = ctx.write_stamp(stage, fingerprint.clone(), &output)?;
        debug!(%stage, outputs = stamp.outputs.len(), "Stage stamp written");
        ctx.event(
            EventKind::StageCompleted,
            Some(stage),
            format!("{stage} completed"),
            Some(json!({ "outputs": stamp.outputs.len(), "notes": stamp.notes })),
        )?;
        state.fingerprints.insert(stage, fingerprint);
        state.outcomes.insert(stage, StageOutcome::Executed);
        Ok(())
    }
}
