//! Stage implementations.
//!
//! Every stage exposes the same three entry points: `fingerprint` over its
//! inputs (chained through upstream fingerprints), `load` to rebuild state
//! from a reusable stamp, and `execute`.

pub mod af2;
pub mod conservation;
pub mod design;
pub mod ligand_mask;
pub mod msa;
pub mod novelty;
pub mod soluprot;

use ferroprot_jobs::Fingerprint;

use crate::context::{PipelineState, RunContext, StageOutput, StageStamp};
use crate::error::Result;
use crate::request::Stage;

pub fn fingerprint(stage: Stage, ctx: &RunContext, state: &PipelineState) -> Result<Fingerprint> {
    match stage {
        Stage::Msa => msa::fingerprint(ctx, state),
        Stage::Conservation => conservation::fingerprint(ctx, state),
        Stage::LigandMask => ligand_mask::fingerprint(ctx, state),
        Stage::Design => design::fingerprint(ctx, state),
        Stage::Soluprot => soluprot::fingerprint(ctx, state),
        Stage::Af2 => af2::fingerprint(ctx, state),
        Stage::Novelty => novelty::fingerprint(ctx, state),
    }
}

pub fn load(stage: Stage, ctx: &RunContext, state: &mut PipelineState, stamp: &StageStamp) -> Result<()> {
    match stage {
        Stage::Msa => msa::load(ctx, state, stamp),
        Stage::Conservation => conservation::load(ctx, state, stamp),
        Stage::LigandMask => ligand_mask::load(ctx, state, stamp),
        Stage::Design => design::load(ctx, state, stamp),
        Stage::Soluprot => soluprot::load(ctx, state, stamp),
        Stage::Af2 => af2::load(ctx, state, stamp),
        Stage::Novelty => novelty::load(ctx, state, stamp),
    }
}

pub async fn execute(stage: Stage, ctx: &RunContext, state: &mut PipelineState) -> Result<StageOutput> {
    match stage {
        Stage::Msa => msa::execute(ctx, state).await,
        Stage::Conservation => conservation::execute(ctx, state).await,
        Stage::LigandMask => ligand_mask::execute(ctx, state).await,
        Stage::Design => design::execute(ctx, state).await,
        Stage::Soluprot => soluprot::execute(ctx, state).await,
        Stage::Af2 => af2::execute(ctx, state).await,
        Stage::Novelty => novelty::execute(ctx, state).await,
    }
}
