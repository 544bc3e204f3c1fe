//! `ligand_mask`: residues near bound ligands. Sequence-only targets record an
//! empty mask.

use serde_json::json;
use tracing::{info, instrument};

use ferroprot_bio::ligand_mask::{ligand_proximity_mask, LigandMask, LigandMaskParams};
use ferroprot_jobs::fingerprint::text_digest;
use ferroprot_jobs::Fingerprint;

use crate::context::{PipelineState, RunContext, StageOutput, StageStamp};
use crate::error::Result;
use crate::request::Stage;

pub const MASK_PATH: &str = "ligand_mask.json";

fn params(ctx: &RunContext, state: &PipelineState) -> LigandMaskParams {
    LigandMaskParams {
        distance: ctx.request.ligand_mask_distance,
        ligand_resnames: ctx.request.ligand_resnames.clone(),
        chains: (!state.target.design_chains.is_empty()).then(|| state.target.design_chains.clone()),
    }
}

pub fn fingerprint(ctx: &RunContext, state: &PipelineState) -> Result<Fingerprint> {
    Ok(Fingerprint::of(&json!({
        "pdb_sha256": state.target.pdb_text.as_deref().map(text_digest),
        "params": params(ctx, state),
    }))?)
}

pub fn load(ctx: &RunContext, state: &mut PipelineState, _stamp: &StageStamp) -> Result<()> {
    state.ligand_mask = Some(ctx.store.read_json(&ctx.run_id, MASK_PATH)?);
    Ok(())
}

#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn execute(ctx: &RunContext, state: &mut PipelineState) -> Result<StageOutput> {
    let params = params(ctx, state);
    let mask = match &state.target.structure {
        Some(structure) => ligand_proximity_mask(structure, &params),
        None => LigandMask::empty(params.distance),
    };
    if mask.skipped_atom_count > 0 {
        ctx.warn(
            state,
            Stage::LigandMask,
            format!("target_pdb: {} atom records without coordinates were excluded", mask.skipped_atom_count),
        )?;
    }
    if state.target.structure.is_some() && mask.ligand_atom_count == 0 {
        ctx.warn(state, Stage::LigandMask, "target_pdb has no ligand atoms; ligand mask is empty")?;
    }
    ctx.store.write_json(&ctx.run_id, MASK_PATH, &mask)?;

    let masked: usize = mask.chains.values().map(|p| p.len()).sum();
    info!(ligand_atoms = mask.ligand_atom_count, skipped_atoms = mask.skipped_atom_count, masked, "Ligand mask computed");
    let notes = json!({
        "ligand_atoms": mask.ligand_atom_count,
        "skipped_atoms": mask.skipped_atom_count,
        "masked_residues": masked,
    });
    state.ligand_mask = Some(mask);
    Ok(StageOutput::new(vec![MASK_PATH.to_string()]).with_notes(notes))
}
