//! Fixed positions handed to the design stage.
//!
//! Per tier and design chain the fixed set is the union of
//! - the tier's conservation positions, mapped through the query/chain alignment
//! - the ligand mask of that chain
//! - caller-supplied extra positions (query numbering, mapped the same way)
//!
//! Inputs are in different coordinate spaces; everything is mapped into
//! structure space before the union.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use ferroprot_bio::conservation::Conservation;
use ferroprot_bio::ligand_mask::LigandMask;
use ferroprot_bio::mapping::{IdentityCheck, SequenceChainMapping};
use ferroprot_common::{ChainPositions, PositionSet, SequenceSpace, StructureSpace, TierKey};

use crate::error::{PipelineError, Result};
use crate::request::{StageRequest, ALL_CHAINS};
use crate::target::Target;

pub const ALIGNMENT_FILE: &str = "query_pdb_alignment.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainAlignmentReport {
    pub chain_id: String,
    pub chain_length: usize,
    pub query_length: usize,
    pub identity: f64,
    pub min_identity: f64,
    pub below_floor: bool,
}

/// Per-chain breakdown written to `tiers/<k>/fixed_positions.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainFixedPositions {
    pub conservation: PositionSet<StructureSpace>,
    pub ligand: PositionSet<StructureSpace>,
    pub extra: PositionSet<StructureSpace>,
    pub fixed: PositionSet<StructureSpace>,
    /// Query positions with no aligned residue in this chain.
    pub dropped: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierFixedPositions {
    pub tier: f64,
    pub key: TierKey,
    pub chains: BTreeMap<String, ChainFixedPositions>,
}

impl TierFixedPositions {
    pub fn fixed(&self) -> ChainPositions {
        self.chains.iter().map(|(id, c)| (id.clone(), c.fixed.clone())).collect()
    }

    /// Payload form: chain → sorted positions.
    pub fn as_lists(&self) -> BTreeMap<String, Vec<usize>> {
        self.chains.iter().map(|(id, c)| (id.clone(), c.fixed.to_vec())).collect()
    }
}

/// Alignments of the query to every design chain, identity-checked.
pub struct ChainMappings {
    pub mappings: Vec<SequenceChainMapping>,
    pub reports: Vec<ChainAlignmentReport>,
    pub warnings: Vec<String>,
}

pub fn align_design_chains(target: &Target, request: &StageRequest) -> Result<ChainMappings> {
    let structure = target
        .structure
        .as_ref()
        .ok_or_else(|| PipelineError::validation("design needs target_pdb"))?;
    let mut mappings = Vec::new();
    let mut reports = Vec::new();
    let mut warnings = Vec::new();

    for chain_id in &target.design_chains {
        let chain = structure
            .chain(chain_id)
            .ok_or_else(|| PipelineError::validation(format!("design chain {chain_id} vanished from target_pdb")))?;
        let chain_seq = chain.sequence();
        let mapping = SequenceChainMapping::align(&target.query.sequence, chain_id, &chain_seq);
        let min_identity = request.query_pdb_min_identity;
        let check = mapping.check_identity(min_identity, request.query_pdb_policy);
        info!(chain = %chain_id, identity = mapping.identity(), "Query aligned to design chain");

        match check {
            IdentityCheck::Passed => {}
            IdentityCheck::Warning(message) => warnings.push(message),
            IdentityCheck::Failed { identity, min_identity } => {
                return Err(PipelineError::AlignmentQuality { chain_id: chain_id.clone(), identity, min_identity });
            }
        }
        reports.push(ChainAlignmentReport {
            chain_id: chain_id.clone(),
            chain_length: chain_seq.len(),
            query_length: target.query.len(),
            identity: mapping.identity(),
            min_identity,
            below_floor: mapping.identity() < min_identity,
        });
        mappings.push(mapping);
    }
    Ok(ChainMappings { mappings, reports, warnings })
}

fn extra_for_chain(request: &StageRequest, chain_id: &str) -> Result<PositionSet<SequenceSpace>> {
    let Some(extra) = &request.fixed_positions_extra else {
        return Ok(PositionSet::new());
    };
    let positions = extra
        .get(ALL_CHAINS)
        .into_iter()
        .chain(extra.get(chain_id))
        .flatten()
        .copied();
    Ok(PositionSet::from_positions(positions)?)
}

/// Fixed positions for one tier.
pub fn tier_fixed_positions(
    tier: f64,
    key: TierKey,
    conservation: &Conservation,
    ligand_mask: &LigandMask,
    mappings: &ChainMappings,
    request: &StageRequest,
) -> Result<TierFixedPositions> {
    let tier_positions = conservation
        .tier(key)
        .ok_or_else(|| PipelineError::validation(format!("conservation has no tier {key}")))?;

    let mut chains = BTreeMap::new();
    for mapping in &mappings.mappings {
        let conserved = mapping.map_positions(&tier_positions.positions);
        let extra = mapping.map_positions(&extra_for_chain(request, &mapping.chain_id)?);
        let ligand = ligand_mask.chain(&mapping.chain_id);
        let fixed = conserved.positions.union(&ligand).union(&extra.positions);

        let mut dropped = conserved.dropped;
        dropped.extend(extra.dropped);
        dropped.sort_unstable();
        dropped.dedup();

        chains.insert(
            mapping.chain_id.clone(),
            ChainFixedPositions { conservation: conserved.positions, ligand, extra: extra.positions, fixed, dropped },
        );
    }
    Ok(TierFixedPositions { tier, key, chains })
}
