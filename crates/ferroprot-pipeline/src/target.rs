//! Request validation and the resolved design target.
//!
//! Everything a run can reject without touching a remote service is checked
//! here, before the run is marked running.

use std::collections::BTreeSet;

use ferroprot_bio::structure::Structure;
use ferroprot_common::fasta::{normalize_sequence, parse_fasta};
use ferroprot_common::{SequenceRecord, TierKey};

use crate::error::{PipelineError, Result};
use crate::request::{Stage, StageRequest, ALL_CHAINS};

#[derive(Debug, Clone)]
pub struct Target {
    /// Query sequence used for the MSA and as the reference numbering.
    pub query: SequenceRecord,
    pub pdb_text: Option<String>,
    pub structure: Option<Structure>,
    /// Chains to design, in structure order. Empty without a structure.
    pub design_chains: Vec<String>,
    /// The query was taken from the first design chain.
    pub derived_query: bool,
}

impl Target {
    pub fn has_structure(&self) -> bool {
        self.structure.is_some()
    }
}

fn non_empty(text: &Option<String>) -> Option<&str> {
    text.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::validation(format!("{name} must be within [0, 1], got {value}")));
    }
    Ok(())
}

fn check_tiers(request: &StageRequest) -> Result<()> {
    if request.conservation_tiers.is_empty() {
        return Err(PipelineError::validation("conservation_tiers must not be empty"));
    }
    let mut seen = BTreeSet::new();
    for &tier in &request.conservation_tiers {
        if !(tier > 0.0 && tier <= 1.0) {
            return Err(PipelineError::validation(format!("conservation tier {tier} must be within (0, 1]")));
        }
        let key = TierKey::from_tier(tier)?;
        if !seen.insert(key) {
            return Err(PipelineError::validation(format!("conservation tiers collide on key {key}")));
        }
    }
    Ok(())
}

fn check_numbers(request: &StageRequest) -> Result<()> {
    check_fraction("msa_min_coverage", request.msa_min_coverage)?;
    check_fraction("msa_min_identity", request.msa_min_identity)?;
    check_fraction("query_pdb_min_identity", request.query_pdb_min_identity)?;
    if !(request.ligand_mask_distance.is_finite() && request.ligand_mask_distance > 0.0) {
        return Err(PipelineError::validation("ligand_mask_distance must be a positive number"));
    }
    if request.num_seq_per_tier == 0 {
        return Err(PipelineError::validation("num_seq_per_tier must be at least 1"));
    }
    if request.batch_size == 0 {
        return Err(PipelineError::validation("batch_size must be at least 1"));
    }
    if !(request.sampling_temp.is_finite() && request.sampling_temp > 0.0) {
        return Err(PipelineError::validation("sampling_temp must be a positive number"));
    }
    if request.mmseqs_max_seqs == 0 || request.mmseqs_threads == 0 {
        return Err(PipelineError::validation("mmseqs_max_seqs and mmseqs_threads must be at least 1"));
    }
    if request.af2_top_k == Some(0) {
        return Err(PipelineError::validation("af2_top_k must be at least 1"));
    }
    if let Some(cutoff) = request.af2_rmsd_cutoff {
        if !(cutoff.is_finite() && cutoff > 0.0) {
            return Err(PipelineError::validation("af2_rmsd_cutoff must be a positive number"));
        }
    }
    if request.mmseqs_target_db.trim().is_empty() || request.novelty_target_db.trim().is_empty() {
        return Err(PipelineError::validation("target databases must not be empty"));
    }
    Ok(())
}

fn resolve_design_chains(request: &StageRequest, structure: &Structure) -> Result<Vec<String>> {
    let available: Vec<String> = structure.chains().into_iter().map(|c| c.id).collect();
    if available.is_empty() {
        return Err(PipelineError::validation("target_pdb contains no ATOM records"));
    }
    let Some(requested) = &request.design_chains else {
        return Ok(available);
    };
    let mut chosen = Vec::new();
    for raw in requested {
        let id = raw.trim();
        if !available.iter().any(|c| c == id) {
            return Err(PipelineError::validation(format!(
                "design chain {id:?} not found in target_pdb (chains: {})",
                available.join(", ")
            )));
        }
        if !chosen.iter().any(|c: &String| c == id) {
            chosen.push(id.to_string());
        }
    }
    if chosen.is_empty() {
        return Err(PipelineError::validation("design_chains must not be empty"));
    }
    // Structure order, so `/`-joined sequences line up with the chains.
    Ok(available.into_iter().filter(|c| chosen.contains(c)).collect())
}

fn check_extra_positions(request: &StageRequest, target: &Target) -> Result<()> {
    let Some(extra) = &request.fixed_positions_extra else {
        return Ok(());
    };
    let len = target.query.len();
    for (chain, positions) in extra {
        if chain != ALL_CHAINS && !target.design_chains.contains(chain) {
            return Err(PipelineError::validation(format!(
                "fixed_positions_extra names chain {chain:?}, which is not a design chain"
            )));
        }
        if let Some(bad) = positions.iter().find(|p| **p == 0 || **p > len) {
            return Err(PipelineError::validation(format!(
                "fixed_positions_extra position {bad} is outside the query (1..={len})"
            )));
        }
    }
    Ok(())
}

/// Validate `request` and resolve the query, structure and design chains.
pub fn resolve_target(request: &StageRequest) -> Result<Target> {
    let fasta = non_empty(&request.target_fasta);
    let pdb = non_empty(&request.target_pdb);
    if fasta.is_none() && pdb.is_none() {
        return Err(PipelineError::validation("provide target_fasta, target_pdb, or both"));
    }
    check_tiers(request)?;
    check_numbers(request)?;

    let (structure, design_chains) = match pdb {
        Some(text) => {
            let structure = Structure::parse(text);
            let chains = resolve_design_chains(request, &structure)?;
            (Some(structure), chains)
        }
        None => {
            if request.design_chains.as_ref().is_some_and(|c| !c.is_empty()) {
                return Err(PipelineError::validation("design_chains requires target_pdb"));
            }
            (None, Vec::new())
        }
    };

    if structure.is_none() && request.stop_after().requires_structure() {
        return Err(PipelineError::validation(format!(
            "stages from {} on need target_pdb; set stop_after to ligand_mask or provide a structure",
            Stage::Design
        )));
    }

    let (query, derived_query) = match fasta {
        Some(text) => {
            let first = parse_fasta(text)
                .map_err(|e| PipelineError::validation(format!("target_fasta: {e}")))?
                .into_iter()
                .next()
                .ok_or_else(|| PipelineError::validation("target_fasta has no records"))?;
            let sequence = normalize_sequence(&first.sequence)
                .ok_or_else(|| PipelineError::validation("target_fasta query sequence is empty"))?;
            (SequenceRecord::new(first.header, sequence), false)
        }
        None => {
            let chain_id = design_chains
                .first()
                .ok_or_else(|| PipelineError::validation("no design chain to derive the query from"))?;
            let sequence = structure
                .as_ref()
                .and_then(|s| s.chain(chain_id))
                .map(|c| c.sequence())
                .unwrap_or_default();
            if sequence.is_empty() {
                return Err(PipelineError::validation(format!("chain {chain_id} has no residues")));
            }
            (SequenceRecord::new(format!("target_chain_{chain_id} derived from target_pdb"), sequence), true)
        }
    };

    let target = Target { query, pdb_text: pdb.map(|t| format!("{t}\n")), structure, design_chains, derived_query };
    check_extra_positions(request, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferroprot_test_utils::fixtures::zinc_site_pdb;
    use ferroprot_test_utils::PdbBuilder;
    use std::collections::BTreeMap;

    fn request(fasta: Option<&str>, pdb: Option<String>) -> StageRequest {
        StageRequest { target_fasta: fasta.map(str::to_string), target_pdb: pdb, ..Default::default() }
    }

    #[test]
    fn test_requires_some_target() {
        let err = resolve_target(&request(None, None)).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_sequence_only_cannot_reach_design() {
        let err = resolve_target(&request(Some(">q\nMKVLA"), None)).unwrap_err();
        assert!(err.to_string().contains("target_pdb"), "{err}");

        let mut r = request(Some(">q\nmkvla"), None);
        r.stop_after = Some(Stage::LigandMask);
        let t = resolve_target(&r).unwrap();
        assert_eq!(t.query.sequence, "MKVLA");
        assert!(t.design_chains.is_empty());
    }

    #[test]
    fn test_structure_only_derives_query() {
        let t = resolve_target(&request(None, Some(zinc_site_pdb("MKVLAG")))).unwrap();
        assert!(t.derived_query);
        assert_eq!(t.query.sequence, "MKVLAG");
        assert_eq!(t.query.id, "target_chain_A");
        assert_eq!(t.design_chains, vec!["A"]);
    }

    #[test]
    fn test_design_chains_checked_and_ordered() {
        let pdb = PdbBuilder::new()
            .ca_trace("A", "MKV", [0.0, 0.0, 0.0], 1)
            .ca_trace("B", "GGS", [0.0, 20.0, 0.0], 1)
            .build();
        let mut r = request(None, Some(pdb));
        r.design_chains = Some(vec!["B".into(), "A".into(), "B".into()]);
        assert_eq!(resolve_target(&r).unwrap().design_chains, vec!["A", "B"]);

        r.design_chains = Some(vec!["C".into()]);
        assert!(resolve_target(&r).is_err());
    }

    #[test]
    fn test_tier_and_number_checks() {
        let base = request(None, Some(zinc_site_pdb("MKVLAG")));
        let cases = [
            StageRequest { conservation_tiers: vec![], ..base.clone() },
            StageRequest { conservation_tiers: vec![0.3, 0.301], ..base.clone() },
            StageRequest { conservation_tiers: vec![1.5], ..base.clone() },
            StageRequest { num_seq_per_tier: 0, ..base.clone() },
            StageRequest { ligand_mask_distance: -1.0, ..base.clone() },
            StageRequest { query_pdb_min_identity: 1.2, ..base.clone() },
            StageRequest { af2_top_k: Some(0), ..base.clone() },
        ];
        for case in cases {
            assert_eq!(resolve_target(&case).unwrap_err().kind(), "validation_error");
        }
    }

    #[test]
    fn test_extra_positions_must_fit_query() {
        let mut r = request(None, Some(zinc_site_pdb("MKVLAG")));
        r.fixed_positions_extra = Some(BTreeMap::from([("*".to_string(), vec![6])]));
        assert!(resolve_target(&r).is_ok());
        r.fixed_positions_extra = Some(BTreeMap::from([("*".to_string(), vec![7])]));
        assert!(resolve_target(&r).is_err());
        r.fixed_positions_extra = Some(BTreeMap::from([("Z".to_string(), vec![1])]));
        assert!(resolve_target(&r).is_err());
    }
}
