//! Post-design verification that fixed positions were not mutated.
//!
//! Designed sequences cover the design chains in order, separated by `/`. A
//! single unseparated sequence is accepted when there is exactly one design chain.
//! A fixed position past the end of either segment counts as a violation, with
//! [`MISSING_RESIDUE`] standing in for the absent residue.

use serde::{Deserialize, Serialize};

use ferroprot_common::{ChainPositions, SequenceRecord};

use crate::error::{BioError, Result};

pub const MISSING_RESIDUE: char = '-';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainViolation {
    pub chain_id: String,
    /// (position, native residue, designed residue)
    pub mutated: Vec<(usize, char, char)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignViolation {
    pub design_id: String,
    pub chains: Vec<ChainViolation>,
}

impl DesignViolation {
    pub fn positions(&self) -> Vec<(String, usize)> {
        self.chains
            .iter()
            .flat_map(|c| c.mutated.iter().map(move |(p, _, _)| (c.chain_id.clone(), *p)))
            .collect()
    }
}

fn segments<'a>(design_id: &str, sequence: &'a str, chains: usize) -> Result<Vec<&'a str>> {
    let parts: Vec<&str> = sequence.split('/').collect();
    if parts.len() != chains {
        return Err(BioError::SegmentMismatch {
            design_id: design_id.to_string(),
            segments: parts.len(),
            chains,
        });
    }
    Ok(parts)
}

/// Compare `design` against `native` at every fixed position of every design chain.
/// Returns `None` when all fixed residues are preserved.
pub fn check_fixed_positions(
    native: &str,
    design: &SequenceRecord,
    design_chains: &[String],
    fixed: &ChainPositions,
) -> Result<Option<DesignViolation>> {
    let native_parts = segments("native", native, design_chains.len())?;
    let design_parts = segments(&design.id, &design.sequence, design_chains.len())?;

    let mut chains = Vec::new();
    for ((chain_id, nat), des) in design_chains.iter().zip(native_parts).zip(design_parts) {
        let Some(positions) = fixed.get(chain_id) else { continue };
        let nat: Vec<char> = nat.chars().collect();
        let des: Vec<char> = des.chars().collect();
        let mutated: Vec<(usize, char, char)> = positions
            .iter()
            .filter_map(|p| match (nat.get(p - 1), des.get(p - 1)) {
                (Some(n), Some(d)) => (!n.eq_ignore_ascii_case(d)).then_some((p, *n, *d)),
                (n, d) => Some((p, n.copied().unwrap_or(MISSING_RESIDUE), d.copied().unwrap_or(MISSING_RESIDUE))),
            })
            .collect();
        if !mutated.is_empty() {
            chains.push(ChainViolation { chain_id: chain_id.clone(), mutated });
        }
    }

    Ok((!chains.is_empty()).then(|| DesignViolation { design_id: design.id.clone(), chains }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferroprot_common::PositionSet;

    fn fixed(pairs: &[(&str, &[usize])]) -> ChainPositions {
        pairs
            .iter()
            .map(|(c, p)| (c.to_string(), PositionSet::from_positions(p.iter().copied()).unwrap()))
            .collect()
    }

    #[test]
    fn test_preserved_positions_pass() {
        let design = SequenceRecord::new("d1", "MKALA");
        let res = check_fixed_positions("MKVLA", &design, &["A".into()], &fixed(&[("A", &[1, 2, 5])])).unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn test_mutation_reported_per_chain() {
        let design = SequenceRecord::new("d1", "MRV/GGA");
        let res = check_fixed_positions(
            "MKV/GGG",
            &design,
            &["A".into(), "B".into()],
            &fixed(&[("A", &[1, 2]), ("B", &[3])]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(res.chains.len(), 2);
        assert_eq!(res.chains[0].mutated, vec![(2, 'K', 'R')]);
        assert_eq!(res.positions(), vec![("A".to_string(), 2), ("B".to_string(), 3)]);
    }

    #[test]
    fn test_positions_past_the_sequence_end_are_violations() {
        // Design truncated before fixed position 5.
        let short = SequenceRecord::new("d1", "MKVL");
        let res = check_fixed_positions("MKVLA", &short, &["A".into()], &fixed(&[("A", &[1, 5])])).unwrap().unwrap();
        assert_eq!(res.chains[0].mutated, vec![(5, 'A', MISSING_RESIDUE)]);

        // Fixed position beyond the native chain.
        let design = SequenceRecord::new("d2", "MKVLA");
        let res = check_fixed_positions("MKVLA", &design, &["A".into()], &fixed(&[("A", &[2, 9])])).unwrap().unwrap();
        assert_eq!(res.positions(), vec![("A".to_string(), 9)]);
        assert_eq!(res.chains[0].mutated, vec![(9, MISSING_RESIDUE, MISSING_RESIDUE)]);
    }

    #[test]
    fn test_segment_mismatch_is_error() {
        let design = SequenceRecord::new("d1", "MKV");
        let err = check_fixed_positions("MKV/GG", &design, &["A".into(), "B".into()], &ChainPositions::new());
        assert!(matches!(err, Err(BioError::SegmentMismatch { .. })));
    }
}
