//! Per-position conservation scores and tiered fixed-position selection.
//!
//! `score[i]` is the frequency of the most common residue in column `i` over all
//! length-compatible hits (gaps and non-letters ignored), `0.0` for a column with
//! no observations. Tiers select positions either by quantile (`floor(L * f)`
//! best-scoring positions, ties broken by lower index) or by absolute threshold.

use serde::{Deserialize, Serialize};
use tracing::debug;

use ferroprot_common::{PositionSet, SequenceSpace, TierKey};

use crate::a3m::Msa;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConservationMode {
    #[default]
    Quantile,
    Threshold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPositions {
    pub tier: f64,
    pub key: TierKey,
    pub positions: PositionSet<SequenceSpace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conservation {
    pub query_length: usize,
    pub mode: ConservationMode,
    pub hits_used: usize,
    pub hits_excluded: usize,
    pub scores: Vec<f64>,
    pub tiers: Vec<TierPositions>,
}

impl Conservation {
    pub fn tier(&self, key: TierKey) -> Option<&TierPositions> {
        self.tiers.iter().find(|t| t.key == key)
    }
}

pub fn conservation_scores(msa: &Msa) -> Vec<f64> {
    let len = msa.query_len();
    let mut counts = vec![[0u32; 26]; len];
    let mut totals = vec![0u32; len];

    for hit in msa.usable_hits() {
        for (i, b) in hit.aligned.bytes().enumerate() {
            if !b.is_ascii_alphabetic() {
                continue;
            }
            let idx = (b.to_ascii_uppercase() - b'A') as usize;
            counts[i][idx] += 1;
            totals[i] += 1;
        }
    }

    counts
        .iter()
        .zip(totals.iter())
        .map(|(col, &total)| {
            if total == 0 {
                0.0
            } else {
                let max = col.iter().copied().max().unwrap_or(0);
                max as f64 / total as f64
            }
        })
        .collect()
}

/// Select 1-based positions for one tier. Output is sorted ascending.
pub fn select_positions(scores: &[f64], tier: f64, mode: ConservationMode) -> PositionSet<SequenceSpace> {
    let len = scores.len();
    let mut ranked: Vec<(usize, f64)> = scores.iter().enumerate().map(|(i, &s)| (i + 1, s)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let chosen: Vec<usize> = match mode {
        ConservationMode::Threshold => ranked.iter().filter(|(_, s)| *s >= tier).map(|(p, _)| *p).collect(),
        ConservationMode::Quantile => {
            let k = (len as f64 * tier).floor();
            let k = if k.is_nan() || k < 0.0 { 0 } else { (k as usize).min(len) };
            ranked.iter().take(k).map(|(p, _)| *p).collect()
        }
    };

    let mut set = PositionSet::new();
    for p in chosen {
        // positions are 1-based by construction
        let _ = set.insert(p);
    }
    set
}

pub fn compute_conservation(msa: &Msa, tiers: &[f64], mode: ConservationMode) -> Result<Conservation> {
    let scores = conservation_scores(msa);
    let mut out = Vec::with_capacity(tiers.len());
    for &tier in tiers {
        let positions = select_positions(&scores, tier, mode);
        debug!(tier, fixed = positions.len(), "Conservation tier selected");
        out.push(TierPositions { tier, key: TierKey::from_tier(tier)?, positions });
    }
    Ok(Conservation {
        query_length: msa.query_len(),
        mode,
        hits_used: msa.usable_hits().count(),
        hits_excluded: msa.excluded_hits(),
        scores,
        tiers: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scores_ignore_gaps_and_mismatched_hits() {
        let msa = Msa::parse(">q\nMKV\n>a\nMKV\n>b\nMRV\n>c\n--V\n>d\nMK\n").unwrap();
        let scores = conservation_scores(&msa);
        assert_eq!(scores.len(), 3);
        assert!((scores[0] - 1.0).abs() < 1e-12);
        assert!((scores[1] - 0.5).abs() < 1e-12);
        assert!((scores[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_column_without_observations_scores_zero() {
        let msa = Msa::parse(">q\nMK\n>a\nM-\n").unwrap();
        assert_eq!(conservation_scores(&msa), vec![1.0, 0.0]);
    }

    #[test]
    fn test_quantile_count_for_221_residues() {
        let scores: Vec<f64> = (0..221).map(|i| (i % 7) as f64 / 7.0).collect();
        let set = select_positions(&scores, 0.3, ConservationMode::Quantile);
        assert_eq!(set.len(), 66);

        // Highest score first, lower index on ties.
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        let mut expected: Vec<usize> = order[..66].iter().map(|i| i + 1).collect();
        expected.sort_unstable();
        assert_eq!(set.to_vec(), expected);

        // 31 positions each at 6/7 and 5/7, then the four lowest-index 4/7 positions.
        let fours: Vec<usize> = set.to_vec().into_iter().filter(|p| (p - 1) % 7 == 4).collect();
        assert_eq!(fours, vec![5, 12, 19, 26]);
    }

    #[test]
    fn test_quantile_ties_prefer_lower_index() {
        let scores = vec![0.5, 0.9, 0.5, 0.5, 0.1];
        let set = select_positions(&scores, 0.4, ConservationMode::Quantile);
        // k = floor(5 * 0.4) = 2: position 2 (0.9) then lowest-index 0.5 (position 1)
        assert_eq!(set.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_quantile_ties_at_the_cut_take_lowest_indices() {
        let scores = vec![0.2, 0.8, 0.8, 0.8, 0.8, 0.1];
        // k = floor(6 * 0.5) = 3 out of four tied 0.8 columns
        let set = select_positions(&scores, 0.5, ConservationMode::Quantile);
        assert_eq!(set.to_vec(), vec![2, 3, 4]);
    }

    #[test]
    fn test_quantile_is_deterministic() {
        let scores: Vec<f64> = (0..50).map(|i| ((i * 37) % 11) as f64 / 11.0).collect();
        let a = select_positions(&scores, 0.5, ConservationMode::Quantile);
        let b = select_positions(&scores, 0.5, ConservationMode::Quantile);
        assert_eq!(a, b);
    }

    #[test]
    fn test_threshold_mode_is_inclusive() {
        let scores = vec![0.7, 0.69, 1.0, 0.0];
        let set = select_positions(&scores, 0.7, ConservationMode::Threshold);
        assert_eq!(set.to_vec(), vec![1, 3]);
    }

    #[test]
    fn test_quantile_clamps() {
        let scores = vec![0.1, 0.2];
        assert_eq!(select_positions(&scores, 5.0, ConservationMode::Quantile).len(), 2);
        assert!(select_positions(&scores, 0.0, ConservationMode::Quantile).is_empty());
        assert!(select_positions(&[], 0.5, ConservationMode::Quantile).is_empty());
    }

    #[test]
    fn test_compute_conservation_keys_tiers() {
        let msa = Msa::parse(">q\nMKVLA\n>a\nMKVLA\n>b\nMKVLG\n").unwrap();
        let cons = compute_conservation(&msa, &[0.3, 0.5], ConservationMode::Quantile).unwrap();
        assert_eq!(cons.query_length, 5);
        assert_eq!(cons.hits_used, 2);
        assert_eq!(cons.tier(TierKey(30)).unwrap().positions.to_vec(), vec![1]);
        assert_eq!(cons.tier(TierKey(50)).unwrap().positions.to_vec(), vec![1, 2]);
    }
}
