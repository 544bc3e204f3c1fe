//! Global (Needleman-Wunsch) alignment of a query sequence against a target,
//! reduced to identity metrics and a query → target position map.

use serde::{Deserialize, Serialize};

const MATCH: i32 = 2;
const MISMATCH: i32 = -1;
const GAP: i32 = -2;

const DIAG: u8 = 0;
const UP: u8 = 1;
const LEFT: u8 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalAlignment {
    pub query_len: usize,
    pub target_len: usize,
    pub aligned_pairs: usize,
    pub matches: usize,
    pub mismatches: usize,
    pub gaps_in_target: usize,
    pub gaps_in_query: usize,
    pub pairwise_identity: f64,
    /// matches / query length
    pub query_identity: f64,
    pub target_identity: f64,
    pub coverage_query: f64,
    pub coverage_target: f64,
    /// 1-based target position for each query position; `None` where the query
    /// residue aligns to a gap.
    pub mapping: Vec<Option<usize>>,
}

fn ratio(a: usize, b: usize) -> f64 {
    if b == 0 { 0.0 } else { a as f64 / b as f64 }
}

pub fn global_alignment(query: &str, target: &str) -> GlobalAlignment {
    let q = query.as_bytes();
    let t = target.as_bytes();
    let (n, m) = (q.len(), t.len());

    if n == 0 || m == 0 {
        return GlobalAlignment {
            query_len: n,
            target_len: m,
            aligned_pairs: 0,
            matches: 0,
            mismatches: 0,
            gaps_in_target: n,
            gaps_in_query: m,
            pairwise_identity: 0.0,
            query_identity: 0.0,
            target_identity: 0.0,
            coverage_query: 0.0,
            coverage_target: 0.0,
            mapping: vec![None; n],
        };
    }

    let stride = m + 1;
    let mut ptr = vec![DIAG; (n + 1) * stride];
    for cell in ptr.iter_mut().take(stride).skip(1) {
        *cell = LEFT;
    }
    let mut prev: Vec<i32> = (0..=m as i32).map(|j| GAP * j).collect();
    let mut cur = vec![0i32; stride];

    for i in 1..=n {
        cur[0] = GAP * i as i32;
        ptr[i * stride] = UP;
        for j in 1..=m {
            let diag = prev[j - 1] + if q[i - 1] == t[j - 1] { MATCH } else { MISMATCH };
            let up = prev[j] + GAP;
            let left = cur[j - 1] + GAP;

            let (mut best, mut dir) = (diag, DIAG);
            if up > best {
                best = up;
                dir = UP;
            }
            if left > best {
                best = left;
                dir = LEFT;
            }
            cur[j] = best;
            ptr[i * stride + j] = dir;
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    let mut mapping = vec![None; n];
    let (mut matches, mut mismatches, mut pairs, mut gaps_t, mut gaps_q) = (0, 0, 0, 0, 0);
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        match ptr[i * stride + j] {
            DIAG => {
                pairs += 1;
                if q[i - 1] == t[j - 1] {
                    matches += 1;
                } else {
                    mismatches += 1;
                }
                mapping[i - 1] = Some(j);
                i -= 1;
                j -= 1;
            }
            UP => {
                gaps_t += 1;
                i -= 1;
            }
            _ => {
                gaps_q += 1;
                j -= 1;
            }
        }
    }

    GlobalAlignment {
        query_len: n,
        target_len: m,
        aligned_pairs: pairs,
        matches,
        mismatches,
        gaps_in_target: gaps_t,
        gaps_in_query: gaps_q,
        pairwise_identity: ratio(matches, pairs),
        query_identity: ratio(matches, n),
        target_identity: ratio(matches, m),
        coverage_query: ratio(pairs, n),
        coverage_target: ratio(pairs, m),
        mapping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_sequences_map_one_to_one() {
        let aln = global_alignment("MKVLA", "MKVLA");
        assert_eq!(aln.matches, 5);
        assert!((aln.query_identity - 1.0).abs() < 1e-12);
        assert_eq!(aln.mapping, (1..=5).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn test_target_with_extra_leading_residues() {
        let aln = global_alignment("KVLA", "GSMKVLA");
        assert_eq!(aln.mapping, vec![Some(4), Some(5), Some(6), Some(7)]);
        assert_eq!(aln.gaps_in_query, 3);
        assert!((aln.query_identity - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_query_residue_missing_from_structure() {
        let aln = global_alignment("MKVWLA", "MKVLA");
        assert_eq!(aln.mapping[3], None);
        assert_eq!(aln.mapping[4], Some(4));
        assert_eq!(aln.gaps_in_target, 1);
        assert!((aln.query_identity - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_inputs() {
        let aln = global_alignment("", "MK");
        assert!(aln.mapping.is_empty());
        let aln = global_alignment("MK", "");
        assert_eq!(aln.mapping, vec![None, None]);
        assert_eq!(aln.query_identity, 0.0);
    }
}
