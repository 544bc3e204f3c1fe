//! Selection filters for scored design candidates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: String,
    pub score: f64,
}

impl ScoredCandidate {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self { id: id.into(), score }
    }
}

/// Keep candidates with `score >= threshold`, preserving input order.
pub fn score_cutoff(candidates: &[ScoredCandidate], threshold: f64) -> Vec<ScoredCandidate> {
    candidates.iter().filter(|c| c.score >= threshold).cloned().collect()
}

/// Keep candidates with `score >= floor`, best first (ties by id), at most `k`.
pub fn top_k_with_floor(candidates: &[ScoredCandidate], floor: f64, k: usize) -> Vec<ScoredCandidate> {
    let mut kept = score_cutoff(candidates, floor);
    kept.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    kept.truncate(k);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_cutoff_keeps_equality() {
        let c = vec![
            ScoredCandidate::new("a", 0.5),
            ScoredCandidate::new("b", 0.49999),
            ScoredCandidate::new("c", 0.9),
        ];
        let kept: Vec<_> = score_cutoff(&c, 0.5).into_iter().map(|c| c.id).collect();
        assert_eq!(kept, vec!["a", "c"]);
    }

    #[test]
    fn test_nan_scores_never_pass() {
        let c = vec![ScoredCandidate::new("x", f64::NAN)];
        assert!(score_cutoff(&c, 0.0).is_empty());
    }

    #[test]
    fn test_top_k_of_25_above_floor() {
        let c: Vec<_> = (0..25).map(|i| ScoredCandidate::new(format!("d{i:02}"), 86.0 + i as f64 * 0.1)).collect();
        let top = top_k_with_floor(&c, 85.0, 20);
        assert_eq!(top.len(), 20);
        assert_eq!(top[0].id, "d24");
        assert!(top.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_top_k_floor_is_inclusive_and_ties_by_id() {
        let c = vec![
            ScoredCandidate::new("b", 85.0),
            ScoredCandidate::new("a", 85.0),
            ScoredCandidate::new("z", 84.99),
        ];
        let top: Vec<_> = top_k_with_floor(&c, 85.0, 5).into_iter().map(|c| c.id).collect();
        assert_eq!(top, vec!["a", "b"]);
    }
}
