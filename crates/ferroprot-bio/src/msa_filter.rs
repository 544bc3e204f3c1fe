//! Optional quality floor for MSA hits, applied before conservation scoring.

use serde::{Deserialize, Serialize};

use crate::a3m::{AlignmentRecord, Msa};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MsaQualityFilter {
    /// Minimum fraction of query columns covered by a residue.
    pub min_coverage: f64,
    /// Minimum identity to the query over covered columns.
    pub min_identity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsaQualityReport {
    pub total_hits: usize,
    pub kept: usize,
    pub dropped_length: usize,
    pub dropped_coverage: usize,
    pub dropped_identity: usize,
    pub min_coverage: f64,
    pub min_identity: f64,
}

fn is_gap(c: char) -> bool {
    c == '-' || c == '.'
}

/// (coverage, identity) of `hit` against `query`, both aligned to the same length.
pub fn hit_quality(query: &str, hit: &AlignmentRecord) -> (f64, f64) {
    let len = query.len();
    if len == 0 {
        return (0.0, 0.0);
    }
    let mut covered = 0usize;
    let mut identical = 0usize;
    for (q, h) in query.chars().zip(hit.aligned.chars()) {
        if is_gap(h) || !h.is_ascii_alphabetic() {
            continue;
        }
        covered += 1;
        if q.eq_ignore_ascii_case(&h) {
            identical += 1;
        }
    }
    let coverage = covered as f64 / len as f64;
    let identity = if covered == 0 { 0.0 } else { identical as f64 / covered as f64 };
    (coverage, identity)
}

impl MsaQualityFilter {
    pub fn is_enabled(&self) -> bool {
        self.min_coverage > 0.0 || self.min_identity > 0.0
    }

    pub fn apply(&self, msa: &Msa) -> (Msa, MsaQualityReport) {
        let mut report = MsaQualityReport {
            total_hits: msa.hits.len(),
            min_coverage: self.min_coverage,
            min_identity: self.min_identity,
            ..Default::default()
        };
        let mut kept = Vec::new();
        for hit in &msa.hits {
            if !hit.matches_query_length {
                report.dropped_length += 1;
                continue;
            }
            let (coverage, identity) = hit_quality(&msa.query.aligned, hit);
            if coverage < self.min_coverage {
                report.dropped_coverage += 1;
            } else if identity < self.min_identity {
                report.dropped_identity += 1;
            } else {
                kept.push(hit.clone());
            }
        }
        report.kept = kept.len();
        (Msa { query: msa.query.clone(), hits: kept }, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_drops_low_coverage_and_identity() {
        let msa = Msa::parse(">q\nMKVLA\n>full\nMKVLA\n>gappy\nM----\n>diverged\nAAAAA\n>short\nMK\n").unwrap();
        let filter = MsaQualityFilter { min_coverage: 0.5, min_identity: 0.5 };
        let (kept, report) = filter.apply(&msa);
        let names: Vec<_> = kept.hits.iter().map(|h| h.header.as_str()).collect();
        assert_eq!(names, vec!["full"]);
        assert_eq!(report.total_hits, 4);
        assert_eq!(report.dropped_coverage, 1);
        assert_eq!(report.dropped_identity, 1);
        assert_eq!(report.dropped_length, 1);
    }

    #[test]
    fn test_disabled_filter_keeps_all_usable() {
        let msa = Msa::parse(">q\nMK\n>a\nM-\n>b\n--\n").unwrap();
        let filter = MsaQualityFilter::default();
        assert!(!filter.is_enabled());
        let (kept, _) = filter.apply(&msa);
        assert_eq!(kept.hits.len(), 2);
    }
}
