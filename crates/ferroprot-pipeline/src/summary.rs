//! `summary.json`: what a completed invocation produced, per tier.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ferroprot_common::TierKey;

use crate::context::{PipelineState, StageOutcome};
use crate::request::Stage;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub query_id: String,
    pub query_length: usize,
    pub derived_query: bool,
    pub design_chains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSummary {
    pub tier: f64,
    /// Fixed position count per design chain.
    pub fixed: BTreeMap<String, usize>,
    pub designs: usize,
    pub soluprot_passed: usize,
    pub af2_scored: usize,
    pub af2_selected: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novelty_hits: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub stop_after: Stage,
    pub target: TargetSummary,
    pub stages: BTreeMap<Stage, StageOutcome>,
    pub tiers: BTreeMap<TierKey, TierSummary>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn from_state(run_id: &str, stop_after: Stage, state: &PipelineState) -> Self {
        let tiers = state
            .tiers
            .iter()
            .map(|(key, t)| {
                let summary = TierSummary {
                    tier: t.tier,
                    fixed: t.fixed.iter().map(|(chain, set)| (chain.clone(), set.len())).collect(),
                    designs: t.designs.len(),
                    soluprot_passed: t.soluble.len(),
                    af2_scored: t.af2_scored,
                    af2_selected: t.selected.iter().map(|s| s.id.clone()).collect(),
                    novelty_hits: t.novelty_hits,
                    errors: t.errors.clone(),
                };
                (*key, summary)
            })
            .collect();

        Self {
            run_id: run_id.to_string(),
            stop_after,
            target: TargetSummary {
                query_id: state.target.query.id.clone(),
                query_length: state.target.query.len(),
                derived_query: state.target.derived_query,
                design_chains: state.target.design_chains.clone(),
            },
            stages: state.outcomes.clone(),
            tiers,
            warnings: state.warnings.clone(),
            errors: state.errors.clone(),
        }
    }
}
