//! Sequence → structure position mapping.
//!
//! Conservation positions index the query sequence; the design stage needs
//! residue ordinals of a structure chain. The two are related only through a
//! global alignment, whose identity is checked against a floor before use.

use serde::{Deserialize, Serialize};

use ferroprot_common::{PositionSet, SequenceSpace, StructureSpace};

use crate::alignment::{global_alignment, GlobalAlignment};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityPolicy {
    #[default]
    Error,
    Warn,
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdentityCheck {
    Passed,
    Warning(String),
    Failed { identity: f64, min_identity: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceChainMapping {
    pub chain_id: String,
    pub chain_sequence: String,
    pub alignment: GlobalAlignment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedPositions {
    pub positions: PositionSet<StructureSpace>,
    /// Query positions with no aligned structure residue.
    pub dropped: Vec<usize>,
}

impl SequenceChainMapping {
    pub fn align(query: &str, chain_id: &str, chain_sequence: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            chain_sequence: chain_sequence.to_string(),
            alignment: global_alignment(query, chain_sequence),
        }
    }

    pub fn identity(&self) -> f64 {
        self.alignment.query_identity
    }

    pub fn map_positions(&self, set: &PositionSet<SequenceSpace>) -> MappedPositions {
        let mut positions = PositionSet::new();
        let mut dropped = Vec::new();
        for p in set.iter() {
            match self.alignment.mapping.get(p - 1).copied().flatten() {
                Some(target) => {
                    let _ = positions.insert(target);
                }
                None => dropped.push(p),
            }
        }
        MappedPositions { positions, dropped }
    }

    pub fn check_identity(&self, min_identity: f64, policy: IdentityPolicy) -> IdentityCheck {
        let identity = self.identity();
        if identity >= min_identity {
            return IdentityCheck::Passed;
        }
        match policy {
            IdentityPolicy::Error => IdentityCheck::Failed { identity, min_identity },
            IdentityPolicy::Warn => IdentityCheck::Warning(format!(
                "query/structure identity {identity:.3} for chain {} is below {min_identity:.3}",
                self.chain_id
            )),
            IdentityPolicy::Ignore => IdentityCheck::Passed,
        }
    }
}
