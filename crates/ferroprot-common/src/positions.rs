//! 1-based residue position sets tagged with their coordinate space.
//!
//! Conservation produces positions in *sequence* space (indices into the query
//! sequence). Ligand masking and the design stage work in *structure* space
//! (1-based residue ordinals within one chain of the target structure). The two
//! are only comparable after alignment, so the space is a type parameter:
//! `union` exists only between sets of the same space, and the only route from
//! sequence to structure space is an explicit mapping function.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FormatError, Result};

pub trait CoordinateSpace: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Positions in the query sequence (MSA / conservation numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSpace;

/// Residue ordinals within a single chain of the target structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureSpace;

impl CoordinateSpace for SequenceSpace {
    const NAME: &'static str = "sequence";
}

impl CoordinateSpace for StructureSpace {
    const NAME: &'static str = "structure";
}

/// Sorted, de-duplicated set of 1-based positions in coordinate space `S`.
pub struct PositionSet<S: CoordinateSpace> {
    positions: BTreeSet<usize>,
    _space: PhantomData<S>,
}

/// Structure-space position sets keyed by chain id.
pub type ChainPositions = BTreeMap<String, PositionSet<StructureSpace>>;

impl<S: CoordinateSpace> PositionSet<S> {
    pub fn new() -> Self {
        Self { positions: BTreeSet::new(), _space: PhantomData }
    }

    /// Build from 1-based positions; `0` is rejected.
    pub fn from_positions<I: IntoIterator<Item = usize>>(iter: I) -> Result<Self> {
        let mut set = Self::new();
        for p in iter {
            set.insert(p)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, position: usize) -> Result<()> {
        if position == 0 {
            return Err(FormatError::ZeroPosition { position });
        }
        self.positions.insert(position);
        Ok(())
    }

    pub fn contains(&self, position: usize) -> bool {
        self.positions.contains(&position)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.positions.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    pub fn union(&self, other: &PositionSet<S>) -> PositionSet<S> {
        PositionSet {
            positions: self.positions.union(&other.positions).copied().collect(),
            _space: PhantomData,
        }
    }

    pub fn is_superset(&self, other: &PositionSet<S>) -> bool {
        self.positions.is_superset(&other.positions)
    }

    pub fn space(&self) -> &'static str {
        S::NAME
    }
}

impl<S: CoordinateSpace> Default for PositionSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CoordinateSpace> Clone for PositionSet<S> {
    fn clone(&self) -> Self {
        Self { positions: self.positions.clone(), _space: PhantomData }
    }
}

impl<S: CoordinateSpace> PartialEq for PositionSet<S> {
    fn eq(&self, other: &Self) -> bool {
        self.positions == other.positions
    }
}

impl<S: CoordinateSpace> Eq for PositionSet<S> {}

impl<S: CoordinateSpace> fmt::Debug for PositionSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PositionSet<{}>{:?}", S::NAME, self.positions)
    }
}

impl<S: CoordinateSpace> Serialize for PositionSet<S> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> std::result::Result<Ser::Ok, Ser::Error> {
        serializer.collect_seq(self.positions.iter())
    }
}

impl<'de, S: CoordinateSpace> Deserialize<'de> for PositionSet<S> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Vec::<usize>::deserialize(deserializer)?;
        PositionSet::from_positions(raw).map_err(serde::de::Error::custom)
    }
}

/// Per-chain union of two structure-space maps.
pub fn union_chains(a: &ChainPositions, b: &ChainPositions) -> ChainPositions {
    let mut out = a.clone();
    for (chain, set) in b {
        let merged = match out.get(chain) {
            Some(existing) => existing.union(set),
            None => set.clone(),
        };
        out.insert(chain.clone(), merged);
    }
    out
}
