//! Ligand proximity masking.
//!
//! A polymer residue is masked when any of its heavy atoms lies within the cutoff
//! (inclusive) of any ligand heavy atom. Ligands are non-water `HETATM` groups;
//! polymer binding partners (peptides, nucleic acids on `ATOM` records) are not
//! detected as ligands.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ferroprot_common::{ChainPositions, PositionSet, StructureSpace};

use crate::structure::Structure;

pub const DEFAULT_LIGAND_DISTANCE: f64 = 6.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LigandMaskParams {
    pub distance: f64,
    pub ligand_resnames: Option<Vec<String>>,
    /// Restrict masking to these chains; all polymer chains when `None`.
    pub chains: Option<Vec<String>>,
}

impl Default for LigandMaskParams {
    fn default() -> Self {
        Self { distance: DEFAULT_LIGAND_DISTANCE, ligand_resnames: None, chains: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LigandMask {
    pub distance: f64,
    pub ligand_atom_count: usize,
    /// Atom records left out of masking for lack of coordinates.
    #[serde(default)]
    pub skipped_atom_count: usize,
    pub ligand_resnames: Vec<String>,
    pub chains: ChainPositions,
}

impl LigandMask {
    pub fn empty(distance: f64) -> Self {
        Self { distance, ligand_atom_count: 0, skipped_atom_count: 0, ligand_resnames: Vec::new(), chains: ChainPositions::new() }
    }

    pub fn chain(&self, id: &str) -> PositionSet<StructureSpace> {
        self.chains.get(id).cloned().unwrap_or_default()
    }
}

pub fn ligand_proximity_mask(structure: &Structure, params: &LigandMaskParams) -> LigandMask {
    let ligands = structure.ligand_atoms(params.ligand_resnames.as_deref());
    let cutoff2 = params.distance * params.distance;
    let resnames: BTreeSet<String> = ligands.iter().map(|a| a.resname.to_ascii_uppercase()).collect();

    let mut chains = ChainPositions::new();
    for chain in structure.chains() {
        if let Some(only) = &params.chains {
            if !only.contains(&chain.id) {
                continue;
            }
        }
        let mut set = PositionSet::<StructureSpace>::new();
        for res in &chain.residues {
            let close = res
                .atoms
                .iter()
                .filter(|a| a.is_heavy())
                .any(|a| ligands.iter().any(|l| a.dist2(l) <= cutoff2));
            if close {
                let _ = set.insert(res.ordinal);
            }
        }
        debug!(chain = %chain.id, masked = set.len(), "Ligand mask computed");
        chains.insert(chain.id.clone(), set);
    }

    LigandMask {
        distance: params.distance,
        ligand_atom_count: ligands.len(),
        skipped_atom_count: structure.skipped_atoms,
        ligand_resnames: resnames.into_iter().collect(),
        chains,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{format_atom_line, RecordKind};

    fn pdb_with_ligand_at(x: f64) -> String {
        [
            format_atom_line(RecordKind::Atom, 1, "CA", "ALA", "A", 1, [0.0, 0.0, 0.0], "C"),
            format_atom_line(RecordKind::Atom, 2, "CA", "GLY", "A", 2, [20.0, 0.0, 0.0], "C"),
            format_atom_line(RecordKind::Atom, 3, "CA", "SER", "B", 1, [0.0, 30.0, 0.0], "C"),
            format_atom_line(RecordKind::Hetatm, 4, "C1", "LIG", "A", 100, [x, 0.0, 0.0], "C"),
            format_atom_line(RecordKind::Hetatm, 5, "O", "HOH", "A", 200, [20.0, 0.5, 0.0], "O"),
        ]
        .join("\n")
    }

    #[test]
    fn test_distance_boundary_is_inclusive() {
        let at_cutoff = Structure::parse(&pdb_with_ligand_at(6.0));
        let mask = ligand_proximity_mask(&at_cutoff, &LigandMaskParams::default());
        assert_eq!(mask.chain("A").to_vec(), vec![1]);

        let beyond = Structure::parse(&pdb_with_ligand_at(6.01));
        let mask = ligand_proximity_mask(&beyond, &LigandMaskParams::default());
        assert!(mask.chain("A").is_empty());
    }

    #[test]
    fn test_ligand_without_coordinates_is_not_a_contact() {
        let mut zn = format_atom_line(RecordKind::Hetatm, 2, "ZN", "ZN", "A", 300, [0.0; 3], "ZN");
        zn.replace_range(30..54, &" ".repeat(24));
        let text = [format_atom_line(RecordKind::Atom, 1, "CA", "ALA", "A", 1, [1.0, 1.0, 1.0], "C"), zn].join("\n");

        let mask = ligand_proximity_mask(&Structure::parse(&text), &LigandMaskParams::default());
        assert_eq!(mask.ligand_atom_count, 0);
        assert_eq!(mask.skipped_atom_count, 1);
        assert!(mask.chain("A").is_empty());
    }

    #[test]
    fn test_water_never_masks() {
        let s = Structure::parse(&pdb_with_ligand_at(100.0));
        let mask = ligand_proximity_mask(&s, &LigandMaskParams::default());
        assert!(mask.chain("A").is_empty());
        assert_eq!(mask.ligand_atom_count, 1);
        assert_eq!(mask.ligand_resnames, vec!["LIG".to_string()]);
    }

    #[test]
    fn test_larger_radius_is_superset() {
        let s = Structure::parse(&pdb_with_ligand_at(10.0));
        let mut prev = PositionSet::<StructureSpace>::new();
        for d in [1.0, 6.0, 10.0, 15.0, 40.0] {
            let params = LigandMaskParams { distance: d, ..Default::default() };
            let cur = ligand_proximity_mask(&s, &params).chain("A");
            assert!(cur.is_superset(&prev), "radius {d} lost positions");
            prev = cur;
        }
        assert_eq!(prev.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_resname_filter_and_chain_restriction() {
        let s = Structure::parse(&pdb_with_ligand_at(3.0));
        let params = LigandMaskParams { ligand_resnames: Some(vec!["NAG".into()]), ..Default::default() };
        let mask = ligand_proximity_mask(&s, &params);
        assert_eq!(mask.ligand_atom_count, 0);
        assert!(mask.chain("A").is_empty());

        let params = LigandMaskParams { chains: Some(vec!["B".into()]), ..Default::default() };
        let mask = ligand_proximity_mask(&s, &params);
        assert!(!mask.chains.contains_key("A"));
        assert!(mask.chains.contains_key("B"));
    }
}
