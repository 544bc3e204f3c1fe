//! Minimal fixed-column PDB reader.
//!
//! Only `ATOM`/`HETATM` records are read. Residues are grouped in file order by
//! `(chain, resseq, icode)` and numbered by a 1-based ordinal within their chain;
//! that ordinal is the structure coordinate space used by the rest of the pipeline.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

const WATER_RESNAMES: [&str; 3] = ["HOH", "WAT", "H2O"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordKind {
    Atom,
    Hetatm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Atom {
    pub record: RecordKind,
    pub name: String,
    pub resname: String,
    pub chain_id: String,
    pub resseq: i32,
    pub icode: String,
    pub pos: [f64; 3],
    pub element: String,
}

impl Atom {
    pub fn is_heavy(&self) -> bool {
        self.element != "H" && self.element != "D"
    }

    pub fn is_water(&self) -> bool {
        WATER_RESNAMES.contains(&self.resname.to_ascii_uppercase().as_str())
    }

    pub fn dist2(&self, other: &Atom) -> f64 {
        let dx = self.pos[0] - other.pos[0];
        let dy = self.pos[1] - other.pos[1];
        let dz = self.pos[2] - other.pos[2];
        dx * dx + dy * dy + dz * dz
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    pub chain_id: String,
    pub ordinal: usize,
    pub resname: String,
    pub resseq: i32,
    pub icode: String,
    pub atoms: Vec<Atom>,
}

impl Residue {
    pub fn ca(&self) -> Option<[f64; 3]> {
        self.atoms.iter().find(|a| a.name == "CA").map(|a| a.pos)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub id: String,
    pub residues: Vec<Residue>,
}

impl Chain {
    /// One-letter sequence; unknown residue names become `X`.
    pub fn sequence(&self) -> String {
        self.residues.iter().map(|r| three_to_one(&r.resname)).collect()
    }

    /// CA coordinates keyed by residue ordinal.
    pub fn ca_by_ordinal(&self) -> BTreeMap<usize, [f64; 3]> {
        self.residues
            .iter()
            .filter_map(|r| r.ca().map(|ca| (r.ordinal, ca)))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Structure {
    pub atoms: Vec<Atom>,
    /// `ATOM`/`HETATM` records dropped because x, y or z did not parse.
    pub skipped_atoms: usize,
}

fn col(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end.min(line.len())).unwrap_or("")
}

fn record_kind(line: &str) -> Option<RecordKind> {
    match col(line, 0, 6).trim().to_ascii_uppercase().as_str() {
        "ATOM" => Some(RecordKind::Atom),
        "HETATM" => Some(RecordKind::Hetatm),
        _ => None,
    }
}

/// `None` when any coordinate is blank or not a number.
fn parse_atom(record: RecordKind, line: &str) -> Option<Atom> {
    let name = col(line, 12, 16).trim().to_string();
    let chain_id = match col(line, 21, 22).trim() {
        "" => "_".to_string(),
        c => c.to_string(),
    };
    let coord = |a, b| col(line, a, b).trim().parse::<f64>().ok().filter(|v| v.is_finite());
    let pos = [coord(30, 38)?, coord(38, 46)?, coord(46, 54)?];
    let element = match col(line, 76, 78).trim() {
        "" => name.chars().next().map(|c| c.to_string()).unwrap_or_default(),
        e => e.to_string(),
    }
    .to_ascii_uppercase();

    Some(Atom {
        record,
        resname: col(line, 17, 20).trim().to_string(),
        chain_id,
        resseq: col(line, 22, 26).trim().parse().unwrap_or(0),
        icode: col(line, 26, 27).trim().to_string(),
        pos,
        element,
        name,
    })
}

impl Structure {
    pub fn parse(text: &str) -> Self {
        let mut structure = Self::default();
        for line in text.lines() {
            let Some(record) = record_kind(line) else { continue };
            match parse_atom(record, line) {
                Some(atom) => structure.atoms.push(atom),
                None => structure.skipped_atoms += 1,
            }
        }
        if structure.skipped_atoms > 0 {
            warn!(skipped = structure.skipped_atoms, "Dropped atom records without coordinates");
        }
        structure
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Polymer chains built from `ATOM` records, in first-seen order.
    pub fn chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = Vec::new();
        let mut current: Option<Residue> = None;

        let flush = |res: Residue, chains: &mut Vec<Chain>| {
            match chains.iter_mut().find(|c| c.id == res.chain_id) {
                Some(chain) => chain.residues.push(res),
                None => chains.push(Chain { id: res.chain_id.clone(), residues: vec![res] }),
            }
        };

        for atom in self.atoms.iter().filter(|a| a.record == RecordKind::Atom) {
            let same = current.as_ref().is_some_and(|r| {
                r.chain_id == atom.chain_id && r.resseq == atom.resseq && r.icode == atom.icode
            });
            if same {
                if let Some(r) = current.as_mut() {
                    r.atoms.push(atom.clone());
                }
                continue;
            }
            if let Some(done) = current.take() {
                flush(done, &mut chains);
            }
            current = Some(Residue {
                chain_id: atom.chain_id.clone(),
                ordinal: 0,
                resname: atom.resname.clone(),
                resseq: atom.resseq,
                icode: atom.icode.clone(),
                atoms: vec![atom.clone()],
            });
        }
        if let Some(done) = current.take() {
            flush(done, &mut chains);
        }

        for chain in &mut chains {
            for (i, res) in chain.residues.iter_mut().enumerate() {
                res.ordinal = i + 1;
            }
        }
        chains
    }

    pub fn chain(&self, id: &str) -> Option<Chain> {
        self.chains().into_iter().find(|c| c.id == id)
    }

    /// Non-water heavy `HETATM` atoms, optionally restricted to `resnames`.
    pub fn ligand_atoms(&self, resnames: Option<&[String]>) -> Vec<&Atom> {
        let allow: Option<Vec<String>> = resnames.map(|names| {
            names
                .iter()
                .map(|n| n.trim().to_ascii_uppercase())
                .filter(|n| !n.is_empty())
                .collect()
        });
        let allow = allow.filter(|a| !a.is_empty());
        self.atoms
            .iter()
            .filter(|a| a.record == RecordKind::Hetatm && !a.is_water() && a.is_heavy())
            .filter(|a| match &allow {
                Some(names) => names.contains(&a.resname.to_ascii_uppercase()),
                None => true,
            })
            .collect()
    }
}

pub fn three_to_one(resname: &str) -> char {
    match resname.to_ascii_uppercase().as_str() {
        "ALA" => 'A', "ARG" => 'R', "ASN" => 'N', "ASP" => 'D', "CYS" => 'C',
        "GLN" => 'Q', "GLU" => 'E', "GLY" => 'G', "HIS" => 'H', "ILE" => 'I',
        "LEU" => 'L', "LYS" => 'K', "MET" => 'M', "PHE" => 'F', "PRO" => 'P',
        "SER" => 'S', "THR" => 'T', "TRP" => 'W', "TYR" => 'Y', "VAL" => 'V',
        "MSE" => 'M', "SEC" => 'U', "PYL" => 'O',
        _ => 'X',
    }
}

pub fn one_to_three(code: char) -> &'static str {
    match code.to_ascii_uppercase() {
        'A' => "ALA", 'R' => "ARG", 'N' => "ASN", 'D' => "ASP", 'C' => "CYS",
        'Q' => "GLN", 'E' => "GLU", 'G' => "GLY", 'H' => "HIS", 'I' => "ILE",
        'L' => "LEU", 'K' => "LYS", 'M' => "MET", 'F' => "PHE", 'P' => "PRO",
        'S' => "SER", 'T' => "THR", 'W' => "TRP", 'Y' => "TYR", 'V' => "VAL",
        _ => "UNK",
    }
}

/// Format one fixed-column PDB atom record.
#[allow(clippy::too_many_arguments)]
pub fn format_atom_line(
    record: RecordKind,
    serial: usize,
    name: &str,
    resname: &str,
    chain: &str,
    resseq: i32,
    pos: [f64; 3],
    element: &str,
) -> String {
    let rec = match record {
        RecordKind::Atom => "ATOM  ",
        RecordKind::Hetatm => "HETATM",
    };
    format!(
        "{rec}{serial:>5} {name:<4} {resname:>3} {chain:1}{resseq:>4}    {x:>8.3}{y:>8.3}{z:>8.3}{occ:>6.2}{b:>6.2}          {element:>2}",
        x = pos[0],
        y = pos[1],
        z = pos[2],
        occ = 1.0,
        b = 0.0,
    )
}
