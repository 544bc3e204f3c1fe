//! Structure and alignment fixtures.

use std::io::Write;

use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use ferroprot_bio::structure::{format_atom_line, one_to_three, RecordKind};
use ferroprot_store::ArtifactStore;

/// Spacing between consecutive CA atoms of a straight trace.
pub const CA_SPACING: f64 = 3.8;

/// Builds small PDB texts atom by atom.
#[derive(Debug, Default)]
pub struct PdbBuilder {
    lines: Vec<String>,
    serial: usize,
}

impl PdbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn atom(mut self, record: RecordKind, name: &str, resname: &str, chain: &str, resseq: i32, pos: [f64; 3], element: &str) -> Self {
        self.serial += 1;
        self.lines.push(format_atom_line(record, self.serial, name, resname, chain, resseq, pos, element));
        self
    }

    /// One CA per residue along +x from `origin`, residues numbered from `first_resseq`.
    pub fn ca_trace(mut self, chain: &str, sequence: &str, origin: [f64; 3], first_resseq: i32) -> Self {
        for (i, code) in sequence.chars().enumerate() {
            let pos = [origin[0] + CA_SPACING * i as f64, origin[1], origin[2]];
            self = self.atom(RecordKind::Atom, "CA", one_to_three(code), chain, first_resseq + i as i32, pos, "C");
        }
        self
    }

    pub fn ligand(self, resname: &str, chain: &str, resseq: i32, pos: [f64; 3], element: &str) -> Self {
        self.atom(RecordKind::Hetatm, element, resname, chain, resseq, pos, element)
    }

    pub fn water(self, pos: [f64; 3]) -> Self {
        self.atom(RecordKind::Hetatm, "O", "HOH", "W", 1, pos, "O")
    }

    pub fn build(self) -> String {
        let mut out = self.lines.join("\n");
        out.push_str("\nEND\n");
        out
    }
}

/// A single-chain target whose first two residues sit within 6 Å of a zinc ion.
pub fn zinc_site_pdb(sequence: &str) -> String {
    PdbBuilder::new()
        .ca_trace("A", sequence, [0.0, 0.0, 0.0], 1)
        .ligand("ZN", "A", 900, [0.0, 4.0, 0.0], "ZN")
        .water([1.0, 1.0, 1.0])
        .build()
}

/// A3M text with `query` first, then `hits` named `hit1..`.
pub fn a3m(query: &str, hits: &[&str]) -> String {
    let mut out = format!(">query\n{query}\n");
    for (i, h) in hits.iter().enumerate() {
        out.push_str(&format!(">hit{}\n{h}\n", i + 1));
    }
    out
}

/// Gzip then base64, the encoding the search service uses for alignments.
pub fn gz_b64(text: &str) -> String {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    let _ = enc.write_all(text.as_bytes());
    let bytes = enc.finish().unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// An artifact store rooted in a fresh temporary directory.
pub fn temp_store() -> (TempDir, ArtifactStore) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = ArtifactStore::new(dir.path());
    (dir, store)
}
