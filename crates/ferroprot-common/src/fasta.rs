//! FASTA records as exchanged between stages and persisted as artifacts.

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, Result};

/// A named sequence. `id` is the first whitespace-delimited token of `header`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: String,
    pub header: String,
    pub sequence: String,
}

impl SequenceRecord {
    pub fn new(header: impl Into<String>, sequence: impl Into<String>) -> Self {
        let header = header.into().replace('\n', " ").trim().to_string();
        let id = header
            .split_whitespace()
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("seq")
            .to_string();
        Self { id, header, sequence: sequence.into() }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Parse FASTA text. Blank lines are ignored; whitespace inside sequences is removed.
pub fn parse_fasta(text: &str) -> Result<Vec<SequenceRecord>> {
    let mut records = Vec::new();
    let mut header: Option<String> = None;
    let mut seq = String::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(h) = line.strip_prefix('>') {
            if let Some(prev) = header.take() {
                records.push(finish_record(prev, &seq)?);
            }
            header = Some(h.trim().to_string());
            seq.clear();
            continue;
        }
        if header.is_none() {
            return Err(FormatError::Fasta("sequence line before header".to_string()));
        }
        seq.extend(line.chars().filter(|c| !c.is_whitespace()));
    }
    if let Some(prev) = header.take() {
        records.push(finish_record(prev, &seq)?);
    }

    if records.is_empty() {
        return Err(FormatError::Fasta("no FASTA records found".to_string()));
    }
    Ok(records)
}

fn finish_record(header: String, seq: &str) -> Result<SequenceRecord> {
    if seq.is_empty() {
        return Err(FormatError::Fasta(format!("empty sequence for header {header:?}")));
    }
    Ok(SequenceRecord::new(header, seq))
}

pub fn to_fasta(records: &[SequenceRecord]) -> String {
    let mut out = String::new();
    for rec in records {
        out.push('>');
        out.push_str(rec.header.trim());
        out.push('\n');
        out.push_str(rec.sequence.trim());
        out.push('\n');
    }
    out
}

/// Uppercase and strip whitespace; returns `None` for an empty result.
pub fn normalize_sequence(raw: &str) -> Option<String> {
    let seq: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if seq.is_empty() { None } else { Some(seq) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_record() {
        let recs = parse_fasta(">a first\nMKT\nAAA\n\n>b\nGG G\n").unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].id, "a");
        assert_eq!(recs[0].header, "a first");
        assert_eq!(recs[0].sequence, "MKTAAA");
        assert_eq!(recs[1].sequence, "GGG");
    }

    #[test]
    fn test_parse_rejects_headerless_sequence() {
        assert!(parse_fasta("MKT\n>a\nAA\n").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_record() {
        assert!(parse_fasta(">a\n>b\nMK\n").is_err());
        assert!(parse_fasta("\n\n").is_err());
    }

    #[test]
    fn test_to_fasta_parses_back() {
        let recs = vec![SequenceRecord::new("x desc", "MKV"), SequenceRecord::new("y", "GA")];
        let text = to_fasta(&recs);
        assert_eq!(text, ">x desc\nMKV\n>y\nGA\n");
        assert_eq!(parse_fasta(&text).unwrap(), recs);
    }

    #[test]
    fn test_normalize_sequence() {
        assert_eq!(normalize_sequence(" mk v\n").as_deref(), Some("MKV"));
        assert_eq!(normalize_sequence("  "), None);
    }
}
