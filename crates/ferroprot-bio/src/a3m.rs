//! A3M parsing. The first record is the query; lowercase characters are
//! insertions relative to the query and are stripped before any column analysis.

use std::io::Read;

use base64::Engine;
use flate2::read::GzDecoder;
use serde::Serialize;

use ferroprot_common::fasta::{parse_fasta, to_fasta, SequenceRecord};

use crate::error::{BioError, Result};

/// One aligned row after insertion stripping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlignmentRecord {
    pub header: String,
    pub aligned: String,
    pub matches_query_length: bool,
}

#[derive(Debug, Clone)]
pub struct Msa {
    pub query: AlignmentRecord,
    pub hits: Vec<AlignmentRecord>,
}

pub fn strip_insertions(row: &str) -> String {
    row.chars().filter(|c| !c.is_ascii_lowercase()).collect()
}

impl Msa {
    pub fn parse(text: &str) -> Result<Self> {
        let mut records = parse_fasta(text)?.into_iter();
        let first = records.next().ok_or(BioError::EmptyQuery)?;
        let query_aligned = strip_insertions(&first.sequence);
        if query_aligned.is_empty() {
            return Err(BioError::EmptyQuery);
        }
        let len = query_aligned.len();

        let hits = records
            .map(|rec| {
                let aligned = strip_insertions(&rec.sequence);
                let matches_query_length = aligned.len() == len;
                AlignmentRecord { header: rec.header, aligned, matches_query_length }
            })
            .collect();

        Ok(Self {
            query: AlignmentRecord { header: first.header, aligned: query_aligned, matches_query_length: true },
            hits,
        })
    }

    pub fn query_len(&self) -> usize {
        self.query.aligned.len()
    }

    /// Hits that can contribute to per-column statistics.
    pub fn usable_hits(&self) -> impl Iterator<Item = &AlignmentRecord> {
        self.hits.iter().filter(|h| h.matches_query_length)
    }

    pub fn excluded_hits(&self) -> usize {
        self.hits.iter().filter(|h| !h.matches_query_length).count()
    }

    /// Serialize back to (insertion-free) A3M text.
    pub fn to_a3m(&self) -> String {
        let records: Vec<SequenceRecord> = std::iter::once(&self.query)
            .chain(self.hits.iter())
            .map(|r| SequenceRecord::new(r.header.clone(), r.aligned.clone()))
            .collect();
        to_fasta(&records)
    }
}

/// Decode the `a3m_gz_b64` field returned by the search service.
pub fn decode_a3m_gz_b64(encoded: &str) -> Result<String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| BioError::Decode(e.to_string()))?;
    let mut out = Vec::new();
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut out)
        .map_err(|e| BioError::Decode(e.to_string()))?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_strip_insertions() {
        assert_eq!(strip_insertions("AcDe-F"), "AD-F");
    }

    #[test]
    fn test_parse_marks_length_mismatch() {
        let msa = Msa::parse(">q\nMKV\n>h1\nMaKV\n>h2\nMK\n>h3\nM-V\n").unwrap();
        assert_eq!(msa.query_len(), 3);
        assert_eq!(msa.hits.len(), 3);
        assert_eq!(msa.usable_hits().count(), 2);
        assert_eq!(msa.excluded_hits(), 1);
        assert_eq!(msa.hits[0].aligned, "MKV");
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(matches!(Msa::parse(">q\nabc\n>h\nMKV\n"), Err(BioError::EmptyQuery)));
    }

    #[test]
    fn test_decode_gz_b64() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b">q\nMKV\n").unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(enc.finish().unwrap());
        assert_eq!(decode_a3m_gz_b64(&b64).unwrap(), ">q\nMKV\n");
        assert!(decode_a3m_gz_b64("!!!").is_err());
    }
}
