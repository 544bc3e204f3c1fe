//! MMseqs2 homology search.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ferroprot_bio::a3m::decode_a3m_gz_b64;

use super::require_object;
use crate::error::{JobError, Result};
use crate::fingerprint::Fingerprint;

pub const SERVICE: &str = "mmseqs";

/// Upper bound on the inline A3M the search endpoint may return.
pub const A3M_MAX_RETURN_BYTES: u64 = 5 * 1024 * 1024;
pub const A3M_FORMAT_MODE: u32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmseqsSearch {
    pub query_fasta: String,
    pub target_db: String,
    pub threads: u32,
    pub use_gpu: bool,
    pub max_seqs: Option<u32>,
    pub return_a3m: bool,
}

impl MmseqsSearch {
    pub fn payload(&self) -> Value {
        let mut payload = json!({
            "task": "search",
            "query_fasta": self.query_fasta,
            "target_db": self.target_db,
            "threads": self.threads,
            "use_gpu": self.use_gpu,
            "include_taxonomy": false,
        });
        if self.return_a3m {
            payload["return_a3m"] = json!(true);
            payload["a3m_max_return_bytes"] = json!(A3M_MAX_RETURN_BYTES);
            payload["a3m_format_mode"] = json!(A3M_FORMAT_MODE);
        }
        if let Some(n) = self.max_seqs {
            payload["max_seqs"] = json!(n);
        }
        payload
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::of(self)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MmseqsOutput {
    pub tsv: String,
    /// Decoded alignment; present only when requested.
    pub a3m: Option<String>,
}

pub fn parse_mmseqs_output(output: &Value, expect_a3m: bool) -> Result<MmseqsOutput> {
    let obj = require_object(SERVICE, output)?;
    if let Some(err) = obj.get("error").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        return Err(JobError::malformed(SERVICE, format!("search error: {err}")));
    }
    let tsv = obj.get("tsv").and_then(Value::as_str).unwrap_or_default().to_string();
    let a3m = match obj.get("a3m_gz_b64").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        Some(encoded) => Some(decode_a3m_gz_b64(encoded).map_err(|e| JobError::malformed(SERVICE, e.to_string()))?),
        None if expect_a3m => return Err(JobError::malformed(SERVICE, "search did not return an A3M (a3m_gz_b64 is empty)")),
        None => None,
    };
    Ok(MmseqsOutput { tsv, a3m })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn search() -> MmseqsSearch {
        MmseqsSearch {
            query_fasta: ">q\nMKV\n".into(),
            target_db: "uniref90".into(),
            threads: 4,
            use_gpu: true,
            max_seqs: Some(3000),
            return_a3m: true,
        }
    }

    #[test]
    fn test_payload_shape() {
        let p = search().payload();
        assert_eq!(p["task"], "search");
        assert_eq!(p["return_a3m"], true);
        assert_eq!(p["a3m_format_mode"], 6);
        assert_eq!(p["max_seqs"], 3000);

        let mut s = search();
        s.return_a3m = false;
        s.max_seqs = None;
        let p = s.payload();
        assert!(p.get("return_a3m").is_none());
        assert!(p.get("max_seqs").is_none());
    }

    #[test]
    fn test_fingerprint_tracks_target_db() {
        let a = search().fingerprint().unwrap();
        let mut s = search();
        s.target_db = "uniref50".into();
        assert_ne!(a, s.fingerprint().unwrap());
    }

    #[test]
    fn test_parse_output_decodes_a3m() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b">q\nMKV\n").unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(enc.finish().unwrap());
        let out = parse_mmseqs_output(&json!({"tsv": "q\tt\n", "a3m_gz_b64": b64}), true).unwrap();
        assert_eq!(out.a3m.as_deref(), Some(">q\nMKV\n"));
        assert_eq!(out.tsv, "q\tt\n");
    }

    #[test]
    fn test_missing_a3m_is_malformed_when_expected() {
        assert!(parse_mmseqs_output(&json!({"tsv": ""}), true).is_err());
        assert!(parse_mmseqs_output(&json!({"tsv": ""}), false).unwrap().a3m.is_none());
        assert!(parse_mmseqs_output(&json!({"error": "boom"}), false).is_err());
    }
}
