//! Payload builders and output parsers for each remote service.
//!
//! Each request struct carries exactly the parameters that change the remote
//! computation; its [`Fingerprint`](crate::Fingerprint) decides job reuse.

pub mod alphafold;
pub mod mmseqs;
pub mod proteinmpnn;
pub mod soluprot;

use serde_json::Value;

use crate::error::{JobError, Result};

pub(crate) fn require_object<'a>(service: &str, output: &'a Value) -> Result<&'a serde_json::Map<String, Value>> {
    output
        .as_object()
        .ok_or_else(|| JobError::malformed(service, format!("expected an object, got {}", short(output))))
}

pub(crate) fn short(v: &Value) -> String {
    let s = v.to_string();
    if s.len() > 200 {
        let cut = (0..=200).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &s[..cut])
    } else {
        s
    }
}
