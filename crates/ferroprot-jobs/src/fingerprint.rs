//! Parameter fingerprints that decide whether an existing remote job can be reused.
//!
//! Each stage fingerprints a dedicated struct holding only the parameters that
//! change the remote computation. The struct is serialized to JSON with object
//! keys sorted recursively, then hashed with SHA-256.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

impl Fingerprint {
    pub fn of<T: Serialize + ?Sized>(params: &T) -> Result<Self, serde_json::Error> {
        let canonical = canonicalize(serde_json::to_value(params)?);
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(Self(format!("{:x}", Sha256::digest(&bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 hex digest of raw text, used to stand in for large inputs
/// (structures, sequences) inside fingerprint structs.
pub fn text_digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
