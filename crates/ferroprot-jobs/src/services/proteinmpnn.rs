//! ProteinMPNN inverse folding.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ferroprot_common::SequenceRecord;

use super::{require_object, short};
use crate::error::{JobError, Result};
use crate::fingerprint::{text_digest, Fingerprint};

pub const SERVICE: &str = "proteinmpnn";
pub const MODEL_NAME: &str = "v_48_020";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignRequest {
    #[serde(skip)]
    pub pdb_text: String,
    pub design_chains: Vec<String>,
    /// 1-based residue ordinals per chain that must keep the native residue.
    pub fixed_positions: BTreeMap<String, Vec<usize>>,
    pub num_seq_per_target: u32,
    pub batch_size: u32,
    pub sampling_temp: f64,
    pub seed: u64,
}

#[derive(Serialize)]
struct DesignFingerprint<'a> {
    pdb_sha256: String,
    #[serde(flatten)]
    request: &'a DesignRequest,
    model_name: &'static str,
}

impl DesignRequest {
    pub fn payload(&self) -> Value {
        json!({
            "pdb_base64": base64::engine::general_purpose::STANDARD.encode(self.pdb_text.as_bytes()),
            "pdb_name": "input",
            "pdb_path_chains": self.design_chains,
            "fixed_positions": self.fixed_positions,
            "use_soluble_model": true,
            "model_name": MODEL_NAME,
            "num_seq_per_target": self.num_seq_per_target,
            "batch_size": self.batch_size,
            "sampling_temp": self.sampling_temp,
            "seed": self.seed,
            "backbone_noise": 0.0,
            "cleanup": true,
        })
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::of(&DesignFingerprint { pdb_sha256: text_digest(&self.pdb_text), request: self, model_name: MODEL_NAME })?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignOutput {
    pub native: SequenceRecord,
    pub samples: Vec<SequenceRecord>,
}

fn text_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub fn parse_design_output(output: &Value) -> Result<DesignOutput> {
    let obj = require_object(SERVICE, output)?;
    let native = obj.get("native").cloned().unwrap_or(Value::Null);
    let samples = match obj.get("samples") {
        Some(Value::Array(items)) => items.as_slice(),
        None | Some(Value::Null) => &[],
        Some(other) => return Err(JobError::malformed(SERVICE, format!("samples is not a list: {}", short(other)))),
    };

    let mut native_rec = SequenceRecord::new(text_field(&native, "header").unwrap_or("native"), text_field(&native, "sequence").unwrap_or_default());
    native_rec.id = text_field(&native, "name").unwrap_or("native").to_string();

    let mut sample_recs = Vec::with_capacity(samples.len());
    for (i, s) in samples.iter().enumerate() {
        if !s.is_object() {
            continue;
        }
        let fallback_header = format!("sample_{}", i + 1);
        let mut rec = SequenceRecord::new(text_field(s, "header").unwrap_or(&fallback_header), text_field(s, "sequence").unwrap_or_default());
        rec.id = text_field(s, "name")
            .map(str::to_string)
            .or_else(|| s.get("sample").filter(|v| !v.is_null()).map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
            .unwrap_or_else(|| format!("s{}", i + 1));
        sample_recs.push(rec);
    }
    Ok(DesignOutput { native: native_rec, samples: sample_recs })
}
