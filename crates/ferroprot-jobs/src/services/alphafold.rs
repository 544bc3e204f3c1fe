//! AlphaFold2 structure prediction and its result archive.
//!
//! The endpoint returns either `archives: [{name, base64}]` or a single
//! `archive_base64`; each archive is a gzipped tarball holding
//! `ranking_debug.json` and `ranked_0.pdb`.

use std::io::Read;

use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::require_object;
use crate::error::{JobError, Result};
use crate::fingerprint::Fingerprint;

pub const SERVICE: &str = "alphafold2";
pub const DEFAULT_ARCHIVE_NAME: &str = "alphafold_results.tar.gz";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Af2Request {
    pub sequence: String,
    pub model_preset: String,
    pub db_preset: String,
    pub max_template_date: String,
    pub extra_flags: Option<String>,
}

impl Af2Request {
    /// Resolve `auto` against the number of `/`-separated chains in `sequence`.
    pub fn resolve_model_preset(preset: &str, sequence: &str) -> String {
        if preset.eq_ignore_ascii_case("auto") {
            if sequence.split('/').filter(|s| !s.is_empty()).count() > 1 { "multimer".into() } else { "monomer".into() }
        } else {
            preset.to_string()
        }
    }

    pub fn payload(&self) -> Value {
        let mut payload = json!({
            "sequence": self.sequence,
            "model_preset": self.model_preset,
            "db_preset": self.db_preset,
            "max_template_date": self.max_template_date,
        });
        if let Some(flags) = self.extra_flags.as_deref().filter(|f| !f.is_empty()) {
            payload["alphafold_extra_flags"] = json!(flags);
        }
        payload
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::of(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Af2Prediction {
    pub archive_name: String,
    pub best_model: Option<String>,
    pub best_plddt: f64,
    pub ranking_debug: Value,
    pub ranked_0_pdb: Option<String>,
}

/// Best pLDDT from a `ranking_debug.json` document: the model named first in
/// `order`, else the highest entry in `plddts`, else a scalar summary field.
pub fn best_plddt_from_ranking(ranking: &Map<String, Value>) -> Result<(Option<String>, f64)> {
    if let Some(plddts) = ranking.get("plddts").and_then(Value::as_object).filter(|m| !m.is_empty()) {
        let first = ranking.get("order").and_then(Value::as_array).and_then(|o| o.first()).and_then(Value::as_str);
        if let Some(model) = first {
            if let Some(score) = plddts.get(model).and_then(Value::as_f64) {
                return Ok((Some(model.to_string()), score));
            }
        }
        let best = plddts
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|s| (k, s)))
            .fold(None::<(&String, f64)>, |acc, (k, s)| match acc {
                Some((_, best)) if best >= s => acc,
                _ => Some((k, s)),
            });
        return match best {
            Some((model, score)) => Ok((Some(model.clone()), score)),
            None => Err(JobError::malformed(SERVICE, "ranking_debug.plddts contained no numeric scores")),
        };
    }
    for key in ["mean_plddt", "plddt", "avg_plddt"] {
        if let Some(score) = ranking.get(key).and_then(Value::as_f64) {
            return Ok((None, score));
        }
    }
    let keys: Vec<&str> = ranking.keys().map(String::as_str).collect();
    Err(JobError::malformed(SERVICE, format!("unable to extract pLDDT from ranking_debug keys {keys:?}")))
}

fn archive_entries(output: &Map<String, Value>) -> Vec<(String, String)> {
    let from_list: Vec<(String, String)> = output
        .get("archives")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name").and_then(Value::as_str).filter(|s| !s.is_empty())?;
                    let b64 = item.get("base64").and_then(Value::as_str).filter(|s| !s.is_empty())?;
                    Some((name.to_string(), b64.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    if !from_list.is_empty() {
        return from_list;
    }
    match output.get("archive_base64").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        Some(b64) => vec![(DEFAULT_ARCHIVE_NAME.to_string(), b64.to_string())],
        None => Vec::new(),
    }
}

fn read_member_texts(bytes: &[u8]) -> Result<(Option<String>, Option<String>)> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let (mut ranking, mut ranked0) = (None, None);
    let entries = archive.entries().map_err(|e| JobError::malformed(SERVICE, format!("archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| JobError::malformed(SERVICE, format!("archive entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| JobError::malformed(SERVICE, format!("archive path: {e}")))?;
        let slot = if name.ends_with("ranking_debug.json") && ranking.is_none() {
            &mut ranking
        } else if name.ends_with("ranked_0.pdb") && ranked0.is_none() {
            &mut ranked0
        } else {
            continue;
        };
        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|e| JobError::malformed(SERVICE, format!("reading {name}: {e}")))?;
        *slot = Some(String::from_utf8_lossy(&raw).into_owned());
    }
    Ok((ranking, ranked0))
}

pub fn parse_af2_output(output: &Value) -> Result<Af2Prediction> {
    let obj = require_object(SERVICE, output)?;
    let entries = archive_entries(obj);
    let (archive_name, b64) = match entries.as_slice() {
        [] => return Err(JobError::malformed(SERVICE, "output did not include 'archives' or 'archive_base64'")),
        [single] => single.clone(),
        _ => return Err(JobError::malformed(SERVICE, "multiple archives returned for a single sequence")),
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| JobError::malformed(SERVICE, format!("archive base64: {e}")))?;

    let (ranking_text, ranked_0_pdb) = read_member_texts(&bytes)?;
    let ranking_text = ranking_text.ok_or_else(|| JobError::malformed(SERVICE, "ranking_debug.json not found in archive"))?;
    let ranking_debug: Value = serde_json::from_str(&ranking_text)?;
    let ranking_obj = ranking_debug
        .as_object()
        .ok_or_else(|| JobError::malformed(SERVICE, "ranking_debug.json is not an object"))?;
    let (best_model, best_plddt) = best_plddt_from_ranking(ranking_obj)?;

    Ok(Af2Prediction { archive_name, best_model, best_plddt, ranking_debug, ranked_0_pdb })
}

/// Build a base64 tar.gz archive in the endpoint's format.
pub fn build_af2_archive(ranking_debug: &Value, ranked_0_pdb: &str) -> Result<String> {
    let malformed = |e: std::io::Error| JobError::malformed(SERVICE, format!("building archive: {e}"));
    let ranking = serde_json::to_vec_pretty(ranking_debug)?;
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in [("result/ranking_debug.json", ranking.as_slice()), ("result/ranked_0.pdb", ranked_0_pdb.as_bytes())] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).map_err(malformed)?;
    }
    let gz = builder.into_inner().map_err(malformed)?;
    let bytes = gz.finish().map_err(malformed)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
