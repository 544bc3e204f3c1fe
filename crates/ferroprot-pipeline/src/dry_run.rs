//! Deterministic stand-ins for the remote services, used by `dry_run`.
//!
//! Jobs complete on the first poll. Outputs follow the real contracts closely
//! enough that every parser and artifact writer runs unchanged:
//! - search: the query plus two hits, as a gzipped base64 A3M (or a TSV)
//! - design: native plus two samples; the second mutates the last free position
//! - prediction: a real tar.gz archive with a ranking document and a CA model
//! - scoring: 0.6 / 0.4 alternating in request order

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use ferroprot_bio::structure::{format_atom_line, one_to_three, RecordKind, Structure};
use ferroprot_common::fasta::parse_fasta;
use ferroprot_common::SequenceRecord;
use ferroprot_jobs::services::alphafold::{build_af2_archive, DEFAULT_ARCHIVE_NAME};
use ferroprot_jobs::services::{alphafold, mmseqs, proteinmpnn};
use ferroprot_jobs::{RemoteJobService, RemotePoll, SequenceScorer, ServiceError};

const CA_SPACING: f64 = 3.8;
const CHAIN_IDS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Default)]
pub struct SimulatedJobService {
    next_id: AtomicU64,
    outputs: Mutex<HashMap<String, Value>>,
}

impl SimulatedJobService {
    pub fn new() -> Self {
        Self::default()
    }
}

fn field<'a>(payload: &'a Value, key: &str) -> Result<&'a Value, ServiceError> {
    payload.get(key).ok_or_else(|| ServiceError::fatal(format!("payload is missing {key}")))
}

fn gz_b64(text: &str) -> Result<String, ServiceError> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes()).map_err(|e| ServiceError::fatal(e.to_string()))?;
    let bytes = enc.finish().map_err(|e| ServiceError::fatal(e.to_string()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Replace the residue at 0-based `idx` with `A`, or `G` when it already is `A`.
fn substitute(seq: &mut [char], idx: usize) {
    if let Some(c) = seq.get_mut(idx) {
        *c = if c.eq_ignore_ascii_case(&'A') { 'G' } else { 'A' };
    }
}

fn search_output(payload: &Value) -> Result<Value, ServiceError> {
    let fasta = field(payload, "query_fasta")?.as_str().unwrap_or_default();
    let queries = parse_fasta(fasta).map_err(|e| ServiceError::fatal(e.to_string()))?;

    if payload.get("return_a3m").and_then(Value::as_bool).unwrap_or(false) {
        let first = queries.first().ok_or_else(|| ServiceError::fatal("query_fasta has no records"))?;
        let query = &first.sequence;
        let mut variant: Vec<char> = query.chars().collect();
        let last = variant.len().saturating_sub(1);
        substitute(&mut variant, last);
        let variant: String = variant.into_iter().collect();
        let a3m = format!(">{}\n{query}\n>sim_hit1\n{query}\n>sim_hit2\n{variant}\n", first.id);
        return Ok(json!({ "tsv": "", "a3m_gz_b64": gz_b64(&a3m)? }));
    }

    let tsv: String = queries
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}\tUniRef90_SIM{:04}\t0.420\t{}\t1e-10\t120\n", q.id, i + 1, q.len()))
        .collect();
    Ok(json!({ "tsv": tsv }))
}

fn design_output(payload: &Value) -> Result<Value, ServiceError> {
    let encoded = field(payload, "pdb_base64")?.as_str().unwrap_or_default();
    let pdb = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ServiceError::fatal(format!("pdb_base64: {e}")))?;
    let structure = Structure::parse(&String::from_utf8_lossy(&pdb));
    let chains: Vec<String> = field(payload, "pdb_path_chains")?
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let fixed: BTreeMap<String, Vec<usize>> =
        serde_json::from_value(payload.get("fixed_positions").cloned().unwrap_or(Value::Null)).unwrap_or_default();

    let mut native_parts = Vec::new();
    let mut variant_parts = Vec::new();
    for id in &chains {
        let seq = structure
            .chain(id)
            .map(|c| c.sequence())
            .ok_or_else(|| ServiceError::fatal(format!("chain {id} not in structure")))?;
        let mut variant: Vec<char> = seq.chars().collect();
        let held = fixed.get(id).cloned().unwrap_or_default();
        if let Some(free) = (1..=variant.len()).rev().find(|p| !held.contains(p)) {
            substitute(&mut variant, free - 1);
        }
        native_parts.push(seq);
        variant_parts.push(variant.into_iter().collect::<String>());
    }
    let native = native_parts.join("/");
    let temp = payload.get("sampling_temp").and_then(Value::as_f64).unwrap_or(0.1);

    Ok(json!({
        "native": { "name": "native", "header": "native, score=1.0000", "sequence": native },
        "samples": [
            { "name": "s1", "header": format!("T={temp}, sample=1, score=0.9000"), "sequence": native },
            { "name": "s2", "header": format!("T={temp}, sample=2, score=0.9500"), "sequence": variant_parts.join("/") },
        ],
    }))
}

/// A straight CA trace per `/`-separated segment, chains laid out 20 Å apart.
fn ca_model(sequence: &str) -> String {
    let mut lines = Vec::new();
    let mut serial = 0;
    for (ci, (segment, chain)) in sequence.split('/').zip(CHAIN_IDS.chars()).enumerate() {
        for (i, code) in segment.chars().enumerate() {
            serial += 1;
            let pos = [CA_SPACING * i as f64, 20.0 * ci as f64, 0.0];
            let resseq = i as i32 + 1;
            lines.push(format_atom_line(RecordKind::Atom, serial, "CA", one_to_three(code), &chain.to_string(), resseq, pos, "C"));
        }
    }
    lines.push("END".to_string());
    lines.join("\n") + "\n"
}

fn prediction_output(payload: &Value) -> Result<Value, ServiceError> {
    let sequence = field(payload, "sequence")?.as_str().unwrap_or_default();
    let parity: u32 = sequence.bytes().map(u32::from).sum::<u32>() % 2;
    let plddt = if parity == 0 { 90.0 } else { 80.0 };
    let ranking = json!({ "plddts": { "model_1_pred_0": plddt }, "order": ["model_1_pred_0"] });
    let archive = build_af2_archive(&ranking, &ca_model(sequence)).map_err(|e| ServiceError::fatal(e.to_string()))?;
    Ok(json!({ "archives": [{ "name": DEFAULT_ARCHIVE_NAME, "base64": archive }] }))
}

#[async_trait]
impl RemoteJobService for SimulatedJobService {
    async fn submit(&self, endpoint: &str, payload: &Value) -> Result<String, ServiceError> {
        let output = match endpoint {
            mmseqs::SERVICE => search_output(payload)?,
            proteinmpnn::SERVICE => design_output(payload)?,
            alphafold::SERVICE => prediction_output(payload)?,
            other => return Err(ServiceError::fatal(format!("no simulator for endpoint {other}"))),
        };
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("sim-{endpoint}-{n}");
        self.outputs
            .lock()
            .map_err(|_| ServiceError::fatal("simulator state poisoned"))?
            .insert(job_id.clone(), output);
        Ok(job_id)
    }

    async fn poll(&self, _endpoint: &str, job_id: &str) -> Result<RemotePoll, ServiceError> {
        let outputs = self.outputs.lock().map_err(|_| ServiceError::fatal("simulator state poisoned"))?;
        match outputs.get(job_id) {
            Some(output) => Ok(RemotePoll::completed(output.clone())),
            None => Err(ServiceError::Fatal { status: Some(404), message: format!("unknown job {job_id}") }),
        }
    }
}

/// 0.6 for even request positions, 0.4 for odd ones.
pub struct SimulatedScorer;

#[async_trait]
impl SequenceScorer for SimulatedScorer {
    async fn score(&self, sequences: &[SequenceRecord]) -> Result<BTreeMap<String, f64>, ServiceError> {
        Ok(sequences
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), if i % 2 == 0 { 0.6 } else { 0.4 }))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferroprot_bio::a3m::Msa;
    use ferroprot_jobs::services::alphafold::parse_af2_output;
    use ferroprot_jobs::services::mmseqs::{parse_mmseqs_output, MmseqsSearch};
    use ferroprot_jobs::services::proteinmpnn::{parse_design_output, DesignRequest};
    use ferroprot_test_utils::fixtures::zinc_site_pdb;

    #[tokio::test]
    async fn test_search_returns_parseable_alignment() {
        let svc = SimulatedJobService::new();
        let search = MmseqsSearch {
            query_fasta: ">q\nMKVLA\n".into(),
            target_db: "uniref90".into(),
            threads: 4,
            use_gpu: false,
            max_seqs: Some(100),
            return_a3m: true,
        };
        let id = svc.submit(mmseqs::SERVICE, &search.payload()).await.unwrap();
        let poll = svc.poll(mmseqs::SERVICE, &id).await.unwrap();
        let out = parse_mmseqs_output(&poll.output.unwrap(), true).unwrap();
        let msa = Msa::parse(&out.a3m.unwrap()).unwrap();
        assert_eq!(msa.hits.len(), 2);
        assert_eq!(msa.hits[1].aligned, "MKVLG");
    }

    #[tokio::test]
    async fn test_search_without_query_records_is_fatal() {
        let svc = SimulatedJobService::new();
        let payload = json!({ "query_fasta": "", "return_a3m": true });
        let err = svc.submit(mmseqs::SERVICE, &payload).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("no records"));
    }

    #[tokio::test]
    async fn test_design_keeps_fixed_positions() {
        let svc = SimulatedJobService::new();
        let req = DesignRequest {
            pdb_text: zinc_site_pdb("MKVLA"),
            design_chains: vec!["A".into()],
            fixed_positions: BTreeMap::from([("A".to_string(), vec![5])]),
            num_seq_per_target: 2,
            batch_size: 1,
            sampling_temp: 0.1,
            seed: 0,
        };
        let id = svc.submit(proteinmpnn::SERVICE, &req.payload()).await.unwrap();
        let out = parse_design_output(&svc.poll(proteinmpnn::SERVICE, &id).await.unwrap().output.unwrap()).unwrap();
        assert_eq!(out.native.sequence, "MKVLA");
        assert_eq!(out.samples[0].sequence, "MKVLA");
        assert_eq!(out.samples[1].id, "s2");
        assert_eq!(out.samples[1].sequence, "MKVAA");
    }

    #[tokio::test]
    async fn test_prediction_archive_parses() {
        let svc = SimulatedJobService::new();
        let id = svc.submit(alphafold::SERVICE, &json!({"sequence": "MKVLA"})).await.unwrap();
        let pred = parse_af2_output(&svc.poll(alphafold::SERVICE, &id).await.unwrap().output.unwrap()).unwrap();
        assert!(pred.best_plddt == 90.0 || pred.best_plddt == 80.0);
        let model = Structure::parse(&pred.ranked_0_pdb.unwrap());
        assert_eq!(model.chains()[0].sequence(), "MKVLA");
    }

    #[tokio::test]
    async fn test_unknown_job_is_fatal() {
        let svc = SimulatedJobService::new();
        let err = svc.poll(mmseqs::SERVICE, "sim-mmseqs-9").await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(svc.submit("bogus", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_scorer_alternates() {
        let seqs = vec![SequenceRecord::new("a", "MK"), SequenceRecord::new("b", "MR"), SequenceRecord::new("c", "MV")];
        let scores = SimulatedScorer.score(&seqs).await.unwrap();
        assert_eq!(scores["a"], 0.6);
        assert_eq!(scores["b"], 0.4);
        assert_eq!(scores["c"], 0.6);
    }
}
