//! Run requests: the flat parameter set a caller supplies for one invocation.
//!
//! Every field is named and defaulted; unknown fields are rejected when the
//! request is deserialized. Thresholds that have a configured default are
//! `Option`s here and filled from [`DefaultsConfig`] before the run starts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use ferroprot_bio::conservation::ConservationMode;
use ferroprot_bio::mapping::IdentityPolicy;
use ferroprot_common::TierKey;
use ferroprot_config::DefaultsConfig;

use crate::error::{PipelineError, Result};

// ── Stages ──────────────────────────────────────────────────────────────────

/// The fixed stage order. Comparisons follow that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Msa,
    Conservation,
    LigandMask,
    Design,
    Soluprot,
    Af2,
    Novelty,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Msa,
        Stage::Conservation,
        Stage::LigandMask,
        Stage::Design,
        Stage::Soluprot,
        Stage::Af2,
        Stage::Novelty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Msa => "msa",
            Stage::Conservation => "conservation",
            Stage::LigandMask => "ligand_mask",
            Stage::Design => "design",
            Stage::Soluprot => "soluprot",
            Stage::Af2 => "af2",
            Stage::Novelty => "novelty",
        }
    }

    /// Stages up to and including `stop_after`.
    pub fn through(stop_after: Stage) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| *s <= stop_after)
    }

    /// Stages that need a target structure.
    pub fn requires_structure(&self) -> bool {
        *self >= Stage::Design
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s.trim())
            .ok_or_else(|| PipelineError::validation(format!("unknown stage {s:?}")))
    }
}

// ── Request ─────────────────────────────────────────────────────────────────

pub const DEFAULT_TARGET_DB: &str = "uniref90";
pub const NOVELTY_MAX_SEQS_CAP: u32 = 300;

fn default_tiers() -> Vec<f64>                 { vec![0.3, 0.5, 0.7] }
fn default_ligand_distance() -> f64            { ferroprot_bio::ligand_mask::DEFAULT_LIGAND_DISTANCE }
fn default_num_seq_per_tier() -> u32           { 16 }
fn default_batch_size() -> u32                 { 1 }
fn default_sampling_temp() -> f64              { 0.1 }
fn default_af2_model_preset() -> String        { "auto".to_string() }
fn default_af2_db_preset() -> String           { "full_dbs".to_string() }
fn default_af2_max_template_date() -> String   { "2020-05-14".to_string() }
fn default_target_db() -> String               { DEFAULT_TARGET_DB.to_string() }
fn default_mmseqs_max_seqs() -> u32            { 3000 }
fn default_mmseqs_threads() -> u32             { 4 }
fn default_query_pdb_min_identity() -> f64     { 0.9 }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageRequest {
    /// FASTA text; the first record is the query.
    #[serde(default)]
    pub target_fasta: Option<String>,
    /// PDB text of the target structure.
    #[serde(default)]
    pub target_pdb: Option<String>,
    /// Chains to design; all polymer chains of the structure when unset.
    #[serde(default)]
    pub design_chains: Option<Vec<String>>,
    /// Extra fixed positions in query numbering, per chain or `"*"` for all
    /// chains. A bare list means `"*"`.
    #[serde(default, deserialize_with = "de_extra_positions")]
    pub fixed_positions_extra: Option<BTreeMap<String, Vec<usize>>>,

    #[serde(default = "default_tiers")]
    pub conservation_tiers: Vec<f64>,
    #[serde(default)]
    pub conservation_mode: ConservationMode,
    #[serde(default)]
    pub msa_min_coverage: f64,
    #[serde(default)]
    pub msa_min_identity: f64,

    #[serde(default = "default_ligand_distance")]
    pub ligand_mask_distance: f64,
    #[serde(default)]
    pub ligand_resnames: Option<Vec<String>>,

    #[serde(default = "default_query_pdb_min_identity")]
    pub query_pdb_min_identity: f64,
    #[serde(default)]
    pub query_pdb_policy: IdentityPolicy,

    #[serde(default = "default_num_seq_per_tier")]
    pub num_seq_per_tier: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_sampling_temp")]
    pub sampling_temp: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub allow_fixed_position_violations: bool,

    #[serde(default)]
    pub soluprot_cutoff: Option<f64>,

    #[serde(default = "default_af2_model_preset")]
    pub af2_model_preset: String,
    #[serde(default = "default_af2_db_preset")]
    pub af2_db_preset: String,
    #[serde(default = "default_af2_max_template_date")]
    pub af2_max_template_date: String,
    #[serde(default)]
    pub af2_extra_flags: Option<String>,
    #[serde(default)]
    pub af2_plddt_cutoff: Option<f64>,
    #[serde(default)]
    pub af2_top_k: Option<usize>,
    /// Maximum CA RMSD to the target; no deviation filter when unset.
    #[serde(default)]
    pub af2_rmsd_cutoff: Option<f64>,
    /// Restrict structure prediction to these candidate ids.
    #[serde(default)]
    pub af2_sequence_ids: Option<Vec<String>>,

    #[serde(default = "default_target_db")]
    pub mmseqs_target_db: String,
    #[serde(default = "default_mmseqs_max_seqs")]
    pub mmseqs_max_seqs: u32,
    #[serde(default = "default_mmseqs_threads")]
    pub mmseqs_threads: u32,
    #[serde(default)]
    pub mmseqs_use_gpu: Option<bool>,
    #[serde(default = "default_target_db")]
    pub novelty_target_db: String,

    #[serde(default)]
    pub stop_after: Option<Stage>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub auto_recover: bool,
}

impl Default for StageRequest {
    fn default() -> Self {
        Self {
            target_fasta: None,
            target_pdb: None,
            design_chains: None,
            fixed_positions_extra: None,
            conservation_tiers: default_tiers(),
            conservation_mode: ConservationMode::default(),
            msa_min_coverage: 0.0,
            msa_min_identity: 0.0,
            ligand_mask_distance: default_ligand_distance(),
            ligand_resnames: None,
            query_pdb_min_identity: default_query_pdb_min_identity(),
            query_pdb_policy: IdentityPolicy::default(),
            num_seq_per_tier: default_num_seq_per_tier(),
            batch_size: default_batch_size(),
            sampling_temp: default_sampling_temp(),
            seed: 0,
            allow_fixed_position_violations: false,
            soluprot_cutoff: None,
            af2_model_preset: default_af2_model_preset(),
            af2_db_preset: default_af2_db_preset(),
            af2_max_template_date: default_af2_max_template_date(),
            af2_extra_flags: None,
            af2_plddt_cutoff: None,
            af2_top_k: None,
            af2_rmsd_cutoff: None,
            af2_sequence_ids: None,
            mmseqs_target_db: default_target_db(),
            mmseqs_max_seqs: default_mmseqs_max_seqs(),
            mmseqs_threads: default_mmseqs_threads(),
            mmseqs_use_gpu: None,
            novelty_target_db: default_target_db(),
            stop_after: None,
            force: false,
            dry_run: false,
            auto_recover: false,
        }
    }
}

pub const ALL_CHAINS: &str = "*";

#[derive(Deserialize)]
#[serde(untagged)]
enum ExtraPositions {
    PerChain(BTreeMap<String, Vec<usize>>),
    AllChains(Vec<usize>),
}

fn de_extra_positions<'de, D>(deserializer: D) -> std::result::Result<Option<BTreeMap<String, Vec<usize>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ExtraPositions>::deserialize(deserializer)?.map(|extra| match extra {
        ExtraPositions::PerChain(map) => map,
        ExtraPositions::AllChains(list) => BTreeMap::from([(ALL_CHAINS.to_string(), list)]),
    }))
}

/// Fields that only steer one invocation and never count as a request change.
const INVOCATION_FIELDS: &[&str] = &["stop_after", "force", "dry_run", "auto_recover"];

impl StageRequest {
    /// Parse a flat JSON argument map, rejecting unknown fields.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| PipelineError::validation(e.to_string()))
    }

    /// Fill unset thresholds from configuration.
    pub fn fill_defaults(&mut self, defaults: &DefaultsConfig) {
        self.soluprot_cutoff.get_or_insert(defaults.soluprot_cutoff);
        self.af2_plddt_cutoff.get_or_insert(defaults.af2_plddt_cutoff);
        self.af2_top_k.get_or_insert(defaults.af2_top_k);
        self.mmseqs_use_gpu.get_or_insert(defaults.mmseqs_use_gpu);
    }

    pub fn stop_after(&self) -> Stage {
        self.stop_after.unwrap_or(Stage::Novelty)
    }

    pub fn soluprot_cutoff(&self) -> f64 {
        self.soluprot_cutoff.unwrap_or(0.5)
    }

    pub fn af2_plddt_cutoff(&self) -> f64 {
        self.af2_plddt_cutoff.unwrap_or(85.0)
    }

    pub fn af2_top_k(&self) -> usize {
        self.af2_top_k.unwrap_or(20)
    }

    pub fn mmseqs_use_gpu(&self) -> bool {
        self.mmseqs_use_gpu.unwrap_or(true)
    }

    pub fn novelty_max_seqs(&self) -> u32 {
        self.mmseqs_max_seqs.min(NOVELTY_MAX_SEQS_CAP)
    }

    pub fn tier_keys(&self) -> Result<Vec<(f64, TierKey)>> {
        self.conservation_tiers
            .iter()
            .map(|t| Ok((*t, TierKey::from_tier(*t)?)))
            .collect()
    }

    /// Field-level differences against a previous snapshot, ignoring
    /// invocation-only fields.
    pub fn diff(&self, previous: &Value) -> Result<Map<String, Value>> {
        let current = serde_json::to_value(self)?;
        let mut changed = Map::new();
        let (Some(cur), Some(prev)) = (current.as_object(), previous.as_object()) else {
            return Ok(changed);
        };
        for (key, value) in cur {
            if INVOCATION_FIELDS.contains(&key.as_str()) {
                continue;
            }
            let old = prev.get(key).cloned().unwrap_or(Value::Null);
            if &old != value {
                let shown = |v: &Value| match v {
                    Value::String(s) if s.len() > 80 => Value::String(format!("<{} chars>", s.len())),
                    other => other.clone(),
                };
                changed.insert(key.clone(), serde_json::json!({ "old": shown(&old), "new": shown(value) }));
            }
        }
        Ok(changed)
    }
}
