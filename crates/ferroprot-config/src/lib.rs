//! Configuration loading for ferroprot.
//! Reads ferroprot.toml from the current directory or the path in FERROPROT_CONFIG,
//! then applies environment overrides (a `.env` file is honoured).
//!
//! Credentials are only ever taken from the environment and are held as
//! [`SecretString`]. Missing credentials are not a load error: the stage that needs
//! the service reports it as not configured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: String, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runpod: RunPodConfig,
    #[serde(default)]
    pub soluprot: SoluProtConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
}

fn default_output_root() -> PathBuf { PathBuf::from("outputs") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { output_root: default_output_root() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunPodConfig {
    #[serde(default = "default_runpod_base_url")]
    pub base_url: String,
    pub mmseqs_endpoint_id: Option<String>,
    pub proteinmpnn_endpoint_id: Option<String>,
    pub alphafold2_endpoint_id: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_s: u64,
    /// Populated from RUNPOD_API_KEY only.
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

fn default_runpod_base_url() -> String { "https://api.runpod.ai/v2".to_string() }
fn default_request_timeout() -> u64    { 60 }

impl Default for RunPodConfig {
    fn default() -> Self {
        Self {
            base_url: default_runpod_base_url(),
            mmseqs_endpoint_id: None,
            proteinmpnn_endpoint_id: None,
            alphafold2_endpoint_id: None,
            request_timeout_s: default_request_timeout(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoluProtConfig {
    pub url: Option<String>,
    #[serde(default = "default_soluprot_timeout")]
    pub timeout_s: u64,
}

fn default_soluprot_timeout() -> u64 { 120 }

impl Default for SoluProtConfig {
    fn default() -> Self {
        Self { url: None, timeout_s: default_soluprot_timeout() }
    }
}

/// Polling and retry bounds shared by every remote job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_wait_s")]
    pub max_wait_s: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_poll_interval_ms()   -> u64 { 2_000 }
fn default_max_wait_s()         -> u64 { 6 * 60 * 60 }
fn default_retry_max_attempts() -> u32 { 5 }
fn default_retry_base_ms()      -> u64 { 1_000 }
fn default_retry_max_ms()       -> u64 { 60_000 }

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_s: default_max_wait_s(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_ms(),
            retry_max_delay_ms: default_retry_max_ms(),
        }
    }
}

/// Thresholds applied when a run request leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_soluprot_cutoff")]
    pub soluprot_cutoff: f64,
    #[serde(default = "default_af2_plddt_cutoff")]
    pub af2_plddt_cutoff: f64,
    #[serde(default = "default_af2_top_k")]
    pub af2_top_k: usize,
    #[serde(default = "default_mmseqs_use_gpu")]
    pub mmseqs_use_gpu: bool,
}

fn default_soluprot_cutoff()  -> f64   { 0.5 }
fn default_af2_plddt_cutoff() -> f64   { 85.0 }
fn default_af2_top_k()        -> usize { 20 }
fn default_mmseqs_use_gpu()   -> bool  { true }

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            soluprot_cutoff: default_soluprot_cutoff(),
            af2_plddt_cutoff: default_af2_plddt_cutoff(),
            af2_top_k: default_af2_top_k(),
            mmseqs_use_gpu: default_mmseqs_use_gpu(),
        }
    }
}

impl AppConfig {
    /// Load configuration from ferroprot.toml plus environment overrides.
    /// An explicit FERROPROT_CONFIG path must exist; the default path is optional.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }

        let mut config = match std::env::var("FERROPROT_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new("ferroprot.toml").exists() => {
                Self::from_file(Path::new("ferroprot.toml"))?
            }
            Err(_) => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("PIPELINE_OUTPUT_ROOT") {
            self.storage.output_root = PathBuf::from(v);
        }

        if let Some(v) = get("RUNPOD_API_KEY") {
            self.runpod.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = get("RUNPOD_BASE_URL") {
            self.runpod.base_url = v;
        }
        if let Some(v) = get("MMSEQS_ENDPOINT_ID") {
            self.runpod.mmseqs_endpoint_id = Some(v);
        }
        if let Some(v) = get("PROTEINMPNN_ENDPOINT_ID") {
            self.runpod.proteinmpnn_endpoint_id = Some(v);
        }
        if let Some(v) = get("ALPHAFOLD2_ENDPOINT_ID").or_else(|| get("AF2_ENDPOINT_ID")) {
            self.runpod.alphafold2_endpoint_id = Some(v);
        }
        if let Some(v) = get("SOLUPROT_URL") {
            self.soluprot.url = Some(v);
        }

        parse_into(&get, "PIPELINE_POLL_INTERVAL_MS", &mut self.jobs.poll_interval_ms)?;
        parse_into(&get, "PIPELINE_MAX_WAIT_S", &mut self.jobs.max_wait_s)?;
        parse_into(&get, "PIPELINE_RETRY_MAX_ATTEMPTS", &mut self.jobs.retry_max_attempts)?;
        parse_into(&get, "PIPELINE_RETRY_BASE_MS", &mut self.jobs.retry_base_delay_ms)?;
        parse_into(&get, "PIPELINE_RETRY_MAX_MS", &mut self.jobs.retry_max_delay_ms)?;

        parse_into(&get, "PIPELINE_SOLUPROT_CUTOFF", &mut self.defaults.soluprot_cutoff)?;
        parse_into(&get, "PIPELINE_AF2_PLDDT_CUTOFF", &mut self.defaults.af2_plddt_cutoff)?;
        parse_into(&get, "PIPELINE_AF2_TOP_K", &mut self.defaults.af2_top_k)?;
        if let Some(v) = get("PIPELINE_MMSEQS_USE_GPU") {
            self.defaults.mmseqs_use_gpu = parse_bool(&v)
                .ok_or_else(|| ConfigError::InvalidEnv { name: "PIPELINE_MMSEQS_USE_GPU".into(), value: v })?;
        }
        Ok(())
    }

    /// Apply overrides from an in-memory map.
    pub fn apply_env_map(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        self.apply_env(|name| vars.get(name).cloned())
    }
}

fn parse_into<T, G>(get: &G, name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = raw
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value: raw.clone() })?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
