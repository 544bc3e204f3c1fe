//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Path escapes the run directory: {0}")]
    PathEscape(String),

    #[error("Invalid run id: {0:?}")]
    InvalidRunId(String),

    #[error("Refusing to persist not_found status for run {0}")]
    InvalidStatus(String),

    #[error("Artifact {path} is {size} bytes, limit is {limit}")]
    ArtifactTooLarge { path: String, size: u64, limit: u64 },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }
}
