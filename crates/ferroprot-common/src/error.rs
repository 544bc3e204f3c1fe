use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("FASTA parse error: {0}")]
    Fasta(String),

    #[error("Invalid position {position}: positions are 1-based")]
    ZeroPosition { position: usize },

    #[error("Invalid tier value: {0}")]
    Tier(String),
}

pub type Result<T> = std::result::Result<T, FormatError>;
