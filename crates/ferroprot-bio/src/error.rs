use thiserror::Error;

#[derive(Debug, Error)]
pub enum BioError {
    #[error(transparent)]
    Format(#[from] ferroprot_common::FormatError),

    #[error("A3M query sequence is empty")]
    EmptyQuery,

    #[error("A3M payload could not be decoded: {0}")]
    Decode(String),

    #[error("Design {design_id} has {segments} chain segments but {chains} design chains")]
    SegmentMismatch { design_id: String, segments: usize, chains: usize },
}

pub type Result<T> = std::result::Result<T, BioError>;
