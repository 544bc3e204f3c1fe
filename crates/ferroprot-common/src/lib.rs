//! ferroprot-common: Shared types and errors used across all ferroprot crates.

pub mod error;
pub mod fasta;
pub mod positions;
pub mod tier;

// Re-export commonly used types
pub use error::{FormatError, Result};
pub use fasta::SequenceRecord;
pub use positions::{ChainPositions, CoordinateSpace, PositionSet, SequenceSpace, StructureSpace};
pub use tier::TierKey;
