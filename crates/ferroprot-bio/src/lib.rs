//! ferroprot-bio - Local analysis steps of the design pipeline.
//!
//! Everything here is pure and synchronous:
//! 1. Parsing MSA results (A3M) and filtering hits by quality
//! 2. Per-position conservation and tiered position selection
//! 3. Parsing PDB text and masking residues near bound ligands
//! 4. Aligning the query sequence to structure chains and mapping positions
//! 5. Selection filters for scored candidates, including structural deviation
//! 6. Verifying that designed sequences kept their fixed positions

pub mod a3m;
pub mod alignment;
pub mod conservation;
pub mod deviation;
pub mod error;
pub mod fixed_check;
pub mod ligand_mask;
pub mod mapping;
pub mod msa_filter;
pub mod selection;
pub mod structure;

pub use error::{BioError, Result};
