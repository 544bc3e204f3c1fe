//! ferroprot-pipeline: Staged protein design runs.
//!
//! A run walks `msa → conservation → ligand_mask → design → soluprot → af2 →
//! novelty` up to a requested stop stage. Every stage leaves a fingerprinted
//! stamp, so repeating or extending a run only executes what changed.

pub mod backends;
pub mod context;
pub mod dry_run;
pub mod error;
pub mod fixed;
pub mod request;
pub mod runner;
pub mod service;
pub mod stages;
pub mod summary;
pub mod target;

pub use backends::{Backends, Endpoints};
pub use context::{PipelineState, RunContext, StageOutcome, StageOutput, StageStamp};
pub use error::{PipelineError, Result};
pub use request::{Stage, StageRequest};
pub use runner::{StageFailure, StageRunner};
pub use service::{PipelineService, RunErrorInfo, RunReport};
pub use summary::RunSummary;
