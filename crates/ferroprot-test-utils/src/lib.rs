//! ferroprot-test-utils: Fixtures and fake services shared by the workspace tests.

pub mod fixtures;
pub mod services;

pub use fixtures::{a3m, gz_b64, temp_store, PdbBuilder};
pub use services::{FailingService, FixedScorer, RecordingService};
