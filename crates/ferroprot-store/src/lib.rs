//! ferroprot-store: Run directories on the local filesystem.
//!
//! Every run lives in `<output_root>/<run_id>/`. [`ArtifactStore`] owns all path
//! handling for that tree (atomic writes, bounded reads, the append-only event
//! log); [`RunStatusStore`] wraps `status.json` on top of it.

pub mod artifacts;
pub mod error;
pub mod events;
pub mod run_id;
pub mod status;

pub use artifacts::{ArtifactChunk, ArtifactEntry, ArtifactStore};
pub use error::{Result, StoreError};
pub use events::{EventKind, RunEvent};
pub use run_id::{new_run_id, normalize_run_id, safe_component};
pub use status::{RunState, RunStatus, RunStatusStore};
