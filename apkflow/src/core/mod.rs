//! Core domain types shared by the engine and the stages.
//!
//! - Stage status and category enums
//! - Stage artifacts
//! - Stage outputs and results

mod artifact;
mod output;
mod status;

pub use artifact::{ArtifactKind, StageArtifact};
pub use output::{Applicability, StageOutput, StageResult};
pub use status::{StageCategory, StageStatus};
