//! What a stage hands back to the engine.

use super::StageArtifact;
use crate::errors::StageError;

/// Successful result of [`Stage::execute`](crate::pipeline::Stage::execute).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    /// The produced artifact, if any.
    pub artifact: Option<StageArtifact>,
    /// Free-form note recorded in the ledger.
    pub note: Option<String>,
}

impl StageOutput {
    /// An output with an artifact.
    #[must_use]
    pub fn with_artifact(artifact: StageArtifact) -> Self {
        Self {
            artifact: Some(artifact),
            note: None,
        }
    }

    /// An output without an artifact.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attaches a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Whether a stage applies to the current target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    /// The stage must run (or be satisfied).
    Applies,
    /// The stage is skipped for this target, with a reason.
    NotApplicable(String),
}

/// The resolved result of one stage within a run.
#[derive(Debug, Clone)]
pub enum StageResult {
    /// Executed successfully in this run.
    Done {
        /// The produced artifact.
        artifact: Option<StageArtifact>,
        /// Optional note.
        note: Option<String>,
        /// Attempts used.
        attempts: u32,
    },
    /// Not executed in this run.
    Skipped {
        /// Why the stage did not run.
        reason: String,
        /// Artifact left by the earlier run, if any.
        artifact: Option<StageArtifact>,
    },
    /// Failed; the run halts here.
    Failed {
        /// The final error.
        error: StageError,
        /// Attempts used.
        attempts: u32,
    },
}

impl StageResult {
    /// Returns true if the run may continue past this stage.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}
