//! Run reports.

use crate::core::{StageArtifact, StageCategory, StageStatus};
use crate::errors::{StageError, StageErrorKind};
use crate::workspace::WorkspaceKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A stage error as it appears in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedError {
    /// Classification.
    pub kind: StageErrorKind,
    /// Message.
    pub message: String,
    /// Whether the failure was retryable.
    pub retryable: bool,
    /// Whether an operator must intervene before resuming.
    pub requires_operator: bool,
}

impl From<&StageError> for ReportedError {
    fn from(error: &StageError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            requires_operator: error.requires_operator(),
        }
    }
}

/// Final state of one stage in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name.
    pub name: String,
    /// Stage category.
    pub category: StageCategory,
    /// `done`, `skipped`, `failed` or `pending`.
    pub status: StageStatus,
    /// Attempts made in this run.
    pub attempts: u32,
    /// Artifact produced or reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<StageArtifact>,
    /// Wall time spent in this run.
    pub duration_ms: u64,
    /// Skip reason or stage note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Final error of a failed stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
}

impl StageReport {
    /// A stage that was never reached.
    #[must_use]
    pub fn pending(name: impl Into<String>, category: StageCategory) -> Self {
        Self {
            name: name.into(),
            category,
            status: StageStatus::Pending,
            attempts: 0,
            artifact: None,
            duration_ms: 0,
            note: None,
            error: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage is done or skipped.
    Completed,
    /// A stage failed; later stages were not attempted.
    Halted {
        /// The failed stage.
        stage: String,
        /// Its error.
        error: ReportedError,
    },
    /// Cancellation was requested; the run stopped at a stage boundary.
    Cancelled {
        /// Cancellation reason.
        reason: String,
        /// First stage not started.
        next_stage: Option<String>,
    },
}

/// Result of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Workflow name.
    pub workflow: String,
    /// Workspace the run recorded into.
    pub workspace: WorkspaceKey,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Every stage in definition order.
    pub stages: Vec<StageReport>,
    /// Stages that are done, in this or an earlier run.
    pub completed_stages: Vec<String>,
    /// Set when the ledger was recovered from a corrupt file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_ledger: Option<String>,
}

impl PipelineReport {
    /// Returns true if the run completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Report of one stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Status of one stage.
    #[must_use]
    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.stage(name).map(|s| s.status)
    }

    /// The stage that halted the run, with its error.
    #[must_use]
    pub fn halting_error(&self) -> Option<(&str, &ReportedError)> {
        match &self.outcome {
            RunOutcome::Halted { stage, error } => Some((stage.as_str(), error)),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = match &self.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Halted { stage, .. } => format!("halted at {stage}"),
            RunOutcome::Cancelled { reason, .. } => format!("cancelled ({reason})"),
        };
        writeln!(f, "Workflow {} on {}: {summary}", self.workflow, self.workspace)?;

        let width = self.stages.iter().map(|s| s.name.len()).max().unwrap_or(0);
        for stage in &self.stages {
            write!(f, "  {:<9} {:<width$}", format!("[{}]", stage.status), stage.name)?;
            if stage.attempts > 1 {
                write!(f, "  ({} attempts)", stage.attempts)?;
            }
            if let Some(error) = &stage.error {
                write!(f, "  {}", error.message)?;
            } else if let Some(artifact) = &stage.artifact {
                write!(f, "  -> {}", artifact.path.display())?;
            } else if let Some(note) = &stage.note {
                write!(f, "  {note}")?;
            }
            writeln!(f)?;
        }

        if let Some((_, error)) = self.halting_error() {
            if error.requires_operator {
                writeln!(f, "Manual remediation required before resuming.")?;
            }
        }
        if let Some(recovered) = &self.recovered_ledger {
            writeln!(f, "Warning: {recovered}")?;
        }
        Ok(())
    }
}
