//! The stage contract.

use super::StageContext;
use crate::core::{Applicability, StageCategory, StageOutput};
use crate::errors::StageError;
use crate::workspace::LedgerEntry;
use async_trait::async_trait;

/// One named, possibly side-effecting step of a workflow.
///
/// The engine asks, in order: does the stage apply to this target, is it
/// already satisfied by the ledger, and only then executes it.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique name within a workflow: lowercase letters, digits and `-`.
    fn name(&self) -> &str;

    /// Selects the time budget of each attempt.
    fn category(&self) -> StageCategory;

    /// Whether the stage applies to the current target.
    fn applicability(&self, _ctx: &StageContext<'_>) -> Applicability {
        Applicability::Applies
    }

    /// Whether an earlier run already produced this stage's result.
    ///
    /// Must not call adapters. The default accepts a `done` entry whose
    /// artifact, if it has one, still exists.
    fn is_satisfied(&self, _ctx: &StageContext<'_>, entry: &LedgerEntry) -> bool {
        entry.is_done() && entry.artifact.as_ref().map_or(true, |a| a.exists())
    }

    /// Performs the stage.
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError>;

    /// Whether retryable failures of this stage may be retried automatically.
    fn retries_allowed(&self) -> bool {
        true
    }
}
