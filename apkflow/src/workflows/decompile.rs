//! The decompile workflow: pull → merge → decompile.

use super::common::{installable_apk, MergeStage, PullStage};
use crate::core::{StageArtifact, StageCategory, StageOutput};
use crate::errors::{StageError, WorkflowValidationError};
use crate::pipeline::{Stage, StageContext, WorkflowDefinition};
use crate::tools::DecompileEngine;
use crate::workspace::LedgerEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Decompile stage name.
pub const DECOMPILE: &str = "decompile";

/// Options of one decompile run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    /// The decompiler to run.
    pub engine: DecompileEngine,
}

impl DecompileOptions {
    /// Sets the engine.
    #[must_use]
    pub fn with_engine(mut self, engine: DecompileEngine) -> Self {
        self.engine = engine;
        self
    }
}

/// Builds the decompile workflow.
pub fn decompile_workflow(
    options: &DecompileOptions,
) -> Result<WorkflowDefinition, WorkflowValidationError> {
    WorkflowDefinition::builder("decompile")
        .stage(PullStage)
        .stage(MergeStage)
        .stage(DecompileStage {
            engine: options.engine,
        })
        .build()
}

/// Decompiles the installable APK into `decompile/<engine>/`.
///
/// Satisfaction is per engine: switching engines decompiles again.
#[derive(Debug, Clone, Copy)]
pub struct DecompileStage {
    engine: DecompileEngine,
}

impl DecompileStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(engine: DecompileEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Stage for DecompileStage {
    fn name(&self) -> &str {
        DECOMPILE
    }

    fn category(&self) -> StageCategory {
        StageCategory::Build
    }

    fn is_satisfied(&self, ctx: &StageContext<'_>, entry: &LedgerEntry) -> bool {
        let expected = ctx.stage_dir().join(self.engine.to_string());
        entry.is_done()
            && entry
                .artifact
                .as_ref()
                .is_some_and(|a| a.path == expected && a.exists())
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let apk = installable_apk(ctx)?;
        let output_dir = ctx.ensure_stage_dir()?.join(self.engine.to_string());
        if output_dir.exists() {
            std::fs::remove_dir_all(&output_dir)?;
        }
        ctx.tools().decompile(self.engine, &apk, &output_dir).await?;
        Ok(StageOutput::with_artifact(StageArtifact::directory(&output_dir))
            .with_note(format!("decompiled with {}", self.engine)))
    }
}
