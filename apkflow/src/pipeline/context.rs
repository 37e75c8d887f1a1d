//! Per-run and per-stage execution context.

use crate::cancellation::CancellationToken;
use crate::core::StageArtifact;
use crate::device::DeviceBridge;
use crate::resolver::{OperatorPrompt, ResolvedTarget, Unattended};
use crate::tools::Toolchain;
use crate::workspace::{LedgerEntry, Workspace};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a run needs besides the workspace.
#[derive(Clone)]
pub struct RunContext {
    /// Run identifier, recorded with every ledger transition.
    pub run_id: Uuid,
    /// The resolved device and package.
    pub target: ResolvedTarget,
    /// Device access.
    pub device: Arc<dyn DeviceBridge>,
    /// Host tools.
    pub tools: Arc<dyn Toolchain>,
    /// Human confirmation of manual steps.
    pub prompt: Arc<dyn OperatorPrompt>,
    /// Checked at stage boundaries.
    pub cancellation: Arc<CancellationToken>,
}

impl RunContext {
    /// Creates a non-interactive run context with a fresh run id.
    #[must_use]
    pub fn new(
        target: ResolvedTarget,
        device: Arc<dyn DeviceBridge>,
        tools: Arc<dyn Toolchain>,
    ) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            target,
            device,
            tools,
            prompt: Arc::new(Unattended::new()),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the operator prompt.
    #[must_use]
    pub fn with_prompt(mut self, prompt: Arc<dyn OperatorPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Device id of the target.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.target.device.id
    }

    /// Package name of the target.
    #[must_use]
    pub fn package_name(&self) -> &str {
        &self.target.package.name
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("target", &self.target)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// View of a run handed to one stage.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    run: &'a RunContext,
    workspace: &'a Workspace,
    stage: &'a str,
}

impl<'a> StageContext<'a> {
    /// Creates a stage context.
    #[must_use]
    pub fn new(run: &'a RunContext, workspace: &'a Workspace, stage: &'a str) -> Self {
        Self {
            run,
            workspace,
            stage,
        }
    }

    /// The run.
    #[must_use]
    pub fn run(&self) -> &'a RunContext {
        self.run
    }

    /// The target.
    #[must_use]
    pub fn target(&self) -> &'a ResolvedTarget {
        &self.run.target
    }

    /// Device id of the target.
    #[must_use]
    pub fn device_id(&self) -> &'a str {
        self.run.device_id()
    }

    /// Package name of the target.
    #[must_use]
    pub fn package_name(&self) -> &'a str {
        self.run.package_name()
    }

    /// Device access.
    #[must_use]
    pub fn device(&self) -> &'a dyn DeviceBridge {
        self.run.device.as_ref()
    }

    /// Host tools.
    #[must_use]
    pub fn tools(&self) -> &'a dyn Toolchain {
        self.run.tools.as_ref()
    }

    /// Operator prompt.
    #[must_use]
    pub fn prompt(&self) -> &'a dyn OperatorPrompt {
        self.run.prompt.as_ref()
    }

    /// The workspace.
    #[must_use]
    pub fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    /// Name of the executing stage.
    #[must_use]
    pub fn stage(&self) -> &'a str {
        self.stage
    }

    /// Artifact directory of the executing stage.
    #[must_use]
    pub fn stage_dir(&self) -> PathBuf {
        self.workspace.stage_dir(self.stage)
    }

    /// Creates the stage directory and returns it.
    pub fn ensure_stage_dir(&self) -> io::Result<PathBuf> {
        let dir = self.stage_dir();
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Ledger entry of another stage.
    #[must_use]
    pub fn entry_of(&self, stage: &str) -> Option<&'a LedgerEntry> {
        self.workspace.ledger().entry(stage)
    }

    /// Artifact recorded by another stage.
    #[must_use]
    pub fn artifact_of(&self, stage: &str) -> Option<&'a StageArtifact> {
        self.entry_of(stage).and_then(|e| e.artifact.as_ref())
    }
}

impl fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("run_id", &self.run.run_id)
            .field("workspace", self.workspace.key())
            .field("stage", &self.stage)
            .finish()
    }
}
