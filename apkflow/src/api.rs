//! The library facade used by the binary.
//!
//! [`Apkflow`] wires configuration, adapters, the workspace store and the
//! engine together. Every collaborator can be replaced, so the same calls run
//! against real devices or against the fakes in [`crate::testing`].

use crate::cancellation::CancellationToken;
use crate::config::ApkflowConfig;
use crate::device::{AdbBridge, Device, DeviceBridge};
use crate::errors::ApkflowError;
use crate::events::{EventSink, LoggingEventSink};
use crate::pipeline::{PipelineEngine, PipelineReport, RunContext};
use crate::resolver::{
    CandidateList, Disambiguator, OperatorPrompt, ResolveOptions, ResolvedTarget, TargetResolver,
    Unattended,
};
use crate::tools::{ProcessEnv, ProcessToolchain, Tool, ToolPaths, ToolResolution, Toolchain};
use crate::workflows::{build_workflow, WorkflowKind, WorkflowOptions};
use crate::workspace::{CleanReport, LedgerSnapshot, WorkspaceKey, WorkspaceStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for resolving targets and running workflows.
#[derive(Clone)]
pub struct Apkflow {
    config: ApkflowConfig,
    store: WorkspaceStore,
    engine: PipelineEngine,
    bridge: Arc<dyn DeviceBridge>,
    tools: Arc<dyn Toolchain>,
    disambiguator: Arc<dyn Disambiguator>,
    prompt: Arc<dyn OperatorPrompt>,
}

impl std::fmt::Debug for Apkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Apkflow")
            .field("workspace_root", &self.store.root())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Apkflow {
    /// Creates a facade over explicit adapters. Interaction defaults to unattended.
    #[must_use]
    pub fn new(
        config: ApkflowConfig,
        bridge: Arc<dyn DeviceBridge>,
        tools: Arc<dyn Toolchain>,
    ) -> Self {
        let store = WorkspaceStore::new(config.workspace_root());
        let engine = PipelineEngine::new(config.retry.clone(), config.timeouts.clone())
            .with_events(Arc::new(LoggingEventSink::debug()));
        Self {
            config,
            store,
            engine,
            bridge,
            tools,
            disambiguator: Arc::new(Unattended::new()),
            prompt: Arc::new(Unattended::new()),
        }
    }

    /// Creates a facade driving the real `adb` and host tools found on this machine.
    ///
    /// Missing tools are reported when a stage needs them, not here.
    #[must_use]
    pub fn from_config(config: ApkflowConfig) -> Self {
        let paths = ToolPaths::resolve(&ProcessEnv, &config);
        let missing = paths.missing();
        if !missing.is_empty() {
            debug!(missing = ?missing, "Some tools were not found");
        }
        let adb = match paths.get(Tool::Adb) {
            ToolResolution::Executable(path) => path.clone(),
            _ => PathBuf::from(Tool::Adb.binary()),
        };
        let bridge = Arc::new(AdbBridge::new(adb, config.timeouts.clone()));
        let tools = Arc::new(ProcessToolchain::new(
            paths,
            config.keystore.clone(),
            config.keystore_path(),
            config.timeouts.clone(),
        ));
        Self::new(config, bridge, tools)
    }

    /// Sets how ambiguous matches are settled.
    #[must_use]
    pub fn with_disambiguator(mut self, disambiguator: Arc<dyn Disambiguator>) -> Self {
        self.disambiguator = disambiguator;
        self
    }

    /// Sets how manual steps are confirmed.
    #[must_use]
    pub fn with_prompt(mut self, prompt: Arc<dyn OperatorPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Replaces the engine's event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.engine = self.engine.with_events(events);
        self
    }

    /// Uses another workspace root.
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store = WorkspaceStore::new(root);
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &ApkflowConfig {
        &self.config
    }

    /// The workspace store.
    #[must_use]
    pub fn store(&self) -> &WorkspaceStore {
        &self.store
    }

    fn resolver(&self) -> TargetResolver<'_> {
        TargetResolver::new(self.bridge.as_ref(), self.disambiguator.as_ref())
    }

    /// Lists devices in every state.
    pub async fn devices(&self) -> Result<Vec<Device>, ApkflowError> {
        Ok(self.bridge.list_devices().await?)
    }

    /// Lists packages matching `query` without choosing.
    pub async fn candidates(
        &self,
        query: &str,
        options: &ResolveOptions,
    ) -> Result<CandidateList, ApkflowError> {
        self.resolver().candidates(query, options).await
    }

    /// Resolves `query` to one device and package.
    pub async fn resolve(
        &self,
        query: &str,
        options: &ResolveOptions,
    ) -> Result<ResolvedTarget, ApkflowError> {
        self.resolver().resolve(query, options).await
    }

    /// Runs a workflow by name.
    pub async fn run_named(
        &self,
        workflow: &str,
        target: &ResolvedTarget,
        options: &WorkflowOptions,
        cancellation: Arc<CancellationToken>,
    ) -> Result<PipelineReport, ApkflowError> {
        let kind: WorkflowKind = workflow.parse()?;
        self.run(kind, target, options, cancellation).await
    }

    /// Runs a workflow against the workspace of `target`.
    pub async fn run(
        &self,
        kind: WorkflowKind,
        target: &ResolvedTarget,
        options: &WorkflowOptions,
        cancellation: Arc<CancellationToken>,
    ) -> Result<PipelineReport, ApkflowError> {
        let workflow = build_workflow(kind, options)?;
        let mut workspace = self.store.open(&target.workspace_key())?;
        let ctx = RunContext::new(target.clone(), self.bridge.clone(), self.tools.clone())
            .with_prompt(self.prompt.clone())
            .with_cancellation(cancellation);
        info!(
            workflow = %kind,
            package = %target.package.name,
            device = %target.device.id,
            workspace = %workspace.dir().display(),
            "Running workflow"
        );
        self.engine.run(&workflow, &mut workspace, &ctx).await
    }

    /// Ledger snapshot of a workspace.
    pub fn status(&self, key: &WorkspaceKey) -> Result<LedgerSnapshot, ApkflowError> {
        self.store.status(key)
    }

    /// Removes a workspace's artifacts; `force` also removes its ledger.
    pub fn clean(&self, key: &WorkspaceKey, force: bool) -> Result<CleanReport, ApkflowError> {
        self.store.clean(key, force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::testing::{split_package, FakeDeviceBridge, FakeToolchain, ScriptedDisambiguator};
    use crate::tools::DecompileEngine;

    fn facade(root: &std::path::Path, picker: ScriptedDisambiguator) -> (Apkflow, Arc<FakeDeviceBridge>) {
        let bridge = Arc::new(
            FakeDeviceBridge::new()
                .with_device(Device::online("emulator-5554"))
                .with_package(split_package("com.example.shop"))
                .with_package(split_package("com.example.shop.beta")),
        );
        let apkflow = Apkflow::new(
            ApkflowConfig::default().with_workspace_root(root),
            bridge.clone(),
            Arc::new(FakeToolchain::new()),
        )
        .with_disambiguator(Arc::new(picker));
        (apkflow, bridge)
    }

    #[tokio::test]
    async fn test_resolve_run_status_clean() {
        let dir = tempfile::tempdir().unwrap();
        let (apkflow, _bridge) = facade(dir.path(), ScriptedDisambiguator::new([2]));

        let target = apkflow.resolve("shop", &ResolveOptions::default()).await.unwrap();
        assert_eq!(target.package.name, "com.example.shop.beta");

        let mut options = WorkflowOptions::default();
        options.decompile.engine = DecompileEngine::Apktool;
        let report = apkflow
            .run_named("decompile", &target, &options, Arc::new(CancellationToken::new()))
            .await
            .unwrap();
        assert!(report.is_success(), "{report}");

        let key = target.workspace_key();
        let snapshot = apkflow.status(&key).unwrap();
        assert!(snapshot.exists);
        assert_eq!(snapshot.completed_stages(), vec!["decompile", "merge", "pull"]);

        let cleaned = apkflow.clean(&key, false).unwrap();
        assert_eq!(cleaned.reset_stages.len(), 3);
        let snapshot = apkflow.status(&key).unwrap();
        assert!(snapshot.stages.values().all(|e| e.status == StageStatus::Pending));
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let (apkflow, bridge) = facade(dir.path(), ScriptedDisambiguator::default());
        let target = apkflow
            .resolve("com.example.shop", &ResolveOptions::default())
            .await
            .unwrap();

        let err = apkflow
            .run_named("frida", &target, &WorkflowOptions::default(), Arc::new(CancellationToken::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApkflowError::UnknownWorkflow(_)));
        assert_eq!(bridge.calls_named("pull"), 0);
    }
}
