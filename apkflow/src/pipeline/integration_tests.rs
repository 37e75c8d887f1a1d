//! Whole-workflow tests against scripted adapters.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::config::TimeoutConfig;
    use crate::core::{StageCategory, StageOutput, StageStatus};
    use crate::errors::{
        ApkflowError, SelectionError, StageError, StageErrorKind, StageToolFailureError,
    };
    use crate::events::CollectingEventSink;
    use crate::pipeline::{
        JitterStrategy, PipelineEngine, PipelineReport, RetryConfig, RunContext, RunOutcome,
        Stage, StageContext, WorkflowDefinition,
    };
    use crate::resolver::ResolvedTarget;
    use crate::testing::{
        single_package, split_package, target, FakeDeviceBridge, FakeToolchain, ScriptedPrompt,
        TestWorkspace,
    };
    use crate::workflows::{
        decompile_workflow, instrument_workflow, DecompileOptions, InstrumentOptions, PullStage,
    };
    use crate::workspace::LEDGER_FILE;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const PACKAGE: &str = "com.example.flutterapp";
    const TEXT_DUMP: &str = "Library:'package:app/main.dart' Class: MyApp extends StatelessWidget {\n  Function 'build': (BuildContext) => Widget\n}\n";

    struct Harness {
        workspaces: TestWorkspace,
        bridge: Arc<FakeDeviceBridge>,
        tools: Arc<FakeToolchain>,
        target: ResolvedTarget,
        engine: PipelineEngine,
        events: Arc<CollectingEventSink>,
    }

    impl Harness {
        fn new(target: ResolvedTarget, tools: FakeToolchain) -> Self {
            let bridge = FakeDeviceBridge::new()
                .with_device(target.device.clone())
                .with_package(target.package.clone())
                .with_dump(TEXT_DUMP);
            Self::with_bridge(target, bridge, tools)
        }

        fn with_bridge(target: ResolvedTarget, bridge: FakeDeviceBridge, tools: FakeToolchain) -> Self {
            let events = Arc::new(CollectingEventSink::new());
            let retry = RetryConfig::new()
                .with_base_delay_ms(0)
                .with_jitter(JitterStrategy::None);
            let engine = PipelineEngine::new(retry, TimeoutConfig::default()).with_events(events.clone());
            Self {
                workspaces: TestWorkspace::new(),
                bridge: Arc::new(bridge),
                tools: Arc::new(tools),
                target,
                engine,
                events,
            }
        }

        fn context(&self) -> RunContext {
            RunContext::new(self.target.clone(), self.bridge.clone(), self.tools.clone())
        }

        async fn run(&self, workflow: &WorkflowDefinition) -> PipelineReport {
            self.run_with(workflow, self.context()).await.unwrap()
        }

        async fn run_with(
            &self,
            workflow: &WorkflowDefinition,
            ctx: RunContext,
        ) -> Result<PipelineReport, ApkflowError> {
            let mut workspace = self.workspaces.open(&self.target)?;
            self.engine.run(workflow, &mut workspace, &ctx).await
        }

        fn mutating_calls(&self) -> usize {
            self.bridge.mutating_calls() + self.tools.mutating_calls()
        }
    }

    fn instrument() -> WorkflowDefinition {
        instrument_workflow(&InstrumentOptions::default().with_launch_settle(Duration::ZERO)).unwrap()
    }

    fn decompile() -> WorkflowDefinition {
        decompile_workflow(&DecompileOptions::default()).unwrap()
    }

    fn install_failure() -> StageToolFailureError {
        StageToolFailureError::new("adb install", "INSTALL_FAILED_INVALID_APK").with_exit_code(Some(1))
    }

    #[tokio::test]
    async fn test_instrument_split_package_end_to_end() {
        let h = Harness::new(target(split_package(PACKAGE)), FakeToolchain::new());
        let report = h.run(&instrument()).await;

        assert!(report.is_success(), "{report}");
        assert!(report.stages.iter().all(|s| s.status == StageStatus::Done));
        assert_eq!(report.completed_stages.len(), 10);
        assert_eq!(h.bridge.calls_named("pull"), 3);
        assert_eq!(h.tools.calls_named("merge_splits"), 1);
        assert!(!h.bridge.is_installed(PACKAGE));
        assert_eq!(h.bridge.installed_apks().len(), 1);

        let parsed = report.stage("parse-dump").unwrap().artifact.clone().unwrap();
        assert!(parsed.path.ends_with("parse-dump/dump.json"));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&parsed.path).unwrap()).unwrap();
        assert_eq!(json["format"], "classes");
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let h = Harness::new(target(split_package(PACKAGE)), FakeToolchain::new());
        let first = h.run(&instrument()).await;
        assert!(first.is_success());

        h.bridge.clear_calls();
        h.tools.clear_calls();
        let second = h.run(&instrument()).await;

        assert!(second.is_success());
        assert!(second.stages.iter().all(|s| s.status == StageStatus::Skipped));
        assert_eq!(h.mutating_calls(), 0);
        assert_eq!(second.completed_stages, first.completed_stages);
    }

    #[tokio::test]
    async fn test_single_apk_skips_merge() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let report = h.run(&decompile()).await;

        assert!(report.is_success());
        let merge = report.stage("merge").unwrap();
        assert_eq!(merge.status, StageStatus::Skipped);
        assert_eq!(merge.note.as_deref(), Some("package is not split"));
        assert_eq!(h.tools.calls_named("merge_splits"), 0);
        assert!(report.completed_stages.contains(&"merge".to_string()));

        let call = h.tools.calls().into_iter().find(|c| c.method == "decompile").unwrap();
        assert!(call.args[1].ends_with("base.apk"));
    }

    #[tokio::test]
    async fn test_incomplete_split_set_blocks_merge() {
        let package = split_package(PACKAGE);
        let bridge = FakeDeviceBridge::new()
            .with_device(target(package.clone()).device)
            .with_package(package.clone())
            .with_failing_pull("split_config.xxhdpi.apk");
        let h = Harness::with_bridge(target(package), bridge, FakeToolchain::new());

        let report = h.run(&decompile()).await;
        let pull = report.stage("pull").unwrap();
        assert_eq!(pull.status, StageStatus::Done);
        assert_eq!(pull.note.as_deref(), Some("incomplete split set: 2 of 3 parts"));

        let (stage, error) = report.halting_error().unwrap();
        assert_eq!(stage, "merge");
        assert_eq!(error.kind, StageErrorKind::IncompleteSplitSet);
        assert!(!error.retryable);
        assert_eq!(report.stage("merge").unwrap().attempts, 1);
        assert_eq!(report.status_of("decompile"), Some(StageStatus::Pending));
        assert_eq!(h.tools.calls_named("merge_splits"), 0);

        // the next run pulls again because the recorded set is incomplete
        h.bridge.heal_pull("split_config.xxhdpi.apk");
        let report = h.run(&decompile()).await;
        assert!(report.is_success(), "{report}");
        assert_eq!(report.status_of("pull"), Some(StageStatus::Done));
        assert_eq!(h.tools.calls_named("merge_splits"), 1);
    }

    #[tokio::test]
    async fn test_resume_from_failed_stage() {
        let tools = FakeToolchain::new();
        tools.fail_times("patch", 3);
        let h = Harness::new(target(split_package(PACKAGE)), tools);

        let first = h.run(&instrument()).await;
        assert_eq!(first.halting_error().unwrap().0, "patch");
        assert_eq!(first.stage("patch").unwrap().attempts, 3);
        assert_eq!(
            first.completed_stages,
            vec!["pull", "merge", "validate-framework"]
        );
        assert_eq!(h.bridge.calls_named("uninstall"), 0);

        let second = h.run(&instrument()).await;
        assert!(second.is_success(), "{second}");
        for name in ["pull", "merge", "validate-framework"] {
            assert_eq!(second.status_of(name), Some(StageStatus::Skipped), "{name}");
        }
        assert_eq!(second.status_of("patch"), Some(StageStatus::Done));
        assert_eq!(h.bridge.calls_named("pull"), 3);
        assert_eq!(h.tools.calls_named("merge_splits"), 1);
        assert_eq!(h.tools.calls_named("patch"), 4);
    }

    #[tokio::test]
    async fn test_retryable_failure_recovers_within_budget() {
        let tools = FakeToolchain::new();
        tools.fail_times("sign", 2);
        let h = Harness::new(target(single_package(PACKAGE)), tools);

        let report = h.run(&instrument()).await;
        assert!(report.is_success());
        assert_eq!(report.stage("sign").unwrap().attempts, 3);
        assert_eq!(h.events.events_of_type("stage.retrying").len(), 2);
        assert_eq!(
            h.events.stage_events("sign"),
            vec!["stage.started", "stage.retrying", "stage.retrying", "stage.completed"]
        );
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_reported() {
        let tools = FakeToolchain::new().with_delay("merge_splits", Duration::from_millis(500));
        let mut h = Harness::new(target(split_package(PACKAGE)), tools);
        h.engine = PipelineEngine::new(
            RetryConfig::new()
                .with_max_attempts(2)
                .with_base_delay_ms(0),
            TimeoutConfig::new().with_limit(StageCategory::Build, Some(Duration::from_millis(20))),
        );

        let report = h.run(&decompile()).await;
        let (stage, error) = report.halting_error().unwrap();
        assert_eq!(stage, "merge");
        assert_eq!(error.kind, StageErrorKind::Timeout);
        assert!(error.retryable);
        assert_eq!(report.stage("merge").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_install_failure_after_uninstall_diverges() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        h.bridge.fail_next("install", install_failure().into());

        let report = h.run(&instrument()).await;
        let (stage, error) = report.halting_error().unwrap();
        assert_eq!(stage, "install-patched");
        assert_eq!(error.kind, StageErrorKind::DeviceStateDiverged);
        assert!(error.requires_operator);
        assert!(!error.retryable);
        assert_eq!(h.bridge.calls_named("install"), 1);
        assert!(report.to_string().contains("Manual remediation required"));

        let snapshot = h
            .workspaces
            .store()
            .status(&h.target.workspace_key())
            .unwrap();
        assert_eq!(snapshot.stages["uninstall-original"].status, StageStatus::Done);
        let install = &snapshot.stages["install-patched"];
        assert_eq!(install.status, StageStatus::Failed);
        assert_eq!(install.failure_kind, Some(StageErrorKind::DeviceStateDiverged));

        // after remediation the run resumes at install without uninstalling again
        let report = h.run(&instrument()).await;
        assert!(report.is_success(), "{report}");
        assert_eq!(report.status_of("uninstall-original"), Some(StageStatus::Skipped));
        assert_eq!(h.bridge.calls_named("uninstall"), 1);
        assert_eq!(h.bridge.calls_named("install"), 2);
    }

    #[tokio::test]
    async fn test_non_flutter_apk_fails_validation() {
        let tools = FakeToolchain::new().with_entries(["classes.dex", "assets/index.android.bundle"]);
        let h = Harness::new(target(single_package(PACKAGE)), tools);

        let report = h.run(&instrument()).await;
        let (stage, error) = report.halting_error().unwrap();
        assert_eq!(stage, "validate-framework");
        assert_eq!(error.kind, StageErrorKind::Fatal);
        assert!(error.message.contains("not a Flutter app"));
        assert!(error.message.contains("React Native"));
        assert_eq!(h.tools.calls_named("patch"), 0);

        let forced = instrument_workflow(
            &InstrumentOptions::default()
                .with_force(true)
                .with_launch_settle(Duration::ZERO),
        )
        .unwrap();
        let report = h.run(&forced).await;
        assert!(report.is_success(), "{report}");
        assert_eq!(report.status_of("validate-framework"), Some(StageStatus::Skipped));
    }

    #[tokio::test]
    async fn test_unstructured_dump_keeps_raw_artifact() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        h.bridge.set_dump("not a structured dump");

        let report = h.run(&instrument()).await;
        assert!(report.is_success());
        let parse = report.stage("parse-dump").unwrap();
        assert_eq!(parse.status, StageStatus::Done);
        assert_eq!(parse.note.as_deref(), Some("dump is not structured; raw dump kept"));
        assert_eq!(parse.artifact, report.stage("dump").unwrap().artifact);
    }

    #[tokio::test]
    async fn test_empty_dump_is_retried() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        h.bridge.set_dump("");

        let report = h.run(&instrument()).await;
        let (stage, error) = report.halting_error().unwrap();
        assert_eq!(stage, "dump");
        assert!(error.retryable);
        assert_eq!(h.bridge.calls_named("read_dump"), 3);
        assert_eq!(report.status_of("parse-dump"), Some(StageStatus::Pending));
    }

    #[tokio::test]
    async fn test_skip_dump_and_manual_start() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let skip = instrument_workflow(&InstrumentOptions::default().with_skip_dump(true)).unwrap();
        let report = h.run(&skip).await;
        assert!(report.is_success());
        for name in ["launch-or-wait", "dump", "parse-dump"] {
            assert_eq!(report.status_of(name), Some(StageStatus::Skipped), "{name}");
        }
        assert_eq!(h.bridge.calls_named("launch"), 0);

        let prompt = Arc::new(ScriptedPrompt::new());
        let manual = instrument_workflow(&InstrumentOptions::default().with_manual_start(true)).unwrap();
        let report = h
            .run_with(&manual, h.context().with_prompt(prompt.clone()))
            .await
            .unwrap();
        assert!(report.is_success(), "{report}");
        assert_eq!(prompt.messages().len(), 1);
        assert_eq!(h.bridge.calls_named("launch"), 0);
    }

    #[tokio::test]
    async fn test_manual_start_without_operator_fails() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let manual = instrument_workflow(&InstrumentOptions::default().with_manual_start(true)).unwrap();
        let report = h.run(&manual).await;
        let (stage, error) = report.halting_error().unwrap();
        assert_eq!(stage, "launch-or-wait");
        assert_eq!(error.kind, StageErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_failed_auto_launch_falls_back_to_operator() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        h.bridge.fail_next(
            "launch",
            StageToolFailureError::new("adb shell monkey", "No activities found to run").into(),
        );
        let prompt = Arc::new(ScriptedPrompt::new().with_answer(Err(SelectionError::Aborted)));

        let report = h
            .run_with(&instrument(), h.context().with_prompt(prompt.clone()))
            .await
            .unwrap();
        let (stage, error) = report.halting_error().unwrap();
        assert_eq!(stage, "launch-or-wait");
        assert_eq!(error.kind, StageErrorKind::Fatal);
        assert!(error.message.contains("not confirmed"));
        assert_eq!(prompt.messages().len(), 1);
        assert_eq!(h.bridge.calls_named("launch"), 1);
        assert_eq!(h.bridge.calls_named("read_dump"), 0);
    }

    #[tokio::test]
    async fn test_timeout_without_retries_halts_at_once() {
        let mut h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        h.engine = PipelineEngine::new(RetryConfig::no_retry(), TimeoutConfig::default());
        h.tools.time_out_next("sign");

        let report = h.run(&instrument()).await;
        let (stage, error) = report.halting_error().unwrap();
        assert_eq!(stage, "sign");
        assert_eq!(error.kind, StageErrorKind::Timeout);
        assert!(error.retryable);
        assert_eq!(report.stage("sign").unwrap().attempts, 1);
        assert_eq!(h.bridge.calls_named("uninstall"), 0);
    }

    #[tokio::test]
    async fn test_locked_workspace_is_refused() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let holder = h.workspaces.open(&h.target).unwrap();
        let _guard = holder.lock().unwrap();

        let err = h.run_with(&decompile(), h.context()).await.unwrap_err();
        assert!(matches!(err, ApkflowError::WorkspaceLocked(_)));
        assert_eq!(h.mutating_calls(), 0);
    }

    struct SlowStage;

    #[async_trait]
    impl Stage for SlowStage {
        fn name(&self) -> &str {
            "slow"
        }

        fn category(&self) -> StageCategory {
            StageCategory::Metadata
        }

        async fn execute(&self, _ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(StageOutput::empty())
        }
    }

    #[tokio::test]
    async fn test_concurrent_run_is_refused_while_first_completes() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let workflow = WorkflowDefinition::builder("slow").stage(SlowStage).build().unwrap();

        let first = h.run_with(&workflow, h.context());
        let second = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.run_with(&workflow, h.context()).await
        };
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(second, Err(ApkflowError::WorkspaceLocked(_))));
        let first = first.unwrap();
        assert!(first.is_success(), "{first}");
        assert_eq!(first.status_of("slow"), Some(StageStatus::Done));
        assert_eq!(h.events.events_of_type("pipeline.completed").len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_runs_from_scratch() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        assert!(h.run(&decompile()).await.is_success());

        let dir = h.workspaces.store().dir_of(&h.target.workspace_key());
        std::fs::write(dir.join(LEDGER_FILE), b"{\"schema_version\": 1, \"stages\": {").unwrap();
        h.bridge.clear_calls();
        h.tools.clear_calls();

        let report = h.run(&decompile()).await;
        assert!(report.is_success());
        assert!(report.recovered_ledger.is_some());
        assert_eq!(report.status_of("pull"), Some(StageStatus::Done));
        assert_eq!(h.bridge.calls_named("pull"), 1);
        assert_eq!(h.tools.calls_named("decompile"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let token = Arc::new(CancellationToken::new());
        token.cancel("interrupted by operator");

        let report = h
            .run_with(&decompile(), h.context().with_cancellation(token))
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Cancelled {
                reason: "interrupted by operator".to_string(),
                next_stage: Some("pull".to_string()),
            }
        );
        assert!(report.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(h.mutating_calls(), 0);
    }

    struct CancellingStage;

    #[async_trait]
    impl Stage for CancellingStage {
        fn name(&self) -> &str {
            "interrupt"
        }

        fn category(&self) -> StageCategory {
            StageCategory::Metadata
        }

        async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
            ctx.run().cancellation.cancel("ctrl-c");
            Ok(StageOutput::empty())
        }
    }

    #[tokio::test]
    async fn test_cancellation_honoured_at_stage_boundary() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let workflow = WorkflowDefinition::builder("cancel-midway")
            .stage(PullStage)
            .stage(CancellingStage)
            .stage(crate::workflows::DecompileStage::new(Default::default()))
            .build()
            .unwrap();

        let report = h.run(&workflow).await;
        assert!(matches!(
            &report.outcome,
            RunOutcome::Cancelled { next_stage: Some(next), .. } if next == "decompile"
        ));
        assert_eq!(report.status_of("interrupt"), Some(StageStatus::Done));
        assert_eq!(report.status_of("decompile"), Some(StageStatus::Pending));
        assert_eq!(report.completed_stages, vec!["pull", "interrupt"]);
        assert_eq!(h.tools.calls_named("decompile"), 0);
    }

    struct FlakyStage {
        cancel_first: bool,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Stage for FlakyStage {
        fn name(&self) -> &str {
            "flaky"
        }

        fn category(&self) -> StageCategory {
            StageCategory::Metadata
        }

        async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.cancel_first {
                ctx.run().cancellation.cancel("ctrl-c");
            }
            Err(StageToolFailureError::new("adb", "device busy").into())
        }
    }

    fn flaky(cancel_first: bool, attempts: &Arc<AtomicU32>) -> WorkflowDefinition {
        WorkflowDefinition::builder("flaky")
            .stage(FlakyStage {
                cancel_first,
                attempts: attempts.clone(),
            })
            .stage(PullStage)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let attempts = Arc::new(AtomicU32::new(0));

        let report = h.run(&flaky(true, &attempts)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(
            &report.outcome,
            RunOutcome::Cancelled { next_stage: Some(next), .. } if next == "flaky"
        ));
        assert_eq!(report.status_of("flaky"), Some(StageStatus::Failed));
        assert_eq!(report.status_of("pull"), Some(StageStatus::Pending));
        assert!(h.events.events_of_type("stage.retrying").is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_stops_retries() {
        let mut h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        let retry = RetryConfig::new()
            .with_base_delay_ms(300)
            .with_jitter(JitterStrategy::None);
        h.engine = PipelineEngine::new(retry, TimeoutConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let token = Arc::new(CancellationToken::new());
        let remote = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            remote.cancel("ctrl-c");
        });

        let report = h
            .run_with(&flaky(false, &attempts), h.context().with_cancellation(token))
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(report.stage("flaky").unwrap().attempts, 1);
        assert!(matches!(report.outcome, RunOutcome::Cancelled { .. }));
        assert_eq!(h.bridge.calls_named("pull"), 0);
    }

    #[test]
    fn test_malformed_workflow_is_rejected() {
        let err = WorkflowDefinition::builder("broken")
            .stage(PullStage)
            .stage(PullStage)
            .build()
            .unwrap_err();
        assert_eq!(err.stages, vec!["pull".to_string()]);
        assert!(matches!(ApkflowError::from(err), ApkflowError::WorkflowValidation(_)));
    }

    #[tokio::test]
    async fn test_event_order() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        h.run(&decompile()).await;

        assert_eq!(
            h.events.event_types(),
            vec![
                "pipeline.started",
                "stage.started",
                "stage.completed",
                "stage.skipped",
                "stage.started",
                "stage.completed",
                "pipeline.completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_failure_is_recorded_before_halt() {
        let h = Harness::new(target(single_package(PACKAGE)), FakeToolchain::new());
        h.bridge.fail_next("uninstall", install_failure().into());
        h.bridge.fail_next("uninstall", install_failure().into());
        h.bridge.fail_next("uninstall", install_failure().into());

        let report = h.run(&instrument()).await;
        assert_eq!(report.halting_error().unwrap().0, "uninstall-original");
        let snapshot = h
            .workspaces
            .store()
            .status(&h.target.workspace_key())
            .unwrap();
        let entry = &snapshot.stages["uninstall-original"];
        assert_eq!(entry.status, StageStatus::Failed);
        assert_eq!(entry.attempts, 3);
        assert!(entry.failure.as_deref().unwrap().contains("INSTALL_FAILED"));
        assert!(!snapshot.stages.contains_key("install-patched"));
        assert_eq!(h.bridge.calls_named("install"), 0);
    }
}
