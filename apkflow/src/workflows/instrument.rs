//! The instrumentation workflow.
//!
//! pull → merge → validate-framework → patch → sign → uninstall-original →
//! install-patched → launch-or-wait → dump → parse-dump
//!
//! Uninstall and install form one unit: an install failure after the original
//! app was removed is reported as [`DeviceStateDivergedError`] and is never
//! retried automatically.

use super::common::{installable_apk, MergeStage, PullStage};
use super::dump::parse_dump;
use crate::core::{Applicability, StageArtifact, StageCategory, StageOutput};
use crate::device::UninstallOutcome;
use crate::errors::{
    DeviceStateDivergedError, SelectionError, StageError, StageToolFailureError,
    WorkflowValidationError,
};
use crate::pipeline::{Stage, StageContext, WorkflowDefinition};
use crate::tools::{detect_frameworks, Framework};
use crate::workspace::LedgerEntry;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Validate stage name.
pub const VALIDATE: &str = "validate-framework";
/// Patch stage name.
pub const PATCH: &str = "patch";
/// Sign stage name.
pub const SIGN: &str = "sign";
/// Uninstall stage name.
pub const UNINSTALL: &str = "uninstall-original";
/// Install stage name.
pub const INSTALL: &str = "install-patched";
/// Launch stage name.
pub const LAUNCH: &str = "launch-or-wait";
/// Dump stage name.
pub const DUMP: &str = "dump";
/// Parse stage name.
pub const PARSE: &str = "parse-dump";

const DUMP_FILE: &str = "dump.dart";
const PARSED_FILE: &str = "dump.json";

/// Options of one instrumentation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Skip the Flutter check.
    pub force_skip_validation: bool,
    /// Start the app with the launcher intent after install.
    pub auto_launch: bool,
    /// Ask the operator to start the app instead of launching it.
    pub wait_for_manual_start: bool,
    /// Stop after install: no launch, dump or parse.
    pub skip_dump: bool,
    /// Wait after auto-launch before reading the dump.
    pub launch_settle: Duration,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            force_skip_validation: false,
            auto_launch: true,
            wait_for_manual_start: false,
            skip_dump: false,
            launch_settle: Duration::from_secs(8),
        }
    }
}

impl InstrumentOptions {
    /// Sets `force_skip_validation`.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force_skip_validation = force;
        self
    }

    /// Sets `skip_dump`.
    #[must_use]
    pub fn with_skip_dump(mut self, skip: bool) -> Self {
        self.skip_dump = skip;
        self
    }

    /// Sets `wait_for_manual_start`.
    #[must_use]
    pub fn with_manual_start(mut self, wait: bool) -> Self {
        self.wait_for_manual_start = wait;
        self
    }

    /// Sets `auto_launch`.
    #[must_use]
    pub fn with_auto_launch(mut self, launch: bool) -> Self {
        self.auto_launch = launch;
        self
    }

    /// Sets the settle delay.
    #[must_use]
    pub fn with_launch_settle(mut self, settle: Duration) -> Self {
        self.launch_settle = settle;
        self
    }
}

/// Builds the instrumentation workflow.
pub fn instrument_workflow(
    options: &InstrumentOptions,
) -> Result<WorkflowDefinition, WorkflowValidationError> {
    let skip_dump = options.skip_dump;
    WorkflowDefinition::builder("instrument")
        .stage(PullStage)
        .stage(MergeStage)
        .stage(ValidateFrameworkStage {
            force: options.force_skip_validation,
        })
        .stage(PatchStage)
        .stage(SignStage)
        .stage(UninstallStage)
        .stage(InstallStage)
        .stage(LaunchStage {
            options: options.clone(),
        })
        .stage(DumpStage { skip: skip_dump })
        .stage(ParseDumpStage { skip: skip_dump })
        .build()
}

fn skipped_dump() -> Applicability {
    Applicability::NotApplicable("dump skipped by option".to_string())
}

/// A `done` entry backed by an artifact; entries recorded while the stage was
/// not applicable have none.
fn produced_artifact(entry: &LedgerEntry) -> bool {
    entry.is_done() && entry.artifact.as_ref().is_some_and(StageArtifact::exists)
}

const FLUTTER_NOTE: &str = "Flutter detected";

/// Fails unless the APK contains the Flutter engine.
#[derive(Debug, Clone, Copy)]
pub struct ValidateFrameworkStage {
    force: bool,
}

#[async_trait]
impl Stage for ValidateFrameworkStage {
    fn name(&self) -> &str {
        VALIDATE
    }

    fn category(&self) -> StageCategory {
        StageCategory::Build
    }

    fn applicability(&self, _ctx: &StageContext<'_>) -> Applicability {
        if self.force {
            Applicability::NotApplicable("validation skipped by force flag".to_string())
        } else {
            Applicability::Applies
        }
    }

    /// A forced run leaves no proof of validation behind.
    fn is_satisfied(&self, _ctx: &StageContext<'_>, entry: &LedgerEntry) -> bool {
        entry.is_done() && entry.note.as_deref().is_some_and(|n| n.starts_with(FLUTTER_NOTE))
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let apk = installable_apk(ctx)?;
        let entries = ctx.tools().archive_entries(&apk).await?;
        let found = detect_frameworks(&entries);

        if let Some(flutter) = found.iter().find(|m| m.framework == Framework::Flutter) {
            return Ok(StageOutput::empty().with_note(format!(
                "{FLUTTER_NOTE}: {}",
                flutter.evidence.join(", ")
            )));
        }
        let detected = if found.is_empty() {
            "no known framework".to_string()
        } else {
            found
                .iter()
                .map(|m| m.framework.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        Err(StageError::fatal(format!(
            "{} is not a Flutter app (detected: {detected}); use --force to patch anyway",
            ctx.package_name()
        )))
    }
}

/// Patches the APK with reflutter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchStage;

#[async_trait]
impl Stage for PatchStage {
    fn name(&self) -> &str {
        PATCH
    }

    fn category(&self) -> StageCategory {
        StageCategory::Build
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let apk = installable_apk(ctx)?;
        let work = ctx.ensure_stage_dir()?;
        let patched = ctx.tools().patch(&apk, &work).await?;
        Ok(StageOutput::with_artifact(StageArtifact::file(patched)))
    }
}

/// Aligns and signs the patched APK with the debug keystore.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignStage;

#[async_trait]
impl Stage for SignStage {
    fn name(&self) -> &str {
        SIGN
    }

    fn category(&self) -> StageCategory {
        StageCategory::Build
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let patched = ctx
            .artifact_of(PATCH)
            .filter(|a| a.exists())
            .ok_or_else(|| StageError::fatal("No patched APK in workspace; run the patch stage first"))?;
        let dir = ctx.ensure_stage_dir()?;
        let signed = dir.join(format!("{}-patched-signed.apk", ctx.package_name()));
        ctx.tools().sign(&patched.path, &signed).await?;
        Ok(StageOutput::with_artifact(StageArtifact::file(signed)))
    }
}

/// Removes the original app; "not installed" counts as success.
#[derive(Debug, Clone, Copy, Default)]
pub struct UninstallStage;

#[async_trait]
impl Stage for UninstallStage {
    fn name(&self) -> &str {
        UNINSTALL
    }

    fn category(&self) -> StageCategory {
        StageCategory::Device
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let outcome = ctx.device().uninstall(ctx.device_id(), ctx.package_name()).await?;
        let note = match outcome {
            UninstallOutcome::Removed => "original app removed",
            UninstallOutcome::NotInstalled => "original app was not installed",
        };
        Ok(StageOutput::empty().with_note(note))
    }
}

/// Installs the signed APK.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallStage;

#[async_trait]
impl Stage for InstallStage {
    fn name(&self) -> &str {
        INSTALL
    }

    fn category(&self) -> StageCategory {
        StageCategory::Device
    }

    fn retries_allowed(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let signed = ctx
            .artifact_of(SIGN)
            .filter(|a| a.exists())
            .ok_or_else(|| StageError::fatal("No signed APK in workspace; run the sign stage first"))?;

        match ctx.device().install(ctx.device_id(), &signed.path).await {
            Ok(()) => Ok(StageOutput::empty().with_note("patched app installed")),
            Err(e) if ctx.entry_of(UNINSTALL).is_some_and(LedgerEntry::is_done) => {
                warn!(
                    package = ctx.package_name(),
                    device = ctx.device_id(),
                    error = %e,
                    "Install failed after uninstall; device has no version of the app"
                );
                Err(DeviceStateDivergedError {
                    package: ctx.package_name().to_string(),
                    device: ctx.device_id().to_string(),
                    cause: e.to_string(),
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Gets the instrumented app running, by launcher intent or by the operator.
#[derive(Debug, Clone)]
pub struct LaunchStage {
    options: InstrumentOptions,
}

impl LaunchStage {
    fn ask_operator(ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let message = format!(
            "Start {} on {} and wait for it to load.",
            ctx.package_name(),
            ctx.device_id()
        );
        match ctx.prompt().confirm(&message) {
            Ok(()) => Ok(StageOutput::empty().with_note("started by operator")),
            Err(SelectionError::NonInteractive) => Err(StageError::fatal(
                "Manual start requested but no operator is available",
            )),
            Err(e) => Err(StageError::fatal(format!("Manual start not confirmed: {e}"))),
        }
    }
}

#[async_trait]
impl Stage for LaunchStage {
    fn name(&self) -> &str {
        LAUNCH
    }

    fn category(&self) -> StageCategory {
        StageCategory::Interactive
    }

    fn applicability(&self, _ctx: &StageContext<'_>) -> Applicability {
        if self.options.skip_dump {
            skipped_dump()
        } else if !self.options.auto_launch && !self.options.wait_for_manual_start {
            Applicability::NotApplicable("launch disabled".to_string())
        } else {
            Applicability::Applies
        }
    }

    /// The app only needs to be running until the dump has been read.
    fn is_satisfied(&self, ctx: &StageContext<'_>, entry: &LedgerEntry) -> bool {
        entry.is_done() && ctx.entry_of(DUMP).is_some_and(produced_artifact)
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        if self.options.wait_for_manual_start {
            return Self::ask_operator(ctx);
        }

        match ctx.device().launch(ctx.device_id(), ctx.package_name()).await {
            Ok(()) => {
                info!(
                    package = ctx.package_name(),
                    settle_secs = self.options.launch_settle.as_secs_f64(),
                    "App launched, waiting for it to settle"
                );
                tokio::time::sleep(self.options.launch_settle).await;
                Ok(StageOutput::empty().with_note("auto-launched"))
            }
            Err(e) if ctx.prompt().is_interactive() => {
                warn!(error = %e, "Auto-launch failed, asking the operator");
                Self::ask_operator(ctx)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads the dump the instrumented app wrote to its data directory.
#[derive(Debug, Clone, Copy)]
pub struct DumpStage {
    skip: bool,
}

#[async_trait]
impl Stage for DumpStage {
    fn name(&self) -> &str {
        DUMP
    }

    fn category(&self) -> StageCategory {
        StageCategory::Transfer
    }

    fn applicability(&self, _ctx: &StageContext<'_>) -> Applicability {
        if self.skip {
            skipped_dump()
        } else {
            Applicability::Applies
        }
    }

    fn is_satisfied(&self, _ctx: &StageContext<'_>, entry: &LedgerEntry) -> bool {
        produced_artifact(entry)
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let content = ctx.device().read_dump(ctx.device_id(), ctx.package_name()).await?;
        if content.trim().is_empty() {
            return Err(StageToolFailureError::new(
                "dump",
                "dump is empty; the app must run at least once after installation",
            )
            .into());
        }
        let path = ctx.ensure_stage_dir()?.join(DUMP_FILE);
        std::fs::write(&path, content.as_bytes())?;
        Ok(StageOutput::with_artifact(StageArtifact::file(path))
            .with_note(format!("{} bytes", content.len())))
    }
}

/// Converts the raw dump to JSON. Best effort: an unstructured dump keeps only
/// the raw artifact and still succeeds.
#[derive(Debug, Clone, Copy)]
pub struct ParseDumpStage {
    skip: bool,
}

#[async_trait]
impl Stage for ParseDumpStage {
    fn name(&self) -> &str {
        PARSE
    }

    fn category(&self) -> StageCategory {
        StageCategory::Metadata
    }

    fn applicability(&self, _ctx: &StageContext<'_>) -> Applicability {
        if self.skip {
            skipped_dump()
        } else {
            Applicability::Applies
        }
    }

    fn is_satisfied(&self, _ctx: &StageContext<'_>, entry: &LedgerEntry) -> bool {
        produced_artifact(entry)
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let raw_artifact = ctx
            .artifact_of(DUMP)
            .filter(|a| a.exists())
            .cloned()
            .ok_or_else(|| StageError::fatal("No raw dump in workspace; run the dump stage first"))?;
        let raw = String::from_utf8_lossy(&std::fs::read(&raw_artifact.path)?).into_owned();

        match parse_dump(&raw) {
            Some(parsed) => {
                let path = ctx.ensure_stage_dir()?.join(PARSED_FILE);
                std::fs::write(&path, serde_json::to_vec_pretty(&parsed)?)?;
                Ok(StageOutput::with_artifact(StageArtifact::file(path))
                    .with_note(format!("{} entries", parsed.len())))
            }
            None => {
                warn!(path = %raw_artifact.path.display(), "Dump is not structured; keeping raw dump only");
                Ok(StageOutput::with_artifact(raw_artifact)
                    .with_note("dump is not structured; raw dump kept"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_instrument_stage_order() {
        let workflow = instrument_workflow(&InstrumentOptions::default()).unwrap();
        assert_eq!(
            workflow.stage_names(),
            vec![
                "pull",
                "merge",
                VALIDATE,
                PATCH,
                SIGN,
                UNINSTALL,
                INSTALL,
                LAUNCH,
                DUMP,
                PARSE
            ]
        );
    }

    #[test]
    fn test_install_is_never_retried() {
        assert!(!InstallStage.retries_allowed());
        assert!(UninstallStage.retries_allowed());
    }

    #[test]
    fn test_options_builders() {
        let opts = InstrumentOptions::default()
            .with_force(true)
            .with_skip_dump(true)
            .with_launch_settle(Duration::ZERO);
        assert!(opts.force_skip_validation);
        assert!(opts.skip_dump);
        assert!(opts.auto_launch);
        assert_eq!(opts.launch_settle, Duration::ZERO);
    }
}
