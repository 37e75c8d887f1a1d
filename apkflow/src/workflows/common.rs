//! Stages shared by every workflow: pull and merge.

use crate::core::{Applicability, StageArtifact, StageCategory, StageOutput};
use crate::errors::StageError;
use crate::pipeline::{Stage, StageContext};
use crate::split::{SplitSet, SplitSetDetector};
use crate::workspace::LedgerEntry;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Pull stage name.
pub const PULL: &str = "pull";
/// Merge stage name.
pub const MERGE: &str = "merge";

/// Split manifest written by [`PullStage`], relative to its stage directory.
pub const PARTS_MANIFEST: &str = "parts.json";
const PARTS_DIR: &str = "parts";
const MERGED_APK: &str = "merged.apk";

/// Reads the split manifest of the pull stage, recomputing completeness from disk.
pub fn read_manifest(pull_dir: &Path) -> Option<SplitSet> {
    let raw = std::fs::read_to_string(pull_dir.join(PARTS_MANIFEST)).ok()?;
    let set: SplitSet = serde_json::from_str(&raw).ok()?;
    Some(SplitSet::from_parts(set.package, set.parts))
}

/// The single APK later stages operate on: the merged APK, or the pulled base.
pub fn installable_apk(ctx: &StageContext<'_>) -> Result<PathBuf, StageError> {
    if let Some(merged) = ctx.artifact_of(MERGE) {
        if merged.exists() {
            return Ok(merged.path.clone());
        }
    }
    match ctx.artifact_of(PULL) {
        Some(pulled) if pulled.path.is_file() => Ok(pulled.path.clone()),
        Some(_) if ctx.target().package.is_split() => Err(StageError::fatal(
            "Split package has no merged APK; run the merge stage first",
        )),
        _ => Err(StageError::fatal("No pulled APK in workspace; run the pull stage first")),
    }
}

/// Pulls every APK of the package into `pull/parts/` and records the split manifest.
///
/// A split set with missing parts still completes, with a note; the merge
/// stage refuses it and the next run pulls again.
#[derive(Debug, Clone, Copy, Default)]
pub struct PullStage;

#[async_trait]
impl Stage for PullStage {
    fn name(&self) -> &str {
        PULL
    }

    fn category(&self) -> StageCategory {
        StageCategory::Transfer
    }

    fn is_satisfied(&self, ctx: &StageContext<'_>, entry: &LedgerEntry) -> bool {
        entry.is_done()
            && entry.artifact.as_ref().is_some_and(StageArtifact::exists)
            && read_manifest(&ctx.stage_dir()).is_some_and(|set| set.complete)
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let dir = ctx.ensure_stage_dir()?;
        let parts_dir = dir.join(PARTS_DIR);
        let package = ctx.package_name();

        let set = SplitSetDetector::new(ctx.device())
            .retrieve(ctx.device_id(), package, &parts_dir)
            .await?;
        if set.parts.is_empty() {
            return Err(StageError::fatal(format!(
                "{package} is not installed on {}",
                ctx.device_id()
            )));
        }
        std::fs::write(dir.join(PARTS_MANIFEST), serde_json::to_vec_pretty(&set)?)?;

        let artifact = match (set.is_split(), set.base_part().and_then(|p| p.local_path.clone())) {
            (false, Some(base)) => StageArtifact::file(base),
            _ => StageArtifact::directory(&parts_dir),
        };
        let output = StageOutput::with_artifact(artifact);
        if set.complete {
            info!(package, parts = set.reported(), "Pulled package");
            Ok(output.with_note(format!("{} part(s)", set.reported())))
        } else {
            warn!(package, missing = ?set.missing(), "Split set is incomplete");
            Ok(output.with_note(format!(
                "incomplete split set: {} of {} parts",
                set.retrieved(),
                set.reported()
            )))
        }
    }
}

/// Merges a complete split set into one installable APK.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStage;

#[async_trait]
impl Stage for MergeStage {
    fn name(&self) -> &str {
        MERGE
    }

    fn category(&self) -> StageCategory {
        StageCategory::Build
    }

    fn applicability(&self, ctx: &StageContext<'_>) -> Applicability {
        if ctx.target().package.is_split() {
            Applicability::Applies
        } else {
            Applicability::NotApplicable("package is not split".to_string())
        }
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let pull_dir = ctx.workspace().stage_dir(PULL);
        let set = read_manifest(&pull_dir)
            .ok_or_else(|| StageError::fatal("No split manifest in workspace; run the pull stage first"))?;
        set.require_complete()?;

        let dir = ctx.ensure_stage_dir()?;
        let merged = dir.join(MERGED_APK);
        if merged.exists() {
            std::fs::remove_file(&merged)?;
        }
        ctx.tools()
            .merge_splits(&pull_dir.join(PARTS_DIR), &merged)
            .await?;
        Ok(StageOutput::with_artifact(StageArtifact::file(merged))
            .with_note(format!("merged {} parts", set.reported())))
    }
}
