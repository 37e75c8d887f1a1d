//! On-disk workspaces: one directory per key holding the ledger and one
//! subdirectory per artifact-producing stage.

use super::ledger::{LedgerEntry, LedgerEvent, LedgerLoad, StageLedger, LEDGER_FILE};
use super::lock::{WorkspaceLock, LOCK_FILE};
use super::WorkspaceKey;
use crate::core::StageResult;
use crate::errors::{ApkflowError, WorkspaceCorruptLedgerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// An opened workspace. The engine borrows it for the length of a run.
#[derive(Debug)]
pub struct Workspace {
    key: WorkspaceKey,
    dir: PathBuf,
    ledger: StageLedger,
    recovered: Option<WorkspaceCorruptLedgerError>,
}

impl Workspace {
    fn load(key: WorkspaceKey, dir: PathBuf) -> Result<Self, ApkflowError> {
        fs::create_dir_all(&dir)?;
        let (ledger, recovered) = match StageLedger::load(&dir.join(LEDGER_FILE), &key)? {
            LedgerLoad::Recovered(ledger, err) => (ledger, Some(err)),
            other => (other.into_ledger(), None),
        };
        Ok(Self {
            key,
            dir,
            ledger,
            recovered,
        })
    }

    /// The key.
    #[must_use]
    pub fn key(&self) -> &WorkspaceKey {
        &self.key
    }

    /// The workspace directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The ledger as last loaded or written.
    #[must_use]
    pub fn ledger(&self) -> &StageLedger {
        &self.ledger
    }

    /// Set when the ledger on disk was unreadable and replaced by an empty one.
    #[must_use]
    pub fn recovered(&self) -> Option<&WorkspaceCorruptLedgerError> {
        self.recovered.as_ref()
    }

    /// Path of the ledger file.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    /// Directory reserved for a stage's artifacts.
    #[must_use]
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.dir.join(stage)
    }

    /// Takes the exclusive workspace lock.
    pub fn lock(&self) -> Result<WorkspaceLock, ApkflowError> {
        WorkspaceLock::acquire(&self.dir, &self.key.to_string())
    }

    /// Re-reads the ledger from disk.
    pub fn reload(&mut self) -> Result<(), ApkflowError> {
        let reloaded = Self::load(self.key.clone(), self.dir.clone())?;
        self.ledger = reloaded.ledger;
        if reloaded.recovered.is_some() {
            self.recovered = reloaded.recovered;
        }
        Ok(())
    }

    /// Returns true if `stage` is done and its artifact, if any, still exists.
    #[must_use]
    pub fn is_satisfied(&self, stage: &str) -> bool {
        self.ledger
            .entry(stage)
            .is_some_and(|entry| entry.is_done() && entry.artifact.as_ref().map_or(true, |a| a.exists()))
    }

    /// Writes a stage entry and persists the ledger.
    pub fn record(&mut self, stage: &str, entry: LedgerEntry) -> io::Result<()> {
        self.ledger.set(stage, entry);
        self.ledger.persist(&self.ledger_path())
    }

    /// Records the outcome of a stage.
    ///
    /// `Skipped` results are stored as done with the skip reason as note.
    pub fn record_result(&mut self, stage: &str, result: &StageResult, run_id: Uuid) -> io::Result<()> {
        let entry = match result {
            StageResult::Done {
                artifact,
                note,
                attempts,
            } => LedgerEntry::done(artifact.clone(), *attempts, run_id).with_note(note.clone()),
            StageResult::Skipped { reason, artifact } => {
                LedgerEntry::done(artifact.clone(), 0, run_id).with_note(Some(reason.clone()))
            }
            StageResult::Failed { error, attempts } => LedgerEntry::failed(error, *attempts, run_id),
        };
        self.record(stage, entry)
    }

    /// Appends a history record and persists the ledger.
    pub fn log_event(&mut self, event: LedgerEvent) -> io::Result<()> {
        self.ledger.push_event(event);
        self.ledger.persist(&self.ledger_path())
    }

    /// A serialisable view of the ledger.
    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            key: self.key.clone(),
            dir: self.dir.clone(),
            exists: true,
            schema_version: self.ledger.schema_version,
            stages: self.ledger.stages.clone(),
            history: self.ledger.history.clone(),
            recovered: self.recovered.as_ref().map(ToString::to_string),
        }
    }
}

/// Read-only view of a workspace ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Workspace key.
    pub key: WorkspaceKey,
    /// Workspace directory.
    pub dir: PathBuf,
    /// False if the workspace was never created.
    pub exists: bool,
    /// Ledger schema version.
    pub schema_version: u32,
    /// Per-stage entries.
    pub stages: BTreeMap<String, LedgerEntry>,
    /// Transition history, oldest first.
    pub history: Vec<LedgerEvent>,
    /// Set if the ledger was recovered from a corrupt file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered: Option<String>,
}

impl LedgerSnapshot {
    /// Names of completed stages.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|(_, e)| e.is_done())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// What `clean` removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    /// Workspace key.
    pub key: WorkspaceKey,
    /// True if the whole workspace, ledger included, was deleted.
    pub forced: bool,
    /// Removed paths.
    pub removed: Vec<PathBuf>,
    /// Stages reset to pending.
    pub reset_stages: Vec<String>,
}

/// Root directory holding all workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Creates a store rooted at `root`. Nothing is created until a workspace is opened.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a workspace.
    #[must_use]
    pub fn dir_of(&self, key: &WorkspaceKey) -> PathBuf {
        self.root.join(key.dir_name())
    }

    /// Opens a workspace, creating it if absent.
    ///
    /// A missing or corrupt ledger opens as "no stages completed".
    pub fn open(&self, key: &WorkspaceKey) -> Result<Workspace, ApkflowError> {
        let workspace = Workspace::load(key.clone(), self.dir_of(key))?;
        debug!(
            workspace = %key,
            stages = workspace.ledger.stages.len(),
            recovered = workspace.recovered.is_some(),
            "Opened workspace"
        );
        Ok(workspace)
    }

    /// Records a stage outcome outside of an engine run.
    pub fn record_stage(
        &self,
        key: &WorkspaceKey,
        stage: &str,
        result: &StageResult,
    ) -> Result<(), ApkflowError> {
        let mut workspace = self.open(key)?;
        let _lock = workspace.lock()?;
        workspace.reload()?;
        workspace.record_result(stage, result, Uuid::new_v4())?;
        Ok(())
    }

    /// Returns true if `stage` is done and its artifact still exists.
    pub fn is_satisfied(&self, key: &WorkspaceKey, stage: &str) -> Result<bool, ApkflowError> {
        if !self.dir_of(key).is_dir() {
            return Ok(false);
        }
        Ok(self.open(key)?.is_satisfied(stage))
    }

    /// Returns the ledger of a workspace without creating it.
    pub fn status(&self, key: &WorkspaceKey) -> Result<LedgerSnapshot, ApkflowError> {
        let dir = self.dir_of(key);
        if !dir.is_dir() {
            let empty = StageLedger::new(key.clone());
            return Ok(LedgerSnapshot {
                key: key.clone(),
                dir,
                exists: false,
                schema_version: empty.schema_version,
                stages: empty.stages,
                history: empty.history,
                recovered: None,
            });
        }
        Ok(self.open(key)?.snapshot())
    }

    /// Removes stage artifacts and resets the ledger to pending.
    ///
    /// History is kept unless `force`, which deletes the workspace entirely.
    pub fn clean(&self, key: &WorkspaceKey, force: bool) -> Result<CleanReport, ApkflowError> {
        let dir = self.dir_of(key);
        let mut report = CleanReport {
            key: key.clone(),
            forced: force,
            removed: Vec::new(),
            reset_stages: Vec::new(),
        };
        if !dir.is_dir() {
            return Ok(report);
        }

        let mut workspace = self.open(key)?;
        let lock = workspace.lock()?;
        workspace.reload()?;

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name == LOCK_FILE || (!force && name == LEDGER_FILE) {
                continue;
            }
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            report.removed.push(path);
        }

        report.reset_stages = workspace.ledger.stages.keys().cloned().collect();
        if force {
            drop(lock);
            fs::remove_dir_all(&dir)?;
            report.removed.push(dir);
            info!(workspace = %key, "Workspace deleted");
        } else {
            workspace.ledger.reset();
            workspace.log_event(
                LedgerEvent::new("cleaned")
                    .with_detail(format!("{} paths removed", report.removed.len())),
            )?;
            info!(workspace = %key, removed = report.removed.len(), "Workspace cleaned");
        }
        report.removed.sort();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StageArtifact, StageStatus};
    use crate::errors::{StageError, StageToolFailureError};
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, WorkspaceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path().join("workspaces"));
        (dir, store)
    }

    #[test]
    fn test_open_creates_directory() {
        let (_tmp, store) = store();
        let key = WorkspaceKey::new("com.example.app");
        let ws = store.open(&key).unwrap();
        assert!(ws.dir().is_dir());
        assert!(ws.ledger().stages.is_empty());
        assert!(ws.recovered().is_none());
    }

    #[test]
    fn test_corrupt_ledger_opens_with_all_stages_pending() {
        let (_tmp, store) = store();
        let key = WorkspaceKey::new("com.example.app");
        let dir = store.dir_of(&key);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(LEDGER_FILE), "{\"schema_version\": 1, \"stag").unwrap();

        let ws = store.open(&key).unwrap();
        assert!(ws.recovered().is_some());
        for stage in ["pull", "merge", "sign"] {
            assert_eq!(ws.ledger().status(stage), StageStatus::Pending);
            assert!(!ws.is_satisfied(stage));
        }

        fs::write(dir.join(LEDGER_FILE), "").unwrap();
        let snapshot = store.status(&key).unwrap();
        assert!(snapshot.recovered.is_some());
        assert!(snapshot.completed_stages().is_empty());
    }

    #[test]
    fn test_record_and_is_satisfied() {
        let (_tmp, store) = store();
        let key = WorkspaceKey::new("com.example.app");
        let ws = store.open(&key).unwrap();
        let artifact = ws.stage_dir("merge").join("merged.apk");
        fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        fs::write(&artifact, b"apk").unwrap();

        store
            .record_stage(
                &key,
                "merge",
                &StageResult::Done {
                    artifact: Some(StageArtifact::file(&artifact)),
                    note: None,
                    attempts: 1,
                },
            )
            .unwrap();
        assert!(store.is_satisfied(&key, "merge").unwrap());

        // A vanished artifact no longer satisfies the stage
        fs::remove_file(&artifact).unwrap();
        assert!(!store.is_satisfied(&key, "merge").unwrap());

        let err: StageError = StageToolFailureError::new("apksigner", "bad key").into();
        store
            .record_stage(&key, "sign", &StageResult::Failed { error: err, attempts: 3 })
            .unwrap();
        assert!(!store.is_satisfied(&key, "sign").unwrap());
        assert_eq!(store.status(&key).unwrap().stages["sign"].attempts, 3);
    }

    #[test]
    fn test_status_of_unknown_workspace() {
        let (_tmp, store) = store();
        let key = WorkspaceKey::new("com.never.opened");
        let snapshot = store.status(&key).unwrap();
        assert!(!snapshot.exists);
        assert!(!store.dir_of(&key).exists());
        assert!(!store.is_satisfied(&key, "pull").unwrap());
    }

    #[test]
    fn test_clean_keeps_history() {
        let (_tmp, store) = store();
        let key = WorkspaceKey::new("com.example.app");
        let mut ws = store.open(&key).unwrap();
        let pull_dir = ws.stage_dir("pull");
        fs::create_dir_all(&pull_dir).unwrap();
        fs::write(pull_dir.join("base.apk"), b"apk").unwrap();
        ws.record("pull", LedgerEntry::done(Some(StageArtifact::directory(&pull_dir)), 1, Uuid::new_v4()))
            .unwrap();

        let report = store.clean(&key, false).unwrap();
        assert_eq!(report.removed, vec![pull_dir.clone()]);
        assert_eq!(report.reset_stages, vec!["pull".to_string()]);
        assert!(!pull_dir.exists());

        let snapshot = store.status(&key).unwrap();
        assert_eq!(snapshot.stages["pull"].status, StageStatus::Pending);
        assert_eq!(snapshot.history.last().unwrap().event, "cleaned");
        assert!(snapshot.history.iter().any(|e| e.event == "done"));
    }

    #[test]
    fn test_force_clean_deletes_workspace() {
        let (_tmp, store) = store();
        let key = WorkspaceKey::new("com.example.app");
        let mut ws = store.open(&key).unwrap();
        ws.record("pull", LedgerEntry::done(None, 1, Uuid::new_v4())).unwrap();

        let report = store.clean(&key, true).unwrap();
        assert!(report.forced);
        assert!(!store.dir_of(&key).exists());
        assert!(!store.status(&key).unwrap().exists);
    }

    #[test]
    fn test_clean_requires_lock() {
        let (_tmp, store) = store();
        let key = WorkspaceKey::new("com.example.app");
        let ws = store.open(&key).unwrap();
        let _held = ws.lock().unwrap();

        assert!(matches!(
            store.clean(&key, false),
            Err(ApkflowError::WorkspaceLocked(_))
        ));
    }
}
