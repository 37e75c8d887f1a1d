//! The stage ledger: persisted stage outcomes of one workspace.
//!
//! Every write goes to `ledger.json.tmp` and is renamed over `ledger.json`, so
//! the file on disk is always a complete snapshot. A file that still fails to
//! parse is recovered as an empty ledger with a warning.

use super::WorkspaceKey;
use crate::core::{StageArtifact, StageStatus};
use crate::errors::{LedgerSchemaError, StageError, StageErrorKind, WorkspaceCorruptLedgerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Ledger file name inside a workspace directory.
pub const LEDGER_FILE: &str = "ledger.json";

/// Schema version written by this build.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// History records kept per ledger; older ones are dropped.
const HISTORY_LIMIT: usize = 256;

/// Recorded state of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Current status.
    pub status: StageStatus,
    /// Artifact produced by the last successful execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<StageArtifact>,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
    /// Failure message of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Failure classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<StageErrorKind>,
    /// Attempts used by the last execution.
    #[serde(default)]
    pub attempts: u32,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Run that wrote this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl LedgerEntry {
    /// A pending entry.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            artifact: None,
            updated_at: Utc::now(),
            failure: None,
            failure_kind: None,
            attempts: 0,
            note: None,
            run_id: None,
        }
    }

    /// An entry for a stage that is executing.
    #[must_use]
    pub fn running(run_id: Uuid) -> Self {
        Self {
            status: StageStatus::Running,
            run_id: Some(run_id),
            ..Self::pending()
        }
    }

    /// A successful entry.
    #[must_use]
    pub fn done(artifact: Option<StageArtifact>, attempts: u32, run_id: Uuid) -> Self {
        Self {
            status: StageStatus::Done,
            artifact,
            attempts,
            run_id: Some(run_id),
            ..Self::pending()
        }
    }

    /// A failed entry.
    #[must_use]
    pub fn failed(error: &StageError, attempts: u32, run_id: Uuid) -> Self {
        Self {
            status: StageStatus::Failed,
            failure: Some(error.to_string()),
            failure_kind: Some(error.kind()),
            attempts,
            run_id: Some(run_id),
            ..Self::pending()
        }
    }

    /// Attaches a note.
    #[must_use]
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    /// Returns true if the stage completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == StageStatus::Done
    }
}

/// One line of ledger history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// When it happened.
    pub at: DateTime<Utc>,
    /// `started`, `done`, `failed`, `cleaned`, `recovered`, ...
    pub event: String,
    /// Stage concerned, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Run concerned, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Extra detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LedgerEvent {
    /// A new record stamped now.
    #[must_use]
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            event: event.into(),
            stage: None,
            run_id: None,
            detail: None,
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn for_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Sets the run.
    #[must_use]
    pub fn in_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Sets the detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Stage name to entry mapping plus an append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLedger {
    /// Schema version of the file.
    pub schema_version: u32,
    /// Owning workspace.
    pub key: WorkspaceKey,
    /// Per-stage state.
    #[serde(default)]
    pub stages: BTreeMap<String, LedgerEntry>,
    /// Transitions, oldest first.
    #[serde(default)]
    pub history: Vec<LedgerEvent>,
}

/// How a ledger file was read.
#[derive(Debug)]
pub enum LedgerLoad {
    /// No ledger on disk yet.
    Missing(StageLedger),
    /// Parsed successfully.
    Loaded(StageLedger),
    /// Unreadable; replaced by an empty ledger.
    Recovered(StageLedger, WorkspaceCorruptLedgerError),
}

impl LedgerLoad {
    /// The usable ledger.
    #[must_use]
    pub fn into_ledger(self) -> StageLedger {
        match self {
            Self::Missing(ledger) | Self::Loaded(ledger) | Self::Recovered(ledger, _) => ledger,
        }
    }
}

impl StageLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new(key: WorkspaceKey) -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            key,
            stages: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Reads the ledger at `path`.
    ///
    /// Missing, empty and unparseable files yield an empty ledger. Valid JSON
    /// with an unknown schema is an error: overwriting it would lose data.
    pub fn load(path: &Path, key: &WorkspaceKey) -> Result<LedgerLoad, LedgerSchemaError> {
        let corrupt = |reason: String| -> Result<LedgerLoad, LedgerSchemaError> {
            let err = WorkspaceCorruptLedgerError {
                path: path.to_path_buf(),
                reason,
            };
            warn!(error = %err, "Recovering workspace with an empty ledger");
            let mut ledger = Self::new(key.clone());
            ledger.push_event(LedgerEvent::new("recovered").with_detail(err.reason.clone()));
            Ok(LedgerLoad::Recovered(ledger, err))
        };

        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(LedgerLoad::Missing(Self::new(key.clone())));
            }
            Err(e) => return corrupt(e.to_string()),
        };
        if raw.trim().is_empty() {
            return corrupt("file is empty".to_string());
        }
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => return corrupt(e.to_string()),
        };
        let Some(object) = value.as_object() else {
            return corrupt("top level is not an object".to_string());
        };

        let schema_error = |reason: String| LedgerSchemaError {
            path: path.to_path_buf(),
            reason,
        };
        let version = object
            .get("schema_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| schema_error("missing schema_version".to_string()))?;
        if version > u64::from(LEDGER_SCHEMA_VERSION) {
            return Err(schema_error(format!(
                "version {version} is newer than supported version {LEDGER_SCHEMA_VERSION}"
            )));
        }

        let mut ledger: Self =
            serde_json::from_value(value).map_err(|e| schema_error(e.to_string()))?;
        ledger.key = key.clone();
        ledger.schema_version = LEDGER_SCHEMA_VERSION;
        ledger.reset_interrupted();
        Ok(LedgerLoad::Loaded(ledger))
    }

    /// Turns `running` entries left by a crashed run back into `pending`.
    fn reset_interrupted(&mut self) {
        let mut interrupted = Vec::new();
        for (name, entry) in &mut self.stages {
            if entry.status == StageStatus::Running {
                *entry = LedgerEntry::pending().with_note(Some("interrupted".to_string()));
                interrupted.push(name.clone());
            }
        }
        for name in interrupted {
            warn!(stage = %name, "Stage was interrupted by an earlier run");
            self.push_event(LedgerEvent::new("interrupted").for_stage(name));
        }
    }

    /// Writes the ledger atomically.
    pub fn persist(&self, path: &Path) -> io::Result<()> {
        let tmp = temp_path(path);
        let bytes = serde_json::to_vec_pretty(self)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
    }

    /// Returns the entry of a stage.
    #[must_use]
    pub fn entry(&self, stage: &str) -> Option<&LedgerEntry> {
        self.stages.get(stage)
    }

    /// Status of a stage; unknown stages are pending.
    #[must_use]
    pub fn status(&self, stage: &str) -> StageStatus {
        self.entry(stage).map_or(StageStatus::Pending, |e| e.status)
    }

    /// Replaces the entry of a stage and records the transition.
    pub fn set(&mut self, stage: &str, entry: LedgerEntry) {
        let mut event = LedgerEvent::new(entry.status.to_string()).for_stage(stage);
        if let Some(run_id) = entry.run_id {
            event = event.in_run(run_id);
        }
        if let Some(failure) = &entry.failure {
            event = event.with_detail(failure.clone());
        }
        self.stages.insert(stage.to_string(), entry);
        self.push_event(event);
    }

    /// Appends a history record, dropping the oldest beyond the limit.
    pub fn push_event(&mut self, event: LedgerEvent) {
        self.history.push(event);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    /// Resets every stage to pending.
    pub fn reset(&mut self) {
        for entry in self.stages.values_mut() {
            *entry = LedgerEntry::pending();
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageToolFailureError;
    use pretty_assertions::assert_eq;

    fn key() -> WorkspaceKey {
        WorkspaceKey::new("com.example.app")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let load = StageLedger::load(&dir.path().join(LEDGER_FILE), &key()).unwrap();
        assert!(matches!(load, LedgerLoad::Missing(ref l) if l.stages.is_empty()));
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        let run = Uuid::new_v4();

        let mut ledger = StageLedger::new(key());
        ledger.set("pull", LedgerEntry::done(Some(StageArtifact::directory("/w/pull")), 1, run));
        let err: StageError = StageToolFailureError::new("APKEditor", "bad zip").into();
        ledger.set("merge", LedgerEntry::failed(&err, 3, run));
        ledger.persist(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let reloaded = StageLedger::load(&path, &key()).unwrap().into_ledger();
        assert_eq!(reloaded.stages, ledger.stages);
        assert_eq!(reloaded.status("merge"), StageStatus::Failed);
        assert_eq!(reloaded.status("sign"), StageStatus::Pending);
        assert_eq!(
            reloaded.entry("merge").unwrap().failure_kind,
            Some(StageErrorKind::ToolFailure)
        );
        assert_eq!(reloaded.history.len(), 2);
    }

    #[test]
    fn test_empty_and_truncated_files_recover() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);

        for content in ["", "   \n", "{\"schema_version\": 1, \"stages\": {\"pull\": {\"sta"] {
            fs::write(&path, content).unwrap();
            match StageLedger::load(&path, &key()).unwrap() {
                LedgerLoad::Recovered(ledger, err) => {
                    assert!(ledger.stages.is_empty());
                    assert_eq!(err.path, path);
                    assert_eq!(ledger.history[0].event, "recovered");
                }
                other => panic!("expected recovery, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        fs::write(&path, r#"{"schema_version": 7, "key": {"package": "x"}}"#).unwrap();

        let err = StageLedger::load(&path, &key()).unwrap_err();
        assert!(err.reason.contains("newer"));

        fs::write(&path, r#"{"stages": {}}"#).unwrap();
        assert!(StageLedger::load(&path, &key()).is_err());
    }

    #[test]
    fn test_running_entries_become_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        let mut ledger = StageLedger::new(key());
        ledger.set("pull", LedgerEntry::running(Uuid::new_v4()));
        ledger.persist(&path).unwrap();

        let reloaded = StageLedger::load(&path, &key()).unwrap().into_ledger();
        assert_eq!(reloaded.status("pull"), StageStatus::Pending);
        assert_eq!(reloaded.history.last().unwrap().event, "interrupted");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut ledger = StageLedger::new(key());
        for i in 0..(HISTORY_LIMIT + 10) {
            ledger.push_event(LedgerEvent::new(format!("e{i}")));
        }
        assert_eq!(ledger.history.len(), HISTORY_LIMIT);
        assert_eq!(ledger.history[0].event, "e10");
    }
}
