//! Error types for apkflow.
//!
//! Resolution and workspace errors surface directly to the caller. Stage
//! failures are values ([`StageError`]) that the pipeline engine records in the
//! ledger before deciding whether to halt; they never escape a run as `Err`.

use crate::resolver::{Candidate, CandidateKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for apkflow operations.
#[derive(Debug, Error)]
pub enum ApkflowError {
    /// No matching or authorized device.
    #[error("{0}")]
    DeviceNotConnected(#[from] DeviceNotConnectedError),

    /// Several candidates matched and no selection was made.
    #[error("{0}")]
    Ambiguity(#[from] AmbiguityError),

    /// Nothing matched the query.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// An explicit selection was invalid.
    #[error("{0}")]
    Selection(#[from] SelectionError),

    /// The workspace is held by another run.
    #[error("{0}")]
    WorkspaceLocked(#[from] WorkspaceLockedError),

    /// The ledger was written by an incompatible schema.
    #[error("{0}")]
    LedgerSchema(#[from] LedgerSchemaError),

    /// A workflow definition is malformed.
    #[error("{0}")]
    WorkflowValidation(#[from] WorkflowValidationError),

    /// A device or tool adapter failed outside of a stage.
    #[error("{0}")]
    Adapter(#[from] AdapterError),

    /// The requested workflow name is not registered.
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ApkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Raised when no usable device matches the request.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DeviceNotConnectedError {
    /// Human-readable explanation.
    pub message: String,
    /// The requested device, if a hint was given.
    pub device: Option<String>,
}

impl DeviceNotConnectedError {
    /// Creates a new error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            device: None,
        }
    }

    /// Sets the requested device id.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// Raised when several candidates match and the caller must choose.
#[derive(Debug, Clone, Error)]
#[error("Multiple {kind}s match '{query}': {} found. Select one by index.", candidates.len())]
pub struct AmbiguityError {
    /// The original query.
    pub query: String,
    /// What is being disambiguated.
    pub kind: CandidateKind,
    /// Candidates in display order (1-based `index`).
    pub candidates: Vec<Candidate>,
}

/// Raised when nothing matches a query.
#[derive(Debug, Clone, Error)]
#[error("No package found matching: {query}")]
pub struct NotFoundError {
    /// The query that matched nothing.
    pub query: String,
}

impl NotFoundError {
    /// Creates a new not-found error.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

/// Raised for an invalid candidate selection.
#[derive(Debug, Clone, Error)]
pub enum SelectionError {
    /// The index is outside `1..=count`.
    #[error("Invalid selection {index}: expected 1-{count}")]
    OutOfRange {
        /// The rejected index.
        index: usize,
        /// Number of candidates.
        count: usize,
    },

    /// The operator quit the prompt.
    #[error("Selection aborted")]
    Aborted,

    /// Input could not be read.
    #[error("Failed to read selection: {0}")]
    Input(String),

    /// No human is available to answer.
    #[error("Operator input is unavailable in non-interactive mode")]
    NonInteractive,
}

/// Raised when a split set is missing parts. Never retryable.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Incomplete split set for {package}: retrieved {retrieved} of {reported} parts (missing: {})", missing.join(", "))]
pub struct IncompleteSplitSetError {
    /// The package.
    pub package: String,
    /// Parts the device reported.
    pub reported: usize,
    /// Parts actually retrieved.
    pub retrieved: usize,
    /// File names of the missing parts.
    pub missing: Vec<String>,
}

/// Raised when a stage attempt exceeds its time budget. Retryable.
#[derive(Debug, Clone, Error)]
#[error("{operation} timed out after {}s", timeout.as_secs_f64())]
pub struct StageTimeoutError {
    /// The timed-out operation (stage or command).
    pub operation: String,
    /// The enforced limit.
    pub timeout: Duration,
}

impl StageTimeoutError {
    /// Creates a new timeout error.
    #[must_use]
    pub fn new(operation: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            timeout,
        }
    }
}

/// Raised when an external tool exits unsuccessfully. Retryable.
#[derive(Debug, Clone, Error)]
#[error("{tool} failed{}: {message}", exit_code.map(|c| format!(" (exit {c})")).unwrap_or_default())]
pub struct StageToolFailureError {
    /// The tool or operation that failed.
    pub tool: String,
    /// Exit code, when the process ran to completion.
    pub exit_code: Option<i32>,
    /// Diagnostic text (usually stderr).
    pub message: String,
}

impl StageToolFailureError {
    /// Creates a new tool failure.
    #[must_use]
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            exit_code: None,
            message: message.into(),
        }
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

/// Raised when a required external tool cannot be located.
#[derive(Debug, Clone, Error)]
#[error("Required tool not found: {tool}{}", hint.as_ref().map(|h| format!("\nInstall: {h}")).unwrap_or_default())]
pub struct ToolNotFoundError {
    /// The tool name.
    pub tool: String,
    /// Installation hint.
    pub hint: Option<String>,
}

impl ToolNotFoundError {
    /// Creates a new tool-not-found error.
    #[must_use]
    pub fn new(tool: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            tool: tool.into(),
            hint: hint.map(str::to_string),
        }
    }
}

/// A ledger file that could not be parsed. Recovered as an empty ledger.
#[derive(Debug, Clone, Error)]
#[error("Corrupt ledger at {}: {reason}", path.display())]
pub struct WorkspaceCorruptLedgerError {
    /// The ledger path.
    pub path: PathBuf,
    /// Why it was rejected.
    pub reason: String,
}

/// Raised when another run holds the workspace lock.
#[derive(Debug, Clone, Error)]
#[error("Workspace {key} is locked by another run ({})", path.display())]
pub struct WorkspaceLockedError {
    /// The workspace key.
    pub key: String,
    /// The lock file.
    pub path: PathBuf,
}

/// Raised when a ledger declares a schema this build cannot read.
#[derive(Debug, Clone, Error)]
#[error("Ledger at {} has unsupported schema: {reason}", path.display())]
pub struct LedgerSchemaError {
    /// The ledger path.
    pub path: PathBuf,
    /// Details of the mismatch.
    pub reason: String,
}

/// Raised when install fails after the original app was removed.
///
/// The device has no version of the app installed; an operator must fix it.
#[derive(Debug, Clone, Error)]
#[error("Device {device} diverged: {package} was uninstalled but the patched APK failed to install ({cause}). Manual remediation required.")]
pub struct DeviceStateDivergedError {
    /// The package that is now missing.
    pub package: String,
    /// The device.
    pub device: String,
    /// The install failure.
    pub cause: String,
}

/// Raised when a workflow definition is malformed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WorkflowValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl WorkflowValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Failure reported by a device or tool adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The operation exceeded its timeout.
    #[error("{0}")]
    Timeout(#[from] StageTimeoutError),

    /// The tool ran and failed.
    #[error("{0}")]
    ToolFailure(#[from] StageToolFailureError),

    /// The tool is not installed.
    #[error("{0}")]
    ToolNotFound(#[from] ToolNotFoundError),
}

/// Classification of a stage failure, as recorded in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Timed out.
    Timeout,
    /// External tool failure.
    ToolFailure,
    /// Missing tool.
    ToolNotFound,
    /// Split set incomplete.
    IncompleteSplitSet,
    /// Device left without the app.
    DeviceStateDiverged,
    /// Non-retryable precondition failure.
    Fatal,
    /// Local filesystem failure.
    Io,
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ToolFailure => write!(f, "tool_failure"),
            Self::ToolNotFound => write!(f, "tool_not_found"),
            Self::IncompleteSplitSet => write!(f, "incomplete_split_set"),
            Self::DeviceStateDiverged => write!(f, "device_state_diverged"),
            Self::Fatal => write!(f, "fatal"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// A stage failure.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// Retryable timeout.
    #[error("{0}")]
    Timeout(#[from] StageTimeoutError),

    /// Retryable tool failure.
    #[error("{0}")]
    ToolFailure(#[from] StageToolFailureError),

    /// A tool is missing; retrying cannot help.
    #[error("{0}")]
    ToolNotFound(#[from] ToolNotFoundError),

    /// Fatal: merging would produce a corrupt artifact.
    #[error("{0}")]
    IncompleteSplitSet(#[from] IncompleteSplitSetError),

    /// Fatal and flagged for the operator.
    #[error("{0}")]
    DeviceStateDiverged(#[from] DeviceStateDivergedError),

    /// Fatal precondition failure.
    #[error("{0}")]
    Fatal(String),

    /// Local filesystem failure.
    #[error("I/O failure: {0}")]
    Io(String),
}

impl StageError {
    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns the classification.
    #[must_use]
    pub fn kind(&self) -> StageErrorKind {
        match self {
            Self::Timeout(_) => StageErrorKind::Timeout,
            Self::ToolFailure(_) => StageErrorKind::ToolFailure,
            Self::ToolNotFound(_) => StageErrorKind::ToolNotFound,
            Self::IncompleteSplitSet(_) => StageErrorKind::IncompleteSplitSet,
            Self::DeviceStateDiverged(_) => StageErrorKind::DeviceStateDiverged,
            Self::Fatal(_) => StageErrorKind::Fatal,
            Self::Io(_) => StageErrorKind::Io,
        }
    }

    /// Returns true if the engine may retry the stage.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ToolFailure(_))
    }

    /// Returns true if an operator must intervene before resuming.
    #[must_use]
    pub fn requires_operator(&self) -> bool {
        matches!(self, Self::DeviceStateDiverged(_))
    }
}

impl From<AdapterError> for StageError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Timeout(e) => Self::Timeout(e),
            AdapterError::ToolFailure(e) => Self::ToolFailure(e),
            AdapterError::ToolNotFound(e) => Self::ToolNotFound(e),
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("serialization: {err}"))
    }
}
