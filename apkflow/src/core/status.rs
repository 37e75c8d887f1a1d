//! Stage status and category enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What kind of work a stage does; selects its default time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCategory {
    /// Short device queries.
    Metadata,
    /// Moving APKs or dumps between host and device.
    Transfer,
    /// Local merge, patch, sign and decompile tools.
    Build,
    /// Install, uninstall and launch on the device.
    Device,
    /// Waits on a human; never timed out.
    Interactive,
}

impl StageCategory {
    /// Default time budget per attempt. `None` means unbounded.
    #[must_use]
    pub fn default_timeout(self) -> Option<Duration> {
        match self {
            Self::Metadata => Some(Duration::from_secs(30)),
            Self::Transfer => Some(Duration::from_secs(15 * 60)),
            Self::Build => Some(Duration::from_secs(30 * 60)),
            Self::Device => Some(Duration::from_secs(2 * 60)),
            Self::Interactive => None,
        }
    }
}

impl fmt::Display for StageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata => write!(f, "metadata"),
            Self::Transfer => write!(f, "transfer"),
            Self::Build => write!(f, "build"),
            Self::Device => write!(f, "device"),
            Self::Interactive => write!(f, "interactive"),
        }
    }
}

/// The status of a stage, in the ledger and in run reports.
///
/// `Skipped` only appears in reports; the ledger records skipped
/// (not applicable) stages as `Done`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet executed, or reset.
    #[default]
    Pending,
    /// Executing right now.
    Running,
    /// Completed successfully.
    Done,
    /// Not executed in this run.
    Skipped,
    /// Failed after exhausting retries or on a fatal error.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Done.to_string(), "done");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
        assert_eq!(StageStatus::default(), StageStatus::Pending);
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Done.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(!StageStatus::Failed.is_success());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Running).unwrap();
        assert_eq!(json, r#""running""#);
        let parsed: StageStatus = serde_json::from_str(r#""done""#).unwrap();
        assert_eq!(parsed, StageStatus::Done);
    }

    #[test]
    fn test_category_timeouts() {
        assert_eq!(
            StageCategory::Metadata.default_timeout(),
            Some(Duration::from_secs(30))
        );
        assert!(StageCategory::Interactive.default_timeout().is_none());
        assert_eq!(StageCategory::Build.to_string(), "build");
    }
}
