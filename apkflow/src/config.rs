//! User configuration.
//!
//! Read from `~/.apkflow/config.json` (or an explicit path). Every field is
//! optional; a missing file yields defaults and an unreadable one is logged
//! and ignored.

use crate::core::StageCategory;
use crate::pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Directory under the home directory holding config, keystore and workspaces.
pub const APKFLOW_DIR: &str = ".apkflow";

/// Per-category time budgets, in seconds. `0` disables the limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutConfig {
    overrides: BTreeMap<StageCategory, f64>,
}

impl TimeoutConfig {
    /// Creates a config using the category defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the limit for one category. `None` disables it.
    #[must_use]
    pub fn with_limit(mut self, category: StageCategory, limit: Option<Duration>) -> Self {
        self.overrides
            .insert(category, limit.map_or(0.0, |d| d.as_secs_f64()));
        self
    }

    /// The limit for a category. `None` means unbounded.
    #[must_use]
    pub fn for_category(&self, category: StageCategory) -> Option<Duration> {
        match self.overrides.get(&category) {
            None => category.default_timeout(),
            Some(secs) if *secs > 0.0 && secs.is_finite() => Some(Duration::from_secs_f64(*secs)),
            Some(_) => None,
        }
    }
}

/// Keystore used to sign patched APKs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Keystore file; generated on first use when missing.
    pub path: Option<PathBuf>,
    /// Key alias.
    pub alias: String,
    /// Store password.
    pub store_password: String,
    /// Key password.
    pub key_password: String,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            alias: "androiddebugkey".to_string(),
            store_password: "android".to_string(),
            key_password: "android".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApkflowConfig {
    /// Where per-target workspaces live.
    pub workspace_root: Option<PathBuf>,
    /// APKEditor jar, or a directory containing `APKEditor.jar`.
    pub apkeditor_path: Option<PathBuf>,
    /// Android SDK root, for build-tools lookup.
    pub android_home: Option<PathBuf>,
    /// Explicit executable paths keyed by tool name (`adb`, `jadx`, ...).
    pub tools: BTreeMap<String, PathBuf>,
    /// Retry policy for stages.
    pub retry: RetryConfig,
    /// Per-category time budgets.
    pub timeouts: TimeoutConfig,
    /// Signing keystore.
    pub keystore: KeystoreConfig,
}

impl ApkflowConfig {
    /// `~/.apkflow`, if a home directory exists.
    #[must_use]
    pub fn home_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(APKFLOW_DIR))
    }

    /// Default config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        Self::home_dir().map(|dir| dir.join("config.json"))
    }

    /// Loads the config, falling back to defaults.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unparseable configuration");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable configuration");
                Self::default()
            }
        }
    }

    /// Sets the workspace root.
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the time budgets.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The effective workspace root.
    #[must_use]
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(|| {
            Self::home_dir()
                .unwrap_or_else(|| PathBuf::from(APKFLOW_DIR))
                .join("workspaces")
        })
    }

    /// The effective keystore path.
    #[must_use]
    pub fn keystore_path(&self) -> PathBuf {
        self.keystore.path.clone().unwrap_or_else(|| {
            Self::home_dir()
                .unwrap_or_else(|| PathBuf::from(APKFLOW_DIR))
                .join("debug.keystore")
        })
    }
}
