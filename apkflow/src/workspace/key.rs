//! Workspace keys and their directory names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a workspace: a package, optionally scoped to one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkspaceKey {
    /// Package name.
    pub package: String,
    /// Device id, when the workspace is device-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl WorkspaceKey {
    /// A package-scoped key.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            device: None,
        }
    }

    /// Scopes the key to a device.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Directory name under the workspace root.
    ///
    /// `<package>` or `<package>@<device>`; characters outside
    /// `[A-Za-z0-9._-]` become `_`.
    #[must_use]
    pub fn dir_name(&self) -> String {
        match &self.device {
            Some(device) => format!("{}@{}", sanitize(&self.package), sanitize(device)),
            None => sanitize(&self.package),
        }
    }
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Never produce `.` or `..`
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}@{device}", self.package),
            None => write!(f, "{}", self.package),
        }
    }
}
