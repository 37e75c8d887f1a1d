//! Split-set detection and retrieval.
//!
//! A package is split when the device reports more than one code path. A
//! [`SplitSet`] is complete only if every reported part is present locally;
//! merging is refused otherwise.

use crate::device::DeviceBridge;
use crate::errors::{AdapterError, IncompleteSplitSetError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One APK of a package, as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPart {
    /// Path on the device.
    pub remote_path: String,
    /// File name, unique within the package.
    pub file_name: String,
    /// Local copy, if retrieved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl SplitPart {
    /// A part not yet retrieved.
    #[must_use]
    pub fn reported(remote_path: impl Into<String>) -> Self {
        let remote_path = remote_path.into();
        let file_name = remote_path
            .rsplit('/')
            .next()
            .unwrap_or(remote_path.as_str())
            .to_string();
        Self {
            remote_path,
            file_name,
            local_path: None,
        }
    }

    /// Returns true if the part is present locally.
    #[must_use]
    pub fn is_retrieved(&self) -> bool {
        self.local_path.as_deref().is_some_and(Path::is_file)
    }
}

/// The parts of one package and whether all of them are here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSet {
    /// Package name.
    pub package: String,
    /// Parts in device order, base first.
    pub parts: Vec<SplitPart>,
    /// True iff every reported part was retrieved.
    pub complete: bool,
}

impl SplitSet {
    /// Builds a set from reported remote paths and the files present in `parts_dir`.
    #[must_use]
    pub fn observe(package: impl Into<String>, reported: &[String], parts_dir: &Path) -> Self {
        let parts: Vec<SplitPart> = reported
            .iter()
            .map(|remote| {
                let mut part = SplitPart::reported(remote.as_str());
                let local = parts_dir.join(&part.file_name);
                if local.is_file() {
                    part.local_path = Some(local);
                }
                part
            })
            .collect();
        Self::from_parts(package, parts)
    }

    /// Builds a set from parts, computing completeness.
    #[must_use]
    pub fn from_parts(package: impl Into<String>, parts: Vec<SplitPart>) -> Self {
        let complete = !parts.is_empty() && parts.iter().all(SplitPart::is_retrieved);
        Self {
            package: package.into(),
            parts,
            complete,
        }
    }

    /// Number of parts the device reported.
    #[must_use]
    pub fn reported(&self) -> usize {
        self.parts.len()
    }

    /// Number of parts present locally.
    #[must_use]
    pub fn retrieved(&self) -> usize {
        self.parts.iter().filter(|p| p.is_retrieved()).count()
    }

    /// Returns true if the package ships more than one APK.
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.parts.len() > 1
    }

    /// File names of parts that are not present.
    #[must_use]
    pub fn missing(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter(|p| !p.is_retrieved())
            .map(|p| p.file_name.clone())
            .collect()
    }

    /// The base part.
    #[must_use]
    pub fn base_part(&self) -> Option<&SplitPart> {
        self.parts.first()
    }

    /// Re-checks the files on disk and fails unless every part is present.
    pub fn require_complete(&self) -> Result<(), IncompleteSplitSetError> {
        let missing = self.missing();
        if self.complete && missing.is_empty() {
            return Ok(());
        }
        Err(IncompleteSplitSetError {
            package: self.package.clone(),
            reported: self.reported(),
            retrieved: self.retrieved(),
            missing,
        })
    }
}

/// Compares a device's split manifest with local copies.
pub struct SplitSetDetector<'a> {
    bridge: &'a dyn DeviceBridge,
}

impl<'a> SplitSetDetector<'a> {
    /// Creates a detector over a bridge.
    #[must_use]
    pub fn new(bridge: &'a dyn DeviceBridge) -> Self {
        Self { bridge }
    }

    /// Fetches the authoritative part list from the device.
    pub async fn reported_parts(&self, device: &str, package: &str) -> Result<Vec<String>, AdapterError> {
        self.bridge.code_paths(device, package).await
    }

    /// Builds the split set from the device manifest and the files in `parts_dir`.
    pub async fn detect(&self, device: &str, package: &str, parts_dir: &Path) -> Result<SplitSet, AdapterError> {
        let reported = self.reported_parts(device, package).await?;
        Ok(SplitSet::observe(package, &reported, parts_dir))
    }

    /// Pulls every reported part into a fresh `parts_dir`.
    ///
    /// A part whose transfer fails is left missing and the set comes back
    /// incomplete. If nothing at all could be pulled the last error is
    /// returned. A missing `adb` is always returned.
    pub async fn retrieve(&self, device: &str, package: &str, parts_dir: &Path) -> Result<SplitSet, AdapterError> {
        let reported = self.reported_parts(device, package).await?;
        reset_dir(parts_dir)?;

        let mut parts = Vec::with_capacity(reported.len());
        let mut last_error = None;
        for remote in &reported {
            let mut part = SplitPart::reported(remote.as_str());
            let local = parts_dir.join(&part.file_name);
            debug!(device, remote = %remote, local = %local.display(), "Pulling part");
            match self.bridge.pull(device, remote, &local).await {
                Ok(()) => part.local_path = Some(local),
                Err(e @ AdapterError::ToolNotFound(_)) => return Err(e),
                Err(e) => {
                    warn!(package, part = %part.file_name, error = %e, "Failed to pull split part");
                    last_error = Some(e);
                }
            }
            parts.push(part);
        }

        let set = SplitSet::from_parts(package, parts);
        if set.retrieved() == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        info!(
            package,
            reported = set.reported(),
            retrieved = set.retrieved(),
            complete = set.complete,
            "Split set retrieved"
        );
        Ok(set)
    }
}

fn reset_dir(dir: &Path) -> Result<(), AdapterError> {
    let failed = |e: std::io::Error| {
        crate::errors::StageToolFailureError::new("workspace", format!("{}: {e}", dir.display()))
    };
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(failed)?;
    }
    fs::create_dir_all(dir).map_err(failed)?;
    Ok(())
}
