//! The device bridge seam.

use super::{Device, Package};
use crate::errors::AdapterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result of removing a package from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UninstallOutcome {
    /// The package was installed and is now gone.
    Removed,
    /// The package was already absent.
    NotInstalled,
}

/// Everything apkflow asks of a connected device.
///
/// Every call addresses an explicit device id; implementations keep no
/// notion of a current device.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Lists known devices in every state.
    async fn list_devices(&self) -> Result<Vec<Device>, AdapterError>;

    /// Lists installed package names, third-party only unless `include_system`.
    async fn list_packages(
        &self,
        device: &str,
        include_system: bool,
    ) -> Result<Vec<String>, AdapterError>;

    /// Returns the user-facing label of a package, if it has one.
    async fn package_label(&self, device: &str, package: &str)
        -> Result<Option<String>, AdapterError>;

    /// Returns package details, or `None` if not installed.
    async fn package_info(&self, device: &str, package: &str)
        -> Result<Option<Package>, AdapterError>;

    /// Returns the remote APK paths of a package, base first. Empty if not installed.
    async fn code_paths(&self, device: &str, package: &str) -> Result<Vec<String>, AdapterError>;

    /// Copies a remote file to `local`.
    async fn pull(&self, device: &str, remote: &str, local: &Path) -> Result<(), AdapterError>;

    /// Installs an APK.
    async fn install(&self, device: &str, apk: &Path) -> Result<(), AdapterError>;

    /// Removes a package.
    async fn uninstall(&self, device: &str, package: &str)
        -> Result<UninstallOutcome, AdapterError>;

    /// Starts the launcher activity of a package.
    async fn launch(&self, device: &str, package: &str) -> Result<(), AdapterError>;

    /// Reads the Dart dump the patched runtime leaves in the app's data directory.
    async fn read_dump(&self, device: &str, package: &str) -> Result<String, AdapterError>;
}
