//! [`DeviceBridge`] over the `adb` command line.

use super::parse::{parse_code_paths, parse_devices, parse_label, parse_package_list, parse_versions};
use super::{Device, DeviceBridge, Package, UninstallOutcome};
use crate::config::TimeoutConfig;
use crate::core::StageCategory;
use crate::errors::{AdapterError, StageToolFailureError};
use crate::tools::ToolCommand;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Talks to devices through an `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb: PathBuf,
    timeouts: TimeoutConfig,
}

impl AdbBridge {
    /// Creates a bridge using the given `adb` binary.
    #[must_use]
    pub fn new(adb: impl Into<PathBuf>, timeouts: TimeoutConfig) -> Self {
        Self {
            adb: adb.into(),
            timeouts,
        }
    }

    fn command(&self, device: Option<&str>, category: StageCategory) -> ToolCommand {
        let cmd = ToolCommand::new(&self.adb)
            .label("adb")
            .timeout(self.timeouts.for_category(category));
        match device {
            Some(id) => cmd.args(["-s", id]),
            None => cmd,
        }
    }

    fn shell(&self, device: &str, category: StageCategory) -> ToolCommand {
        self.command(Some(device), category).arg("shell")
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn list_devices(&self) -> Result<Vec<Device>, AdapterError> {
        let out = self
            .command(None, StageCategory::Metadata)
            .args(["devices", "-l"])
            .run_checked()
            .await?;
        Ok(parse_devices(&out.stdout))
    }

    async fn list_packages(
        &self,
        device: &str,
        include_system: bool,
    ) -> Result<Vec<String>, AdapterError> {
        let mut cmd = self
            .shell(device, StageCategory::Metadata)
            .args(["pm", "list", "packages"]);
        if !include_system {
            cmd = cmd.arg("-3");
        }
        let out = cmd.run_checked().await?;
        Ok(parse_package_list(&out.stdout))
    }

    async fn package_label(
        &self,
        device: &str,
        package: &str,
    ) -> Result<Option<String>, AdapterError> {
        let out = self
            .shell(device, StageCategory::Metadata)
            .args(["dumpsys", "package", package])
            .run_checked()
            .await?;
        Ok(parse_label(&out.stdout, package))
    }

    async fn package_info(
        &self,
        device: &str,
        package: &str,
    ) -> Result<Option<Package>, AdapterError> {
        let code_paths = self.code_paths(device, package).await?;
        if code_paths.is_empty() {
            return Ok(None);
        }

        let dumpsys = self
            .shell(device, StageCategory::Metadata)
            .args(["dumpsys", "package", package])
            .output()
            .await?;
        let (version_name, version_code) = parse_versions(&dumpsys.stdout);

        Ok(Some(Package {
            name: package.to_string(),
            label: parse_label(&dumpsys.stdout, package),
            version_name,
            version_code,
            code_paths,
        }))
    }

    async fn code_paths(&self, device: &str, package: &str) -> Result<Vec<String>, AdapterError> {
        // `pm path` exits non-zero for unknown packages
        let out = self
            .shell(device, StageCategory::Metadata)
            .args(["pm", "path", package])
            .output()
            .await?;
        Ok(parse_code_paths(&out.stdout))
    }

    async fn pull(&self, device: &str, remote: &str, local: &Path) -> Result<(), AdapterError> {
        self.command(Some(device), StageCategory::Transfer)
            .arg("pull")
            .arg(remote)
            .arg(local)
            .run_checked()
            .await?;
        if local.is_file() {
            Ok(())
        } else {
            Err(StageToolFailureError::new(
                "adb pull",
                format!("pull reported success but {} is missing", local.display()),
            )
            .into())
        }
    }

    async fn install(&self, device: &str, apk: &Path) -> Result<(), AdapterError> {
        let out = self
            .command(Some(device), StageCategory::Transfer)
            .arg("install")
            .arg(apk)
            .label("adb install")
            .run_checked()
            .await?;
        // older adb versions exit 0 on failure
        if out.stdout.contains("Failure") {
            return Err(StageToolFailureError::new("adb install", out.stdout.trim()).into());
        }
        Ok(())
    }

    async fn uninstall(
        &self,
        device: &str,
        package: &str,
    ) -> Result<UninstallOutcome, AdapterError> {
        let out = self
            .command(Some(device), StageCategory::Device)
            .args(["uninstall", package])
            .output()
            .await?;
        let text = format!("{}\n{}", out.stdout, out.stderr);
        if out.success() && text.contains("Success") {
            return Ok(UninstallOutcome::Removed);
        }
        if text.contains("not installed")
            || text.contains("DELETE_FAILED_INTERNAL_ERROR")
            || text.contains("Unknown package")
        {
            debug!(device, package, "Package was not installed");
            return Ok(UninstallOutcome::NotInstalled);
        }
        Err(StageToolFailureError::new("adb uninstall", out.diagnostic())
            .with_exit_code(out.exit_code)
            .into())
    }

    async fn launch(&self, device: &str, package: &str) -> Result<(), AdapterError> {
        let out = self
            .shell(device, StageCategory::Device)
            .args(["monkey", "-p", package, "-c", "android.intent.category.LAUNCHER", "1"])
            .label("adb monkey")
            .run_checked()
            .await?;
        if out.stdout.contains("No activities found") || out.stdout.contains("monkey aborted") {
            return Err(StageToolFailureError::new("adb monkey", out.stdout.trim()).into());
        }
        Ok(())
    }

    async fn read_dump(&self, device: &str, package: &str) -> Result<String, AdapterError> {
        self.shell(device, StageCategory::Metadata)
            .args(["su", "-c", "id"])
            .label("root check")
            .run_checked()
            .await
            .map_err(|e| match e {
                AdapterError::ToolFailure(f) => StageToolFailureError::new(
                    "root check",
                    format!("root access is required to read the dump: {}", f.message),
                )
                .into(),
                other => other,
            })?;

        let out = self
            .shell(device, StageCategory::Transfer)
            .args(["su", "-c"])
            .arg(format!("cat /data/data/{package}/dump.dart"))
            .label("dump read")
            .run_checked()
            .await?;
        Ok(out.stdout)
    }
}
