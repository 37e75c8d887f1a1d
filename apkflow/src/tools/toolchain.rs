//! The host toolchain seam: merge, patch, sign and decompile.

use super::framework;
use super::locate::{Tool, ToolPaths};
use crate::config::{KeystoreConfig, TimeoutConfig};
use crate::core::StageCategory;
use crate::errors::{AdapterError, StageToolFailureError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// File name reflutter writes its patched APK to.
pub const REFLUTTER_OUTPUT: &str = "release.RE.apk";

/// Decompiler backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompileEngine {
    /// Java sources via jadx.
    #[default]
    Jadx,
    /// Smali and decoded resources via apktool.
    Apktool,
}

impl fmt::Display for DecompileEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jadx => write!(f, "jadx"),
            Self::Apktool => write!(f, "apktool"),
        }
    }
}

impl FromStr for DecompileEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jadx" => Ok(Self::Jadx),
            "apktool" => Ok(Self::Apktool),
            other => Err(format!("unknown decompiler '{other}' (expected jadx or apktool)")),
        }
    }
}

/// Host-side tools used by the stages.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Merges every APK in `parts_dir` into one installable APK at `output`.
    async fn merge_splits(&self, parts_dir: &Path, output: &Path) -> Result<(), AdapterError>;

    /// Lists the entry names of an APK.
    async fn archive_entries(&self, apk: &Path) -> Result<Vec<String>, AdapterError>;

    /// Patches a Flutter APK; returns the patched APK inside `work_dir`.
    async fn patch(&self, apk: &Path, work_dir: &Path) -> Result<PathBuf, AdapterError>;

    /// Aligns and signs `input` into `output`.
    async fn sign(&self, input: &Path, output: &Path) -> Result<(), AdapterError>;

    /// Decompiles `apk` into `output_dir`.
    async fn decompile(
        &self,
        engine: DecompileEngine,
        apk: &Path,
        output_dir: &Path,
    ) -> Result<(), AdapterError>;
}

/// [`Toolchain`] backed by external processes.
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
    paths: ToolPaths,
    keystore: KeystoreConfig,
    keystore_path: PathBuf,
    timeouts: TimeoutConfig,
}

impl ProcessToolchain {
    /// Creates a toolchain from resolved tool paths.
    #[must_use]
    pub fn new(
        paths: ToolPaths,
        keystore: KeystoreConfig,
        keystore_path: PathBuf,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            paths,
            keystore,
            keystore_path,
            timeouts,
        }
    }

    fn build_limit(&self) -> Option<std::time::Duration> {
        self.timeouts.for_category(StageCategory::Build)
    }

    async fn ensure_keystore(&self) -> Result<(), AdapterError> {
        if self.keystore_path.is_file() {
            return Ok(());
        }
        if let Some(parent) = self.keystore_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StageToolFailureError::new("keytool", format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        info!(path = %self.keystore_path.display(), "Generating debug keystore");
        self.paths
            .command(Tool::Keytool)?
            .args(["-genkey", "-v", "-keystore"])
            .arg(&self.keystore_path)
            .args(["-alias", self.keystore.alias.as_str()])
            .args(["-keyalg", "RSA", "-keysize", "2048", "-validity", "10000"])
            .args(["-storepass", self.keystore.store_password.as_str()])
            .args(["-keypass", self.keystore.key_password.as_str()])
            .args(["-dname", "CN=Debug, OU=Debug, O=Debug, L=Debug, ST=Debug, C=US"])
            .timeout(self.build_limit())
            .run_checked()
            .await?;
        Ok(())
    }
}

fn require_output(tool: &str, path: &Path) -> Result<(), AdapterError> {
    if path.exists() {
        Ok(())
    } else {
        Err(StageToolFailureError::new(
            tool,
            format!("completed but {} was not created", path.display()),
        )
        .into())
    }
}

#[async_trait]
impl Toolchain for ProcessToolchain {
    async fn merge_splits(&self, parts_dir: &Path, output: &Path) -> Result<(), AdapterError> {
        self.paths
            .command(Tool::ApkEditor)?
            .arg("merge")
            .arg("-i")
            .arg(parts_dir)
            .arg("-o")
            .arg(output)
            .timeout(self.build_limit())
            .run_checked()
            .await?;
        require_output("APKEditor merge", output)
    }

    async fn archive_entries(&self, apk: &Path) -> Result<Vec<String>, AdapterError> {
        let apk = apk.to_path_buf();
        tokio::task::spawn_blocking(move || framework::archive_entries(&apk))
            .await
            .map_err(|e| StageToolFailureError::new("archive reader", e.to_string()))?
    }

    async fn patch(&self, apk: &Path, work_dir: &Path) -> Result<PathBuf, AdapterError> {
        self.paths
            .command(Tool::Reflutter)?
            .arg(apk)
            .current_dir(work_dir)
            .timeout(self.build_limit())
            .run_checked()
            .await?;
        let patched = work_dir.join(REFLUTTER_OUTPUT);
        require_output("reflutter", &patched)?;
        Ok(patched)
    }

    async fn sign(&self, input: &Path, output: &Path) -> Result<(), AdapterError> {
        self.ensure_keystore().await?;

        let aligned = output.with_extension("aligned.apk");
        self.paths
            .command(Tool::Zipalign)?
            .args(["-P", "16", "-f", "4"])
            .arg(input)
            .arg(&aligned)
            .timeout(self.build_limit())
            .run_checked()
            .await?;

        let signed = self
            .paths
            .command(Tool::Apksigner)?
            .args(["sign", "--ks"])
            .arg(&self.keystore_path)
            .args(["--ks-key-alias", self.keystore.alias.as_str()])
            .arg("--ks-pass")
            .arg(format!("pass:{}", self.keystore.store_password))
            .arg("--key-pass")
            .arg(format!("pass:{}", self.keystore.key_password))
            .arg("--out")
            .arg(output)
            .arg(&aligned)
            .timeout(self.build_limit())
            .run_checked()
            .await;

        if let Err(e) = std::fs::remove_file(&aligned) {
            warn!(path = %aligned.display(), error = %e, "Could not remove intermediate APK");
        }
        signed?;
        require_output("apksigner", output)
    }

    async fn decompile(
        &self,
        engine: DecompileEngine,
        apk: &Path,
        output_dir: &Path,
    ) -> Result<(), AdapterError> {
        match engine {
            DecompileEngine::Jadx => {
                let out = self
                    .paths
                    .command(Tool::Jadx)?
                    .arg("-d")
                    .arg(output_dir)
                    .arg(apk)
                    .timeout(self.build_limit())
                    .output()
                    .await?;
                // jadx exits non-zero when individual classes fail to decompile
                if !out.success() {
                    let produced = std::fs::read_dir(output_dir)
                        .map(|mut entries| entries.next().is_some())
                        .unwrap_or(false);
                    if !produced {
                        return Err(StageToolFailureError::new("jadx", out.diagnostic())
                            .with_exit_code(out.exit_code)
                            .into());
                    }
                    warn!(apk = %apk.display(), "jadx finished with errors");
                }
            }
            DecompileEngine::Apktool => {
                self.paths
                    .command(Tool::Apktool)?
                    .arg("d")
                    .arg("-o")
                    .arg(output_dir)
                    .arg(apk)
                    .arg("-f")
                    .timeout(self.build_limit())
                    .run_checked()
                    .await?;
            }
        }
        require_output(&engine.to_string(), output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResolution;

    #[test]
    fn test_engine_parse() {
        assert_eq!("JADX".parse::<DecompileEngine>().unwrap(), DecompileEngine::Jadx);
        assert_eq!(
            "apktool".parse::<DecompileEngine>().unwrap(),
            DecompileEngine::Apktool
        );
        assert!("procyon".parse::<DecompileEngine>().is_err());
    }

    #[tokio::test]
    async fn test_missing_merge_tool_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = ProcessToolchain::new(
            ToolPaths::from_resolutions([(Tool::ApkEditor, ToolResolution::Absent)]),
            KeystoreConfig::default(),
            dir.path().join("debug.keystore"),
            TimeoutConfig::default(),
        );

        let err = toolchain
            .merge_splits(dir.path(), &dir.path().join("merged.apk"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_patch_requires_output_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("reflutter");
        std::fs::write(&fake, "#!/bin/sh\ntouch release.RE.apk\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();

        let toolchain = ProcessToolchain::new(
            ToolPaths::from_resolutions([(Tool::Reflutter, ToolResolution::Executable(fake))]),
            KeystoreConfig::default(),
            dir.path().join("debug.keystore"),
            TimeoutConfig::default(),
        );

        let patched = toolchain
            .patch(&dir.path().join("app.apk"), &work)
            .await
            .unwrap();
        assert_eq!(patched, work.join(REFLUTTER_OUTPUT));
    }
}
