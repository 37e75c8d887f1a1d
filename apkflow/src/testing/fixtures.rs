//! Test fixtures: throwaway workspaces and ready-made targets.

use crate::device::{Device, Package};
use crate::errors::ApkflowError;
use crate::resolver::ResolvedTarget;
use crate::workspace::{Workspace, WorkspaceStore};
use std::path::Path;
use tempfile::TempDir;

/// Device id used by the fixtures.
pub const TEST_DEVICE: &str = "emulator-5554";

/// A workspace store rooted in a temporary directory removed on drop.
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
    store: WorkspaceStore,
}

impl TestWorkspace {
    /// Creates an empty store.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = WorkspaceStore::new(dir.path());
        Self { dir, store }
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &WorkspaceStore {
        &self.store
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Opens the workspace of `target`.
    pub fn open(&self, target: &ResolvedTarget) -> Result<Workspace, ApkflowError> {
        self.store.open(&target.workspace_key())
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Remote code paths of a package with `splits` config splits besides the base.
#[must_use]
pub fn code_paths(package: &str, splits: &[&str]) -> Vec<String> {
    let dir = format!("/data/app/~~a1b2/{package}-1");
    std::iter::once(format!("{dir}/base.apk"))
        .chain(splits.iter().map(|s| format!("{dir}/split_config.{s}.apk")))
        .collect()
}

/// A single-APK package.
#[must_use]
pub fn single_package(name: &str) -> Package {
    Package::new(name, code_paths(name, &[]))
}

/// A package with three parts: base, ABI split and density split.
#[must_use]
pub fn split_package(name: &str) -> Package {
    Package::new(name, code_paths(name, &["arm64_v8a", "xxhdpi"]))
}

/// A target on the fixture device.
#[must_use]
pub fn target(package: Package) -> ResolvedTarget {
    ResolvedTarget::new(Device::online(TEST_DEVICE), package)
}
