//! Stage artifact references.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Whether an artifact is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A single file.
    File,
    /// A directory.
    Directory,
}

/// A file or directory a stage produced inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageArtifact {
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Absolute path.
    pub path: PathBuf,
}

impl StageArtifact {
    /// A file artifact.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ArtifactKind::File,
            path: path.into(),
        }
    }

    /// A directory artifact.
    #[must_use]
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ArtifactKind::Directory,
            path: path.into(),
        }
    }

    /// The artifact path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the artifact still exists with the expected kind.
    #[must_use]
    pub fn exists(&self) -> bool {
        match self.kind {
            ArtifactKind::File => self.path.is_file(),
            ArtifactKind::Directory => self.path.is_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_checks_kind() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("merged.apk");
        std::fs::write(&file, b"apk").unwrap();

        assert!(StageArtifact::file(&file).exists());
        assert!(!StageArtifact::directory(&file).exists());
        assert!(StageArtifact::directory(dir.path()).exists());
        assert!(!StageArtifact::file(dir.path().join("missing.apk")).exists());
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(StageArtifact::file("/w/sign/app.apk")).unwrap();
        assert_eq!(json["kind"], "file");
        assert_eq!(json["path"], "/w/sign/app.apk");
    }
}
