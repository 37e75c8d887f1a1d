//! Exclusive per-workspace advisory lock.

use crate::errors::{ApkflowError, WorkspaceLockedError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file name inside a workspace directory.
pub const LOCK_FILE: &str = ".lock";

/// Held for the duration of a run or clean; released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Takes the lock of the workspace at `dir` without waiting.
    pub fn acquire(dir: &Path, key: &str) -> Result<Self, ApkflowError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                return Err(WorkspaceLockedError {
                    key: key.to_string(),
                    path,
                }
                .into());
            }
            return Err(e.into());
        }

        // Owner PID, for humans inspecting a stuck workspace
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "Workspace lock acquired");
        Ok(Self { file, path })
    }

    /// The lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release workspace lock");
        }
    }
}
