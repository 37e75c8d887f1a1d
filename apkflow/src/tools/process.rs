//! Bounded execution of external commands.

use crate::errors::{AdapterError, StageTimeoutError, StageToolFailureError, ToolNotFoundError};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// An external command with an optional time limit.
///
/// The child is killed if the limit expires or the future is dropped.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
    label: String,
}

impl ToolCommand {
    /// Creates a command for `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let label = program
            .file_name()
            .map_or_else(|| program.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            program,
            args: Vec::new(),
            cwd: None,
            timeout: None,
            label,
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Runs the command in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Sets the time limit.
    #[must_use]
    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Sets the name used in errors and logs.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Returns the label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.label
    }

    /// Runs to completion and captures output, whatever the exit status.
    pub async fn output(&self) -> Result<ToolOutput, AdapterError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        debug!(tool = %self.label, program = %self.program.display(), args = ?self.args, "Running external tool");

        let pending = cmd.output();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| StageTimeoutError::new(self.label.clone(), limit))?,
            None => pending.await,
        };

        let output = result.map_err(|e| -> AdapterError {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolNotFoundError::new(self.program.display().to_string(), None).into()
            } else {
                StageToolFailureError::new(self.label.clone(), e.to_string()).into()
            }
        })?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Runs to completion and fails on a non-zero exit status.
    pub async fn run_checked(&self) -> Result<ToolOutput, AdapterError> {
        let output = self.output().await?;
        if output.success() {
            Ok(output)
        } else {
            Err(StageToolFailureError::new(self.label.clone(), output.diagnostic())
                .with_exit_code(output.exit_code)
                .into())
        }
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` if killed by a signal.
    pub exit_code: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Returns true on exit code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The most useful failure text: stderr, else stdout.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}
