//! Registered workflows.
//!
//! This module provides:
//! - `instrument`: pull, merge, validate, patch, sign, reinstall, launch, dump, parse
//! - `decompile`: pull, merge, decompile
//! - [`build_workflow`] to construct either from its name and options

mod common;
mod decompile;
mod dump;
mod instrument;

pub use common::{installable_apk, read_manifest, MergeStage, PullStage, MERGE, PARTS_MANIFEST, PULL};
pub use decompile::{decompile_workflow, DecompileOptions, DecompileStage, DECOMPILE};
pub use dump::{parse_dump, DumpClass, ParsedDump};
pub use instrument::{
    instrument_workflow, DumpStage, InstallStage, InstrumentOptions, LaunchStage, ParseDumpStage,
    PatchStage, SignStage, UninstallStage, ValidateFrameworkStage, DUMP, INSTALL, LAUNCH, PARSE,
    PATCH, SIGN, UNINSTALL, VALIDATE,
};

use crate::errors::{ApkflowError, WorkflowValidationError};
use crate::pipeline::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Patch, reinstall and dump a Flutter app.
    Instrument,
    /// Decompile the installed APK.
    Decompile,
}

impl WorkflowKind {
    /// Every registered workflow.
    pub const ALL: [Self; 2] = [Self::Instrument, Self::Decompile];
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instrument => write!(f, "instrument"),
            Self::Decompile => write!(f, "decompile"),
        }
    }
}

impl FromStr for WorkflowKind {
    type Err = ApkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ApkflowError::UnknownWorkflow(s.to_string()))
    }
}

/// Options for every workflow; each workflow reads its own part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowOptions {
    /// Instrumentation options.
    pub instrument: InstrumentOptions,
    /// Decompile options.
    pub decompile: DecompileOptions,
}

/// Builds the definition of a registered workflow.
pub fn build_workflow(
    kind: WorkflowKind,
    options: &WorkflowOptions,
) -> Result<WorkflowDefinition, WorkflowValidationError> {
    match kind {
        WorkflowKind::Instrument => instrument_workflow(&options.instrument),
        WorkflowKind::Decompile => decompile_workflow(&options.decompile),
    }
}
