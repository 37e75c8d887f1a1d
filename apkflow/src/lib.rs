//! # Apkflow
//!
//! Resumable orchestration of Android reverse-engineering workflows.
//!
//! Apkflow turns a package query into a concrete device and package, then
//! drives external tools through a fixed sequence of stages:
//!
//! - **Target resolution**: exact, substring and label matching with explicit
//!   disambiguation of devices and packages
//! - **Split handling**: a split install is merged only when every part was retrieved
//! - **Persistent progress**: a per-package ledger records every stage transition,
//!   so reruns skip satisfied stages and resume at the first unfinished one
//! - **Bounded recovery**: per-category timeouts and bounded retries; failures
//!   that leave a device without the app are flagged for the operator
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use apkflow::prelude::*;
//! use std::sync::Arc;
//!
//! let apkflow = Apkflow::from_config(ApkflowConfig::load(None));
//! let target = apkflow.resolve("telegram", &ResolveOptions::default()).await?;
//! let report = apkflow
//!     .run(
//!         WorkflowKind::Instrument,
//!         &target,
//!         &WorkflowOptions::default(),
//!         Arc::new(CancellationToken::new()),
//!     )
//!     .await?;
//! println!("{report}");
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod api;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod device;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod resolver;
pub mod split;
pub mod testing;
pub mod tools;
pub mod workflows;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::Apkflow;
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ApkflowConfig, TimeoutConfig};
    pub use crate::core::{StageArtifact, StageCategory, StageOutput, StageStatus};
    pub use crate::device::{Device, DeviceBridge, Package};
    pub use crate::errors::{
        AmbiguityError, ApkflowError, DeviceNotConnectedError, DeviceStateDivergedError,
        IncompleteSplitSetError, NotFoundError, StageError, StageErrorKind,
        WorkspaceLockedError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        PipelineEngine, PipelineReport, RetryConfig, RunContext, RunOutcome, Stage,
        StageContext, WorkflowDefinition,
    };
    pub use crate::resolver::{
        Disambiguator, InteractiveTerminal, OperatorPrompt, ResolveOptions, ResolvedTarget,
        TargetResolver, Unattended,
    };
    pub use crate::tools::{DecompileEngine, Toolchain};
    pub use crate::workflows::{
        build_workflow, DecompileOptions, InstrumentOptions, WorkflowKind, WorkflowOptions,
    };
    pub use crate::workspace::{Workspace, WorkspaceKey, WorkspaceStore};
}
