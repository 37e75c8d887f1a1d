//! Workflow definition and execution.
//!
//! This module provides:
//! - The [`Stage`] contract
//! - Validated [`WorkflowDefinition`]s
//! - The sequential [`PipelineEngine`] with bounded retries and per-category timeouts
//! - Run reports

mod context;
mod definition;
mod engine;
mod integration_tests;
mod report;
mod retry;
mod stage;

pub use context::{RunContext, StageContext};
pub use definition::{WorkflowBuilder, WorkflowDefinition};
pub use engine::PipelineEngine;
pub use report::{PipelineReport, ReportedError, RunOutcome, StageReport};
pub use retry::{BackoffStrategy, JitterStrategy, RetryBudget, RetryConfig, RetryDecision};
pub use stage::Stage;
