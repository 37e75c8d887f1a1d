//! The sequential pipeline engine.
//!
//! Per stage: `pending -> running -> {done, skipped, failed}`. Stages run one
//! at a time in definition order; the first failure halts the run and leaves
//! every later stage pending. Each transition is written to the ledger before
//! the engine moves on.

use super::report::{PipelineReport, ReportedError, RunOutcome, StageReport};
use super::retry::{RetryBudget, RetryConfig, RetryDecision};
use super::{RunContext, Stage, StageContext, WorkflowDefinition};
use crate::config::TimeoutConfig;
use crate::core::{Applicability, StageOutput, StageResult, StageStatus};
use crate::errors::{ApkflowError, StageError, StageTimeoutError};
use crate::events::{EventSink, NoOpEventSink};
use crate::workspace::{LedgerEntry, LedgerEvent, Workspace};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs workflow definitions against workspaces.
#[derive(Clone)]
pub struct PipelineEngine {
    retry: RetryConfig,
    timeouts: TimeoutConfig,
    events: Arc<dyn EventSink>,
}

impl Default for PipelineEngine {
    fn default() -> Self {
        Self::new(RetryConfig::default(), TimeoutConfig::default())
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("retry", &self.retry)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl PipelineEngine {
    /// Creates an engine that discards events.
    #[must_use]
    pub fn new(retry: RetryConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            retry,
            timeouts,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Runs `workflow` against `workspace`.
    ///
    /// Stage failures never surface as `Err`; they are recorded and reported.
    /// `Err` means the run could not start or the ledger could not be written:
    /// a malformed definition, a held lock, an unreadable ledger schema.
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        workspace: &mut Workspace,
        ctx: &RunContext,
    ) -> Result<PipelineReport, ApkflowError> {
        workflow.validate()?;
        let _lock = workspace.lock()?;
        workspace.reload()?;

        let started_at = Utc::now();
        info!(
            run_id = %ctx.run_id,
            workflow = workflow.name(),
            workspace = %workspace.key(),
            device = ctx.device_id(),
            "Starting workflow"
        );
        self.events
            .emit(
                "pipeline.started",
                Some(json!({
                    "run_id": ctx.run_id,
                    "workflow": workflow.name(),
                    "workspace": workspace.key().to_string(),
                    "stages": workflow.stage_names(),
                })),
            )
            .await;
        workspace.log_event(
            LedgerEvent::new("run_started")
                .in_run(ctx.run_id)
                .with_detail(workflow.name()),
        )?;

        let mut stages = Vec::with_capacity(workflow.stages().len());
        let mut outcome = RunOutcome::Completed;

        for stage in workflow.stages() {
            if ctx.cancellation.is_cancelled() {
                let reason = ctx
                    .cancellation
                    .reason()
                    .unwrap_or_else(|| "cancelled".to_string());
                info!(stage = stage.name(), reason = %reason, "Cancellation honoured before stage");
                outcome = RunOutcome::Cancelled {
                    reason,
                    next_stage: Some(stage.name().to_string()),
                };
                break;
            }

            let report = self.run_stage(stage.as_ref(), workspace, ctx).await?;
            let halted = report.error.clone().map(|error| match ctx.cancellation.reason() {
                Some(reason) => RunOutcome::Cancelled {
                    reason,
                    next_stage: Some(report.name.clone()),
                },
                None => RunOutcome::Halted {
                    stage: report.name.clone(),
                    error,
                },
            });
            stages.push(report);
            if let Some(halted) = halted {
                outcome = halted;
                break;
            }
        }

        for stage in workflow.stages().iter().skip(stages.len()) {
            stages.push(StageReport::pending(stage.name(), stage.category()));
        }

        let completed_stages = workflow
            .stages()
            .iter()
            .filter(|s| workspace.ledger().status(s.name()) == StageStatus::Done)
            .map(|s| s.name().to_string())
            .collect();

        let report = PipelineReport {
            run_id: ctx.run_id,
            workflow: workflow.name().to_string(),
            workspace: workspace.key().clone(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            stages,
            completed_stages,
            recovered_ledger: workspace.recovered().map(ToString::to_string),
        };
        self.finish(workspace, &report).await?;
        Ok(report)
    }

    async fn finish(&self, workspace: &mut Workspace, report: &PipelineReport) -> Result<(), ApkflowError> {
        let (event, detail) = match &report.outcome {
            RunOutcome::Completed => ("pipeline.completed", "completed".to_string()),
            RunOutcome::Halted { stage, error } => {
                warn!(stage = %stage, error = %error.message, "Workflow halted");
                ("pipeline.halted", format!("halted at {stage}"))
            }
            RunOutcome::Cancelled { reason, .. } => ("pipeline.cancelled", format!("cancelled: {reason}")),
        };
        info!(run_id = %report.run_id, outcome = %detail, "Workflow finished");
        workspace.log_event(
            LedgerEvent::new("run_finished")
                .in_run(report.run_id)
                .with_detail(detail),
        )?;
        self.events
            .emit(
                event,
                Some(json!({
                    "run_id": report.run_id,
                    "workflow": report.workflow,
                    "outcome": report.outcome,
                    "completed_stages": report.completed_stages,
                })),
            )
            .await;
        Ok(())
    }

    async fn run_stage(
        &self,
        stage: &dyn Stage,
        workspace: &mut Workspace,
        ctx: &RunContext,
    ) -> Result<StageReport, ApkflowError> {
        let name = stage.name();
        let started = Instant::now();
        let mut report = StageReport::pending(name, stage.category());

        let (applicability, satisfied) = {
            let sctx = StageContext::new(ctx, workspace, name);
            let applicability = stage.applicability(&sctx);
            let satisfied = workspace
                .ledger()
                .entry(name)
                .filter(|entry| stage.is_satisfied(&sctx, entry))
                .cloned();
            (applicability, satisfied)
        };

        if let Applicability::NotApplicable(reason) = applicability {
            let recorded = workspace.ledger().entry(name).is_some_and(|e| {
                e.is_done() && e.artifact.is_none() && e.note.as_deref() == Some(reason.as_str())
            });
            if !recorded {
                let result = StageResult::Skipped {
                    reason: reason.clone(),
                    artifact: None,
                };
                workspace.record_result(name, &result, ctx.run_id)?;
            }
            debug!(stage = name, reason = %reason, "Stage not applicable");
            self.emit_skipped(name, &reason).await;
            report.status = StageStatus::Skipped;
            report.note = Some(reason);
            return Ok(report);
        }

        if let Some(entry) = satisfied {
            let reason = "already satisfied".to_string();
            debug!(stage = name, "Stage already satisfied");
            self.emit_skipped(name, &reason).await;
            report.status = StageStatus::Skipped;
            report.artifact = entry.artifact;
            report.note = entry.note.or(Some(reason));
            return Ok(report);
        }

        workspace.record(name, LedgerEntry::running(ctx.run_id))?;
        info!(stage = name, category = %stage.category(), "Stage started");
        self.events
            .emit("stage.started", Some(json!({ "stage": name, "run_id": ctx.run_id })))
            .await;

        let mut budget = RetryBudget::new(&self.retry, stage.retries_allowed());
        let result = loop {
            let attempt = budget.begin_attempt();
            let outcome = {
                let sctx = StageContext::new(ctx, workspace, name);
                self.attempt(stage, &sctx).await
            };
            let error = match outcome {
                Ok(output) => {
                    break StageResult::Done {
                        artifact: output.artifact,
                        note: output.note,
                        attempts: attempt,
                    }
                }
                Err(error) => error,
            };
            match budget.after_failure(&error) {
                RetryDecision::Retry(_) if ctx.cancellation.is_cancelled() => {
                    info!(stage = name, attempt, "Cancellation requested, not retrying");
                    break StageResult::Failed {
                        error,
                        attempts: attempt,
                    };
                }
                RetryDecision::Retry(delay) => {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    warn!(stage = name, attempt, delay_ms, error = %error, "Stage failed, retrying");
                    self.events
                        .emit(
                            "stage.retrying",
                            Some(json!({
                                "stage": name,
                                "attempt": attempt,
                                "delay_ms": delay_ms,
                                "error": error.to_string(),
                            })),
                        )
                        .await;
                    tokio::time::sleep(delay).await;
                    if ctx.cancellation.is_cancelled() {
                        info!(stage = name, attempt, "Cancellation requested during backoff");
                        break StageResult::Failed {
                            error,
                            attempts: attempt,
                        };
                    }
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    break StageResult::Failed {
                        error,
                        attempts: attempt,
                    };
                }
            }
        };
        let attempts = budget.attempts();

        workspace.record_result(name, &result, ctx.run_id)?;
        report.attempts = attempts;
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            StageResult::Done { artifact, note, .. } => {
                info!(stage = name, attempts, "Stage completed");
                self.events
                    .emit(
                        "stage.completed",
                        Some(json!({
                            "stage": name,
                            "attempts": attempts,
                            "artifact": artifact,
                            "duration_ms": report.duration_ms,
                        })),
                    )
                    .await;
                report.status = StageStatus::Done;
                report.artifact = artifact;
                report.note = note;
            }
            StageResult::Failed { error, .. } => {
                let reported = ReportedError::from(&error);
                warn!(stage = name, attempts, kind = %reported.kind, error = %error, "Stage failed");
                self.events
                    .emit(
                        "stage.failed",
                        Some(json!({
                            "stage": name,
                            "attempts": attempts,
                            "error": reported,
                        })),
                    )
                    .await;
                report.status = StageStatus::Failed;
                report.error = Some(reported);
            }
            StageResult::Skipped { .. } => {}
        }
        Ok(report)
    }

    async fn attempt(&self, stage: &dyn Stage, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        match self.timeouts.for_category(stage.category()) {
            Some(limit) => match tokio::time::timeout(limit, stage.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(StageTimeoutError::new(stage.name(), limit).into()),
            },
            None => stage.execute(ctx).await,
        }
    }

    async fn emit_skipped(&self, stage: &str, reason: &str) {
        self.events
            .emit("stage.skipped", Some(json!({ "stage": stage, "reason": reason })))
            .await;
    }
}
