//! Retry policy for transient stage failures.
//!
//! A failed attempt is repeated only when the error is retryable (timeouts,
//! tool exits) and the stage accepts retries. Repeats stay inside the stage;
//! the engine never moves past a stage that is still being retried.

use crate::errors::StageError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the pause grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Doubles after every failed attempt.
    #[default]
    Exponential,
    /// Same pause every time.
    Fixed,
}

/// Randomisation of the pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Use the computed pause as is.
    None,
    /// Anywhere between zero and the computed pause.
    #[default]
    Full,
}

/// Retry limits applied to every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Executions per stage, the first one included.
    pub max_attempts: u32,
    /// Pause before the first repeat, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of any pause, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth of the pause.
    pub backoff_strategy: BackoffStrategy,
    /// Randomisation of the pause.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Default limits: three attempts, exponential pauses from 2 s up to 30 s.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A single attempt per stage.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the attempt limit; zero is raised to one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the first pause.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the pause cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Pause before repeat number `repeat` (0 for the first repeat), before jitter.
    #[must_use]
    pub fn backoff(&self, repeat: u32) -> Duration {
        let ms = match self.backoff_strategy {
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(repeat)),
            BackoffStrategy::Fixed => self.base_delay_ms,
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    fn pause(&self, repeat: u32) -> Duration {
        let pause = self.backoff(repeat);
        match self.jitter_strategy {
            JitterStrategy::None => pause,
            JitterStrategy::Full if pause.is_zero() => pause,
            JitterStrategy::Full => {
                let ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
            }
        }
    }
}

/// What the engine does after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then execute the stage again.
    Retry(Duration),
    /// The attempt limit is reached.
    GiveUp,
    /// The error or the stage rules out a repeat.
    NotRetryable,
}

/// Attempt counter for one stage execution.
#[derive(Debug)]
pub struct RetryBudget<'a> {
    config: &'a RetryConfig,
    stage_allows_retry: bool,
    attempts: u32,
}

impl<'a> RetryBudget<'a> {
    /// A fresh budget; `stage_allows_retry` is false for stages that must not repeat.
    #[must_use]
    pub fn new(config: &'a RetryConfig, stage_allows_retry: bool) -> Self {
        Self {
            config,
            stage_allows_retry,
            attempts: 0,
        }
    }

    /// Counts an attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decides whether the failed attempt is repeated.
    #[must_use]
    pub fn after_failure(&self, error: &StageError) -> RetryDecision {
        if !(error.is_retryable() && self.stage_allows_retry) {
            return RetryDecision::NotRetryable;
        }
        if self.attempts >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.config.pause(self.attempts.saturating_sub(1)))
    }
}
