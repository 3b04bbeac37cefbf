//! Batch job types and policies.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use adprompt_core::{RunId, WorkItemId};

use crate::work_store::ExhaustionPolicy;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    #[default]
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            other => Err(format!(
                "unknown backoff strategy '{other}' (expected fixed, exponential or linear)"
            )),
        }
    }
}

/// Retry policy of one generation session.
///
/// `max_attempts` counts every call, the first one included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per record (>= 1)
    pub max_attempts: u32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    /// Four attempts, three seconds apart.
    fn default() -> Self {
        Self::fixed(4, Duration::from_secs(3))
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed) before the next one.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };

        match self.strategy {
            BackoffStrategy::Fixed => delay,
            _ => delay.min(self.max_delay.max(self.base_delay)),
        }
    }

    /// Whether another attempt follows attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Whether `attempt` is the last one the budget allows.
    pub fn is_final(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Policies of one coordinator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Per-record generation retries.
    pub retry: RetryPolicy,
    /// Pause between successive records that reached the backend.
    pub pacing: Duration,
    /// What to do with a claimed record whose attempts ran out.
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            pacing: Duration::from_secs(15),
            on_exhausted: ExhaustionPolicy::default(),
        }
    }
}

/// Why a claimed record ended without a persisted result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// Nothing to render; no backend call was made.
    MissingTitle,
    /// Every attempt was rejected or failed in transport.
    Exhausted { attempts: u32 },
    /// The result write failed.
    PersistFailed { error: String },
    /// Another writer completed the row first.
    AlreadyCompleted,
    /// Processing the record panicked.
    Panicked { message: String },
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::MissingTitle => "missing_title",
            SkipReason::Exhausted { .. } => "exhausted",
            SkipReason::PersistFailed { .. } => "persist_failed",
            SkipReason::AlreadyCompleted => "already_completed",
            SkipReason::Panicked { .. } => "panicked",
        }
    }
}

/// A record that was considered but not completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub id: WorkItemId,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Per-record outcome, as seen by the coordinator loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Persisted { attempts: u32 },
    Skipped(SkipReason),
}

impl RecordOutcome {
    /// Whether the backend saw at least one request for this record.
    pub fn reached_backend(&self) -> bool {
        !matches!(self, RecordOutcome::Skipped(SkipReason::MissingTitle))
    }
}

/// Summary of one coordinator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Records returned by the claim.
    pub claimed: usize,
    /// Records processed after the cap was applied.
    pub considered: usize,
    pub persisted: Vec<WorkItemId>,
    pub skipped: Vec<SkippedItem>,
    /// Session-invalid errors seen on non-final attempts.
    pub session_invalid_signals: u32,
}

impl BatchReport {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            claimed: 0,
            considered: 0,
            persisted: Vec::new(),
            skipped: Vec::new(),
            session_invalid_signals: 0,
        }
    }

    pub fn record(&mut self, id: WorkItemId, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Persisted { .. } => self.persisted.push(id),
            RecordOutcome::Skipped(reason) => self.skipped.push(SkippedItem { id, reason }),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Records that reached a terminal outcome in this run.
    pub fn processed(&self) -> usize {
        self.persisted.len() + self.skipped.len()
    }
}
