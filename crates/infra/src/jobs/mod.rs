//! Batch job: claim, generate, validate, persist.
//!
//! ## Design
//!
//! - One run claims a bounded batch atomically, then processes it sequentially
//! - Per-record failures (render, exhaustion, persist, panic) are logged and skipped
//! - A fatal session error aborts the rest of the batch with a partial report
//! - Retry delays come from `RetryPolicy`; pacing separates records that hit the backend
//!
//! ## Components
//!
//! - `BatchCoordinator`: the per-run loop
//! - `BatchConfig`: retry, pacing and exhaustion policies
//! - `BatchReport`: what a run claimed, persisted and skipped

pub mod coordinator;
pub mod types;

pub use coordinator::{BatchCoordinator, BatchError};
pub use types::{
    BackoffStrategy, BatchConfig, BatchReport, RecordOutcome, RetryPolicy, SkipReason, SkippedItem,
};
