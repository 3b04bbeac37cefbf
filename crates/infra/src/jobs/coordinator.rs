//! Claim-generate-validate-persist loop over one batch of work items.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use adprompt_ai::{PromptTemplate, ResponseValidator, TextGenerator};
use adprompt_core::RunId;
use adprompt_products::WorkItem;

use super::types::{BatchConfig, BatchReport, RecordOutcome, SkipReason};
use crate::ai::{FatalSessionError, GenerationSession, SessionOutcome};
use crate::work_store::{WorkItemStore, WorkStoreError};

/// A run that ended early.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The backend session became unusable. Results persisted before the abort
    /// stay in place; `partial` reports them.
    #[error("{source}; batch aborted after {} record(s)", .partial.processed())]
    FatalSession {
        #[source]
        source: FatalSessionError,
        partial: Box<BatchReport>,
    },
}

impl BatchError {
    pub fn partial_report(&self) -> &BatchReport {
        match self {
            BatchError::FatalSession { partial, .. } => partial,
        }
    }
}

/// Drives one batch: claim, then for each record render, generate with
/// retries, validate and persist, strictly one record at a time.
pub struct BatchCoordinator<S, G> {
    store: S,
    generator: G,
    template: PromptTemplate,
    validator: ResponseValidator,
    config: BatchConfig,
    run_id: RunId,
}

impl<S, G> BatchCoordinator<S, G>
where
    S: WorkItemStore,
    G: TextGenerator,
{
    pub fn new(store: S, generator: G, template: PromptTemplate, config: BatchConfig) -> Self {
        let validator = ResponseValidator::new(template.echo_marker());
        Self {
            store,
            generator,
            template,
            validator,
            config,
            run_id: RunId::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Claim up to `batch_limit` items, process at most `record_cap` of them.
    ///
    /// Per-record failures never abort the batch. Only a fatal session error
    /// does, and then no further store call is made.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(
        &self,
        batch_limit: usize,
        record_cap: Option<usize>,
    ) -> Result<BatchReport, BatchError> {
        let mut report = BatchReport::new(self.run_id);

        if batch_limit == 0 {
            info!("batch limit is zero; nothing claimed");
            report.finish();
            return Ok(report);
        }

        let mut items = self.store.claim_batch(batch_limit).await;
        report.claimed = items.len();
        info!(claimed = items.len(), batch_limit, "claim finished");

        if let Some(cap) = record_cap {
            if items.len() > cap {
                info!(cap, dropped = items.len() - cap, "record cap applied");
                items.truncate(cap);
            }
        }
        report.considered = items.len();

        let total = items.len();
        let mut pace_before_next = false;

        for (index, item) in items.iter().enumerate() {
            if pace_before_next && !self.config.pacing.is_zero() {
                info!(pacing_secs = self.config.pacing.as_secs_f64(), "pacing before next record");
                tokio::time::sleep(self.config.pacing).await;
            }

            let id = item.id_typed();
            info!(item_id = %id, position = index + 1, total, "processing record");

            let mut signals = 0;
            let processed = AssertUnwindSafe(self.process(item, &mut signals))
                .catch_unwind()
                .await;
            report.session_invalid_signals += signals;

            let outcome = match processed {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(fatal)) => {
                    error!(
                        item_id = %id,
                        error = %fatal,
                        remaining = total - index - 1,
                        "backend session unusable; aborting batch"
                    );
                    report.finish();
                    return Err(BatchError::FatalSession {
                        source: fatal,
                        partial: Box::new(report),
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(item_id = %id, panic = %message, "record processing panicked; continuing");
                    RecordOutcome::Skipped(SkipReason::Panicked { message })
                }
            };

            pace_before_next = outcome.reached_backend();
            report.record(id, outcome);
        }

        report.finish();
        info!(
            claimed = report.claimed,
            considered = report.considered,
            persisted = report.persisted.len(),
            skipped = report.skipped.len(),
            session_invalid_signals = report.session_invalid_signals,
            "batch finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        item: &WorkItem,
        signals: &mut u32,
    ) -> Result<RecordOutcome, FatalSessionError> {
        let id = item.id_typed();

        let prompt = match self.template.render(item) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(item_id = %id, error = %e, "skipping record");
                return Ok(RecordOutcome::Skipped(SkipReason::MissingTitle));
            }
        };

        let mut session =
            GenerationSession::new(&self.generator, &self.validator, &self.config.retry, id);
        let result = session.run(&prompt).await;
        *signals += session.session_invalid_signals();

        match result? {
            SessionOutcome::Succeeded { output, history } => {
                let attempts = history.len() as u32;
                if let Some(parts) = output.result() {
                    debug!(item_id = %id, part1 = %preview(&parts.part1), part2 = %preview(&parts.part2), "generated prompt");
                }

                match self.store.persist_result(id, &output.payload).await {
                    Ok(()) => {
                        info!(item_id = %id, attempts, "result persisted");
                        Ok(RecordOutcome::Persisted { attempts })
                    }
                    Err(WorkStoreError::AlreadyCompleted(_)) => {
                        warn!(item_id = %id, "row already has a result; left untouched");
                        Ok(RecordOutcome::Skipped(SkipReason::AlreadyCompleted))
                    }
                    Err(e) => {
                        error!(item_id = %id, error = %e, "persist failed; record stays claimed");
                        Ok(RecordOutcome::Skipped(SkipReason::PersistFailed {
                            error: e.to_string(),
                        }))
                    }
                }
            }
            SessionOutcome::Exhausted { history } => {
                let attempts = history.len() as u32;
                let policy = self.config.on_exhausted;
                if let Err(e) = self.store.settle_exhausted(id, policy).await {
                    warn!(item_id = %id, %policy, error = %e, "could not apply exhaustion policy");
                }
                warn!(item_id = %id, attempts, %policy, "record skipped after exhausting retries");
                Ok(RecordOutcome::Skipped(SkipReason::Exhausted { attempts }))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 80;
    let mut out: String = text.chars().take(MAX_CHARS).collect();
    if text.chars().count() > MAX_CHARS {
        out.push_str("...");
    }
    out
}
