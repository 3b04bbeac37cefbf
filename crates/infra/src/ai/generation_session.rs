use thiserror::Error;
use tracing::{debug, info, warn};

use adprompt_ai::{GenerationError, Rejection, ResponseValidator, TextGenerator, ValidatedOutput};
use adprompt_core::WorkItemId;

use crate::jobs::RetryPolicy;

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Call number `attempt` (1-based) is in flight.
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed; waiting out the retry delay.
    Retrying { attempt: u32 },
    Succeeded,
    Exhausted,
    /// The backend session was reported invalid on the final attempt.
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Exhausted | SessionState::Aborted
        )
    }
}

/// Why one attempt did not produce an accepted response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptFailure {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("transport: {0}")]
    Transport(#[from] GenerationError),
}

/// One entry of a session's attempt history; `failure` is `None` for the
/// accepted attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub failure: Option<AttemptFailure>,
}

/// Terminal, non-fatal result of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Succeeded {
        output: ValidatedOutput,
        history: Vec<AttemptRecord>,
    },
    Exhausted {
        history: Vec<AttemptRecord>,
    },
}

impl SessionOutcome {
    pub fn attempts(&self) -> u32 {
        let history = match self {
            SessionOutcome::Succeeded { history, .. } => history,
            SessionOutcome::Exhausted { history } => history,
        };
        history.last().map(|r| r.attempt).unwrap_or(0)
    }
}

/// The backend session is unusable; the remaining batch must not continue.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("backend session invalid on final attempt {attempt} for item {item_id}: {source}")]
pub struct FatalSessionError {
    pub item_id: WorkItemId,
    pub attempt: u32,
    #[source]
    pub source: GenerationError,
}

/// Bounded-retry interaction with the generation backend for one work item.
///
/// Every call is judged by the [`ResponseValidator`]. Rejections and transport
/// failures consume the budget alike; the delay from the [`RetryPolicy`] is
/// taken between attempts only.
pub struct GenerationSession<'a, G: TextGenerator + ?Sized> {
    generator: &'a G,
    validator: &'a ResponseValidator,
    policy: &'a RetryPolicy,
    item_id: WorkItemId,
    state: SessionState,
    history: Vec<AttemptRecord>,
    session_invalid_signals: u32,
}

impl<'a, G: TextGenerator + ?Sized> GenerationSession<'a, G> {
    pub fn new(
        generator: &'a G,
        validator: &'a ResponseValidator,
        policy: &'a RetryPolicy,
        item_id: WorkItemId,
    ) -> Self {
        Self {
            generator,
            validator,
            policy,
            item_id,
            state: SessionState::Idle,
            history: Vec::new(),
            session_invalid_signals: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// Session-invalid errors seen on attempts that were not the last.
    pub fn session_invalid_signals(&self) -> u32 {
        self.session_invalid_signals
    }

    /// Drive the session to a terminal state.
    pub async fn run(&mut self, prompt: &str) -> Result<SessionOutcome, FatalSessionError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let item_id = self.item_id;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.state = SessionState::Attempting { attempt };
            info!(%item_id, attempt, max_attempts, backend = self.generator.backend_name(), "requesting generation");

            let failure = match self.generator.generate(prompt).await {
                Ok(raw) => match self.validator.accept(&raw) {
                    Ok(output) => {
                        self.history.push(AttemptRecord {
                            attempt,
                            failure: None,
                        });
                        self.state = SessionState::Succeeded;
                        info!(%item_id, attempt, payload_len = output.payload.len(), "response accepted");
                        return Ok(SessionOutcome::Succeeded {
                            output,
                            history: self.history.clone(),
                        });
                    }
                    Err(rejection) => {
                        warn!(%item_id, attempt, reason = rejection.label(), detail = %rejection, "response rejected");
                        AttemptFailure::Rejected(rejection)
                    }
                },
                Err(err) if err.is_session_invalid() => {
                    if self.policy.is_final(attempt) {
                        self.history.push(AttemptRecord {
                            attempt,
                            failure: Some(AttemptFailure::Transport(err.clone())),
                        });
                        self.state = SessionState::Aborted;
                        return Err(FatalSessionError {
                            item_id,
                            attempt,
                            source: err,
                        });
                    }
                    self.session_invalid_signals += 1;
                    warn!(
                        %item_id,
                        attempt,
                        error = %err.message,
                        "backend reports the session as invalid; refresh the session credentials if this persists"
                    );
                    AttemptFailure::Transport(err)
                }
                Err(err) => {
                    warn!(%item_id, attempt, kind = %err.kind, error = %err.message, "generation call failed");
                    AttemptFailure::Transport(err)
                }
            };

            self.history.push(AttemptRecord {
                attempt,
                failure: Some(failure),
            });

            if !self.policy.should_retry(attempt) {
                self.state = SessionState::Exhausted;
                warn!(%item_id, attempts = attempt, "retry budget exhausted");
                return Ok(SessionOutcome::Exhausted {
                    history: self.history.clone(),
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            self.state = SessionState::Retrying { attempt };
            debug!(%item_id, attempt, delay_ms = delay.as_millis() as u64, "waiting before retry");
            tokio::time::sleep(delay).await;
        }
    }
}
