//! Generation runners.
//!
//! A session wraps one work item's calls to the text-generation backend with
//! bounded retries and output validation. Session-invalid failures on the final
//! attempt escalate to [`FatalSessionError`]; everything else stays local to the
//! item.

pub mod generation_session;

pub use generation_session::{
    AttemptFailure, AttemptRecord, FatalSessionError, GenerationSession, SessionOutcome,
    SessionState,
};
