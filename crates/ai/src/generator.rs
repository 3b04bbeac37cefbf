use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Classification of a failed generation call.
///
/// Backends translate their transport-level signals into one of these kinds at
/// the boundary, so the retry logic never inspects error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationErrorKind {
    /// The session credentials are no longer accepted. Every further call in
    /// this run will fail the same way.
    SessionInvalid,
    /// The backend asked us to slow down.
    RateLimited,
    /// The collaborator's own timeout elapsed.
    Timeout,
    /// Connection-level failure (DNS, TLS, reset).
    Transport,
    /// Any other backend failure.
    Backend,
}

impl GenerationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationErrorKind::SessionInvalid => "session_invalid",
            GenerationErrorKind::RateLimited => "rate_limited",
            GenerationErrorKind::Timeout => "timeout",
            GenerationErrorKind::Transport => "transport",
            GenerationErrorKind::Backend => "backend",
        }
    }
}

impl core::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to the text-generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn session_invalid(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::SessionInvalid, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Transport, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Backend, message)
    }

    pub fn is_session_invalid(&self) -> bool {
        self.kind == GenerationErrorKind::SessionInvalid
    }
}

/// A session-oriented text-generation backend: one prompt in, one free-text
/// response out.
///
/// Implementations own their session; the caller acquires it once per run and
/// releases it when the run ends.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Human-readable backend/model name for logs.
    fn backend_name(&self) -> &str;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt).await
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
}
