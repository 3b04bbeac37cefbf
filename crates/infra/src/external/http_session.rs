//! HTTP adapter for a session-oriented text-generation backend.
//!
//! Wire contract:
//!
//! | Call | Request | Success |
//! |------|---------|---------|
//! | initialise | `GET {base}/session` with both credentials as cookies | any 2xx |
//! | generate | `POST {base}/generate` with `{"model", "prompt"}` | `{"text": "..."}` |
//! | close | `DELETE {base}/session` | any 2xx |
//!
//! Failures are translated to [`GenerationErrorKind`] here and nowhere else.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use adprompt_ai::{GenerationError, GenerationErrorKind, TextGenerator};

use crate::config::{BackendConfig, SessionCredentials};

/// Body text the backend returns when it no longer accepts the session.
const INVALID_SESSION_MARKER: &str = "Invalid response";

/// Map a failed call to an error kind.
///
/// `status` is `None` when no HTTP response was received.
pub fn classify_failure(status: Option<u16>, body: &str) -> GenerationErrorKind {
    if body.contains(INVALID_SESSION_MARKER) {
        return GenerationErrorKind::SessionInvalid;
    }
    match status {
        Some(401 | 403 | 406) => GenerationErrorKind::SessionInvalid,
        Some(429) => GenerationErrorKind::RateLimited,
        Some(408 | 504) => GenerationErrorKind::Timeout,
        Some(_) => GenerationErrorKind::Backend,
        None => GenerationErrorKind::Transport,
    }
}

fn from_reqwest(operation: &str, err: reqwest::Error) -> GenerationError {
    let kind = if err.is_timeout() {
        GenerationErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        GenerationErrorKind::Transport
    } else if let Some(status) = err.status() {
        classify_failure(Some(status.as_u16()), "")
    } else if err.is_decode() {
        GenerationErrorKind::Backend
    } else {
        GenerationErrorKind::Transport
    };
    GenerationError::new(kind, format!("{operation}: {err}"))
}

/// Turn a non-2xx response into a classified error.
async fn ensure_success(operation: &str, response: Response) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let kind = classify_failure(Some(status.as_u16()), &body);
    let snippet: String = body.chars().take(200).collect();
    Err(GenerationError::new(
        kind,
        format!("{operation}: HTTP {}: {snippet}", status.as_u16()),
    ))
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

/// An initialised backend session.
///
/// Acquire with [`connect`](Self::connect) once per run; release with
/// [`close`](Self::close) on every exit path.
#[derive(Debug)]
pub struct HttpSessionGenerator {
    client: Client,
    config: BackendConfig,
    closed: AtomicBool,
}

impl HttpSessionGenerator {
    /// Present the credentials and initialise the session. Failure here is
    /// fatal to the run.
    #[instrument(skip(credentials), fields(backend = %config.base_url, model = %config.model, credential = %credentials.redacted()), err)]
    pub async fn connect(
        config: BackendConfig,
        credentials: &SessionCredentials,
    ) -> Result<Self, GenerationError> {
        let mut cookie = HeaderValue::from_str(&credentials.cookie_header()).map_err(|_| {
            GenerationError::session_invalid("credentials contain characters not allowed in a cookie")
        })?;
        cookie.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, cookie);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::transport(format!("http client: {e}")))?;

        let response = client
            .get(config.endpoint("session"))
            .send()
            .await
            .map_err(|e| from_reqwest("initialise", e))?;
        ensure_success("initialise", response).await?;

        info!("generation session initialised");
        Ok(Self {
            client,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// End the session. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), GenerationError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let response = self
            .client
            .delete(self.config.endpoint("session"))
            .send()
            .await
            .map_err(|e| from_reqwest("close", e))?;
        ensure_success("close", response).await?;
        debug!("generation session closed");
        Ok(())
    }
}

#[async_trait]
impl TextGenerator for HttpSessionGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GenerationError::session_invalid("session already closed"));
        }

        let response = self
            .client
            .post(self.config.endpoint("generate"))
            .json(&GenerateRequest {
                model: &self.config.model,
                prompt,
            })
            .send()
            .await
            .map_err(|e| from_reqwest("generate", e))?;
        let response = ensure_success("generate", response).await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| from_reqwest("generate", e))?;
        Ok(body.text)
    }

    fn backend_name(&self) -> &str {
        &self.config.model
    }
}
