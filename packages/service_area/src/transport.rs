//! HTTP transport for solver requests.
//!
//! [`SolverTransport`] is the seam the processor calls through;
//! [`HttpTransport`] is the `reqwest` implementation. Requests are sent
//! once. Timeouts and non-success statuses are failures, and retrying is
//! left to whoever drives the stage.

use async_trait::async_trait;
use thiserror::Error;

use crate::request::SolverRequest;

/// Maximum length of the response body preview kept in errors.
const BODY_PREVIEW_LEN: usize = 500;

/// Errors talking to the solver.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No response arrived within the request timeout.
    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout {
        /// Target URL.
        url: String,
        /// Timeout that elapsed.
        timeout: std::time::Duration,
    },

    /// The solver answered with a non-success status.
    #[error("Solver returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        body: String,
    },
}

/// Executes solver requests and returns the raw response body.
#[async_trait]
pub trait SolverTransport: Send + Sync {
    /// Sends `request` and returns the response body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on connection failure, timeout, or a
    /// non-success status.
    async fn execute(&self, request: &SolverRequest) -> Result<String, TransportError>;
}

/// [`SolverTransport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SolverTransport for HttpTransport {
    async fn execute(&self, request: &SolverRequest) -> Result<String, TransportError> {
        for (key, value) in &request.params {
            if key == "token" {
                log::debug!("Adding form parameter {key}=<redacted>");
            } else {
                log::debug!("Adding form parameter {key}={value}");
            }
        }

        let mut builder = self
            .client
            .post(&request.url)
            .form(&request.params)
            .header("charset", "utf-8")
            .timeout(request.timeout);

        if !request.referer.is_empty() {
            builder = builder.header(reqwest::header::REFERER, &request.referer);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(e, request))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| classify(e, request))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: preview(&body),
            });
        }

        Ok(body)
    }
}

fn classify(error: reqwest::Error, request: &SolverRequest) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: request.url.clone(),
            timeout: request.timeout,
        }
    } else {
        TransportError::Http(error)
    }
}

fn preview(body: &str) -> String {
    if body.len() > BODY_PREVIEW_LEN {
        let mut end = BODY_PREVIEW_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
