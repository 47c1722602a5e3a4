//! Chat provider error taxonomy.
//!
//! The set is closed and retry-classified: the Soul retries exactly the
//! subset [`ChatError::is_retryable`] admits, with jittered exponential
//! backoff, and surfaces everything else as a turn failure.

use thiserror::Error;

/// Errors a chat provider may produce.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Could not reach the API.
    #[error("API connection error: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("API request timed out: {0}")]
    Timeout(String),

    /// The stream ended without producing anything.
    #[error("API returned an empty response")]
    EmptyResponse,

    /// Non-success HTTP status.
    #[error("API returned status {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The response violated the expected protocol shape.
    #[error("API protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    /// Whether the Soul should retry the request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::EmptyResponse => true,
            Self::Status { code, .. } => matches!(code, 429 | 500 | 502 | 503),
            Self::Protocol(_) => false,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Result type for chat provider operations.
pub type ChatResult<T> = Result<T, ChatError>;
