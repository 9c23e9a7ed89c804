//! Assistant provider error types

use thiserror::Error;

/// Provider error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AssistantError {
    pub kind: AssistantErrorKind,
    pub message: String,
}

impl AssistantError {
    pub fn new(kind: AssistantErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::Network, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::InvalidRequest, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::ServerError, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(AssistantErrorKind::Decode, message)
    }

    /// Classify a non-2xx HTTP response
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            401 | 403 => Self::new(
                AssistantErrorKind::Auth,
                format!("Authentication failed: {message}"),
            ),
            404 => Self::not_found(format!("Not found: {message}")),
            400 | 422 => Self::invalid_request(format!("Invalid request: {message}")),
            429 => Self::new(
                AssistantErrorKind::RateLimit,
                format!("Rate limit exceeded: {message}"),
            ),
            500..=599 => Self::server_error(format!("Server error: {message}")),
            _ => Self::new(
                AssistantErrorKind::Unknown,
                format!("HTTP {status}: {message}"),
            ),
        }
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else if e.is_decode() {
            Self::decode(format!("Failed to decode response: {e}"))
        } else {
            Self::network(format!("Request failed: {e}"))
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantErrorKind {
    /// Transport failure, timeout - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Unknown thread, run or assistant (404)
    NotFound,
    /// Bad request (400, 422)
    InvalidRequest,
    /// Response body did not match the expected shape
    Decode,
    Unknown,
}

impl AssistantErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }

    /// The provider rejected a reference we sent (thread id, run id)
    pub fn is_rejection(self) -> bool {
        matches!(self, Self::NotFound | Self::InvalidRequest)
    }
}
