//! Detection error types.

use std::time::Duration;
use thiserror::Error;

pub type DetectResult<T> = Result<T, DetectError>;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Backend request failed: {0}")]
    RequestFailed(String),

    #[error("Backend returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Adapter timed out after {0:?}")]
    Timeout(Duration),

    #[error("Adapter panicked: {0}")]
    Panicked(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DetectError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    pub fn image(msg: impl Into<String>) -> Self {
        Self::Image(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if the same call could succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            DetectError::RequestFailed(_) | DetectError::Timeout(_) => true,
            DetectError::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
