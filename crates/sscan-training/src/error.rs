//! Training error types.

use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Sample has no labels")]
    EmptySample,

    #[error("Image data is empty")]
    EmptyImage,

    #[error("Invalid class manifest at {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("Invalid label line in {path}: {line}")]
    LabelLine { path: PathBuf, line: String },

    #[error("Retrain failed: {0}")]
    RetrainFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrainingError {
    pub fn retrain_failed(msg: impl Into<String>) -> Self {
        Self::RetrainFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if retrying the operation could help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrainingError::RetrainFailed(_) | TrainingError::Io(_))
    }
}
