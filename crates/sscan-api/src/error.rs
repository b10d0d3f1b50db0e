//! API error types.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use sscan_training::TrainingError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

static HIDE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Set from [`ApiConfig::is_production`](crate::ApiConfig::is_production) when state is built.
pub(crate) fn hide_internal_details(hide: bool) {
    HIDE_INTERNAL_DETAILS.store(hide, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Training(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self, hide_internal: bool) -> String {
        match self {
            ApiError::Internal(_) | ApiError::Training(_) if hide_internal => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.detail(HIDE_INTERNAL_DETAILS.load(Ordering::Relaxed));

        (status, Json(ErrorResponse { detail })).into_response()
    }
}
