//! Axum HTTP server for the detection cascade.
//!
//! This crate provides:
//! - `POST /api/detect` over the raw image body
//! - `GET /api/training/stats` for the accumulated dataset
//! - Health/readiness checks and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
