//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use sscan_models::ModelState;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness response. The cascade always has the heuristic to fall back on,
/// so this reports what is configured rather than failing.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub status: String,
    pub cascade: Vec<String>,
    pub model: ModelState,
    pub retrain_running: bool,
}

/// Readiness check endpoint.
pub async fn ready(State(state): State<AppState>) -> Json<ReadinessResponse> {
    Json(ReadinessResponse {
        status: "ready".to_string(),
        cascade: state
            .orchestrator
            .order()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
        model: state.accumulator.model().state(),
        retrain_running: state.accumulator.trigger().is_running(),
    })
}
