//! Training dataset handlers.

use axum::extract::State;
use axum::Json;
use sscan_models::TrainingStats;

use crate::state::AppState;

/// Current accumulator counters and model state.
pub async fn training_stats(State(state): State<AppState>) -> Json<TrainingStats> {
    Json(state.accumulator.stats())
}
