//! Application state.

use std::sync::Arc;

use sscan_detect::{CascadeConfig, CloudVisionConfig, DetectionOrchestrator, GeneralModelConfig};
use sscan_training::{TrainingAccumulator, TrainingConfig};

use crate::config::ApiConfig;
use crate::error::{hide_internal_details, ApiError, ApiResult};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Arc<DetectionOrchestrator>,
    pub accumulator: Arc<TrainingAccumulator>,
}

impl AppState {
    /// Create new application state from the environment.
    pub async fn new(config: ApiConfig) -> ApiResult<Self> {
        let accumulator = Arc::new(TrainingAccumulator::open(TrainingConfig::from_env()).await?);
        let orchestrator = DetectionOrchestrator::from_config(
            CascadeConfig::from_env(),
            GeneralModelConfig::from_env(),
            CloudVisionConfig::from_env(),
            accumulator.model().clone(),
        )
        .map_err(|e| ApiError::internal(format!("Failed to build detection cascade: {}", e)))?
        .with_accumulator(Arc::clone(&accumulator));

        Ok(Self::from_parts(config, Arc::new(orchestrator), accumulator))
    }

    pub fn from_parts(
        config: ApiConfig,
        orchestrator: Arc<DetectionOrchestrator>,
        accumulator: Arc<TrainingAccumulator>,
    ) -> Self {
        hide_internal_details(config.is_production());
        Self {
            config,
            orchestrator,
            accumulator,
        }
    }
}
