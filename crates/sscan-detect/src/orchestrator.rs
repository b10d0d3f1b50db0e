//! Detection orchestrator.
//!
//! Runs the adapters in priority order and stops at the first one that returns
//! at least one valid detection. Every adapter call is bounded by a timeout
//! and isolated from panics, so a misbehaving backend costs at most its
//! timeout and an audit entry. High-confidence winners are recorded as
//! training samples before `detect()` returns.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use sscan_models::{
    AdapterAttempt, AttemptOutcome, DetectionResult, ImageInput, SampleLabel, SourceStrategy, TrainingStats,
};
use sscan_training::{ModelHandle, TrainingAccumulator};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{
    AdapterOutcome, AdapterRequest, CloudVisionAdapter, DetectionAdapter, GeneralModelAdapter, HeuristicAdapter,
    SpecializedModelAdapter,
};
use crate::config::{CascadeConfig, CloudVisionConfig, GeneralModelConfig};
use crate::error::{DetectError, DetectResult};
use crate::metrics;
use crate::normalizer::{LabelNormalizer, MatchKind, NormalizedDetection};

/// Result of running one adapter.
struct AdapterRun {
    outcome: AttemptOutcome,
    detail: Option<String>,
    detections: Vec<NormalizedDetection>,
}

impl AdapterRun {
    fn without_detections(outcome: AttemptOutcome, detail: Option<String>) -> Self {
        Self {
            outcome,
            detail,
            detections: Vec::new(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// The cascade.
pub struct DetectionOrchestrator {
    config: CascadeConfig,
    adapters: Vec<Arc<dyn DetectionAdapter>>,
    normalizer: LabelNormalizer,
    accumulator: Option<Arc<TrainingAccumulator>>,
}

impl DetectionOrchestrator {
    /// Cascade over `adapters`, tried in the given order.
    pub fn new(config: CascadeConfig, adapters: Vec<Arc<dyn DetectionAdapter>>) -> Self {
        let normalizer = LabelNormalizer::new(config.review_threshold);
        Self {
            config,
            adapters,
            normalizer,
            accumulator: None,
        }
    }

    /// Build the standard adapters in `config.order`.
    pub fn from_config(
        config: CascadeConfig,
        general: GeneralModelConfig,
        cloud: CloudVisionConfig,
        model: ModelHandle,
    ) -> DetectResult<Self> {
        let mut adapters: Vec<Arc<dyn DetectionAdapter>> = Vec::with_capacity(config.order.len());
        for strategy in &config.order {
            let adapter: Arc<dyn DetectionAdapter> = match strategy {
                SourceStrategy::Specialized => Arc::new(SpecializedModelAdapter::new(model.clone())),
                SourceStrategy::General => Arc::new(GeneralModelAdapter::new(general.clone())?),
                SourceStrategy::CloudVision => Arc::new(CloudVisionAdapter::new(cloud.clone())?),
                SourceStrategy::Heuristic => Arc::new(HeuristicAdapter::new()),
                SourceStrategy::None => {
                    return Err(DetectError::config_error("'none' is not a cascade strategy"));
                }
            };
            adapters.push(adapter);
        }

        info!(
            order = ?config.order.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            acceptance_threshold = config.acceptance_threshold,
            "Detection cascade configured"
        );
        Ok(Self::new(config, adapters))
    }

    /// Record accepted detections into `accumulator`.
    pub fn with_accumulator(mut self, accumulator: Arc<TrainingAccumulator>) -> Self {
        self.accumulator = Some(accumulator);
        self
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Strategies in cascade order.
    pub fn order(&self) -> Vec<SourceStrategy> {
        self.adapters.iter().map(|a| a.strategy()).collect()
    }

    /// Current training statistics, if training is attached.
    pub fn training_stats(&self) -> Option<TrainingStats> {
        self.accumulator.as_ref().map(|acc| acc.stats())
    }

    /// Run the cascade over one image. Never fails; partial failures end up in
    /// the result's attempt log.
    pub async fn detect(&self, image: ImageInput) -> DetectionResult {
        let span = info_span!(
            "detect",
            request_id = %Uuid::new_v4(),
            bytes = image.bytes.len(),
        );
        self.detect_inner(image).instrument(span).await
    }

    async fn detect_inner(&self, image: ImageInput) -> DetectionResult {
        if image.is_empty() {
            warn!("Rejecting empty image");
            return DetectionResult::rejected("Image data is empty");
        }

        let started = Instant::now();
        let request = AdapterRequest::new(image);
        let mut attempts = Vec::with_capacity(self.adapters.len());
        let mut winner: Option<(SourceStrategy, Vec<NormalizedDetection>)> = None;

        for adapter in &self.adapters {
            let strategy = adapter.strategy();
            if winner.is_some() {
                attempts.push(AdapterAttempt {
                    strategy,
                    outcome: AttemptOutcome::Skipped,
                    detail: None,
                    elapsed_ms: 0,
                });
                continue;
            }

            let adapter_started = Instant::now();
            let run = self.run_adapter(adapter.as_ref(), &request).await;
            metrics::record_attempt(strategy, run.outcome);
            attempts.push(AdapterAttempt {
                strategy,
                outcome: run.outcome,
                detail: run.detail,
                elapsed_ms: adapter_started.elapsed().as_millis() as u64,
            });

            if run.outcome == AttemptOutcome::Found {
                winner = Some((strategy, run.detections));
            }
        }

        let result = match winner {
            Some((strategy, detections)) => {
                self.accumulate(&request, &detections).await;
                let detections = detections.into_iter().map(|n| n.detection).collect();
                DetectionResult::from_strategy(strategy, detections, attempts)
            }
            None => {
                info!("All detection strategies came back empty");
                DetectionResult::exhausted(attempts)
            }
        };

        let elapsed = started.elapsed();
        metrics::record_detect(result.source_strategy, result.count(), elapsed.as_secs_f64());
        info!(
            strategy = %result.source_strategy,
            count = result.count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Detection finished"
        );
        result
    }

    async fn run_adapter(&self, adapter: &dyn DetectionAdapter, request: &AdapterRequest) -> AdapterRun {
        let timeout = adapter.timeout().unwrap_or(self.config.adapter_timeout);
        let call = AssertUnwindSafe(adapter.try_detect(request)).catch_unwind();

        let result = match tokio::time::timeout(timeout, call).await {
            Err(_) => Err(DetectError::Timeout(timeout)),
            Ok(Err(panic)) => Err(DetectError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result,
        };

        match result {
            Ok(AdapterOutcome::Unavailable(reason)) => {
                debug!(adapter = adapter.name(), reason = %reason, "Adapter unavailable");
                AdapterRun::without_detections(AttemptOutcome::Unavailable, Some(reason))
            }
            Ok(AdapterOutcome::Detections(raw)) => {
                let reported = raw.len();
                let detections: Vec<NormalizedDetection> =
                    raw.into_iter().filter_map(|r| self.normalizer.apply(r)).collect();
                if detections.len() < reported {
                    warn!(
                        adapter = adapter.name(),
                        dropped = reported - detections.len(),
                        "Dropped detections with invalid confidence or box"
                    );
                }
                if detections.is_empty() {
                    debug!(adapter = adapter.name(), "Adapter found nothing");
                    AdapterRun::without_detections(AttemptOutcome::Empty, None)
                } else {
                    AdapterRun {
                        outcome: AttemptOutcome::Found,
                        detail: None,
                        detections,
                    }
                }
            }
            Err(e) => {
                warn!(adapter = adapter.name(), error = %e, "Adapter failed, continuing cascade");
                AdapterRun::without_detections(AttemptOutcome::Failed, Some(e.to_string()))
            }
        }
    }

    /// Record winning detections at or above the acceptance threshold.
    ///
    /// Default-bucket labels are never recorded. Persistence failures are
    /// logged and do not affect the result.
    async fn accumulate(&self, request: &AdapterRequest, detections: &[NormalizedDetection]) {
        let Some(accumulator) = &self.accumulator else {
            return;
        };

        let labels: Vec<SampleLabel> = detections
            .iter()
            .filter(|n| n.matched != MatchKind::Default)
            .filter(|n| n.detection.confidence >= self.config.acceptance_threshold)
            .map(|n| SampleLabel::new(n.detection.label, n.detection.bounding_box))
            .collect();
        if labels.is_empty() {
            return;
        }

        match accumulator.record(request.bytes(), &labels).await {
            Ok(sample) => debug!(
                image = %sample.image_path,
                labels = sample.labels.len(),
                "Accepted detections recorded for training"
            ),
            Err(e) => {
                metrics::record_sample_failure();
                error!(error = %e, "Failed to record training sample");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::RawDetection;
    use async_trait::async_trait;
    use sscan_models::BoundingBox;
    use std::time::Duration;

    struct Fixed(SourceStrategy, Vec<RawDetection>);

    #[async_trait]
    impl DetectionAdapter for Fixed {
        fn strategy(&self) -> SourceStrategy {
            self.0
        }

        async fn try_detect(&self, _request: &AdapterRequest) -> DetectResult<AdapterOutcome> {
            Ok(AdapterOutcome::Detections(self.1.clone()))
        }
    }

    struct Panics;

    #[async_trait]
    impl DetectionAdapter for Panics {
        fn strategy(&self) -> SourceStrategy {
            SourceStrategy::Specialized
        }

        async fn try_detect(&self, _request: &AdapterRequest) -> DetectResult<AdapterOutcome> {
            panic!("model exploded");
        }
    }

    struct Hangs;

    #[async_trait]
    impl DetectionAdapter for Hangs {
        fn strategy(&self) -> SourceStrategy {
            SourceStrategy::CloudVision
        }

        async fn try_detect(&self, _request: &AdapterRequest) -> DetectResult<AdapterOutcome> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(AdapterOutcome::empty())
        }
    }

    fn toolbox() -> RawDetection {
        RawDetection::new("toolbox", 0.9, BoundingBox::new(0.1, 0.1, 0.3, 0.3))
    }

    fn image() -> ImageInput {
        ImageInput::new(b"bytes".to_vec())
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_skipped() {
        let adapters: Vec<Arc<dyn DetectionAdapter>> =
            vec![Arc::new(Panics), Arc::new(Fixed(SourceStrategy::Heuristic, vec![toolbox()]))];
        let result = DetectionOrchestrator::new(CascadeConfig::default(), adapters)
            .detect(image())
            .await;

        assert!(result.success);
        assert_eq!(result.source_strategy, SourceStrategy::Heuristic);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failed);
        assert!(result.attempts[0].detail.as_deref().unwrap().contains("model exploded"));
    }

    #[tokio::test]
    async fn test_timeout_is_adapter_failure() {
        let config = CascadeConfig::default().with_adapter_timeout(Duration::from_millis(20));
        let adapters: Vec<Arc<dyn DetectionAdapter>> =
            vec![Arc::new(Hangs), Arc::new(Fixed(SourceStrategy::Heuristic, vec![toolbox()]))];
        let result = DetectionOrchestrator::new(config, adapters).detect(image()).await;

        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failed);
        assert_eq!(result.count(), 1);
    }

    #[tokio::test]
    async fn test_later_adapters_marked_skipped() {
        let adapters: Vec<Arc<dyn DetectionAdapter>> = vec![
            Arc::new(Fixed(SourceStrategy::Specialized, vec![toolbox()])),
            Arc::new(Panics),
        ];
        let result = DetectionOrchestrator::new(CascadeConfig::default(), adapters)
            .detect(image())
            .await;

        assert_eq!(result.source_strategy, SourceStrategy::Specialized);
        assert_eq!(result.attempts[1].outcome, AttemptOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_invalid_only_counts_as_empty() {
        let bad = RawDetection::new("toolbox", 1.4, BoundingBox::new(0.1, 0.1, 0.3, 0.3));
        let adapters: Vec<Arc<dyn DetectionAdapter>> = vec![Arc::new(Fixed(SourceStrategy::General, vec![bad]))];
        let result = DetectionOrchestrator::new(CascadeConfig::default(), adapters)
            .detect(image())
            .await;

        assert!(result.success);
        assert!(result.detections.is_empty());
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Empty);
    }

    #[tokio::test]
    async fn test_empty_image_rejected() {
        let result = DetectionOrchestrator::new(CascadeConfig::default(), Vec::new())
            .detect(ImageInput::default())
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_from_config_follows_order() {
        let config = CascadeConfig::default().with_order(vec![SourceStrategy::Heuristic, SourceStrategy::General]);
        let orchestrator = DetectionOrchestrator::from_config(
            config,
            GeneralModelConfig::default(),
            CloudVisionConfig::default(),
            ModelHandle::new("/tmp/none.json"),
        )
        .unwrap();
        assert_eq!(orchestrator.order(), vec![SourceStrategy::Heuristic, SourceStrategy::General]);
    }
}
