//! Specialized-model adapter.
//!
//! Reads the descriptor installed by the retrain trigger through the shared
//! [`ModelHandle`]. Without a loaded model it reports unavailable and costs
//! nothing. With one, it scores the priority classes the model was trained on
//! from file-name keywords and color coverage, and places boxes from the color
//! region or the class's learned mean box.

use async_trait::async_trait;
use sscan_models::{BoundingBox, CanonicalLabel, SourceStrategy};
use sscan_training::ModelHandle;
use tracing::debug;

use super::{AdapterOutcome, AdapterRequest, DetectionAdapter};
use crate::error::DetectResult;
use crate::normalizer::RawDetection;
use crate::signals::{keyword_hits, ColorSignals, MIN_COLOR_FRACTION};

const KEYWORD_AND_COLOR_CONFIDENCE: f64 = 0.9;
const KEYWORD_CONFIDENCE: f64 = 0.8;
const COLOR_BASE_CONFIDENCE: f64 = 0.6;
const COLOR_MAX_CONFIDENCE: f64 = 0.85;

pub struct SpecializedModelAdapter {
    model: ModelHandle,
}

impl SpecializedModelAdapter {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }
}

/// Confidence for a class given which signals fired.
fn score(keyword: bool, color_fraction: f64) -> Option<f64> {
    let color = color_fraction >= MIN_COLOR_FRACTION;
    match (keyword, color) {
        (true, true) => Some(KEYWORD_AND_COLOR_CONFIDENCE),
        (true, false) => Some(KEYWORD_CONFIDENCE),
        (false, true) => Some((COLOR_BASE_CONFIDENCE + color_fraction * 0.5).min(COLOR_MAX_CONFIDENCE)),
        (false, false) => None,
    }
}

fn color_box(signals: Option<&ColorSignals>, label: CanonicalLabel) -> Option<BoundingBox> {
    signals?.region(label)?.bounding_box
}

#[async_trait]
impl DetectionAdapter for SpecializedModelAdapter {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::Specialized
    }

    async fn try_detect(&self, request: &AdapterRequest) -> DetectResult<AdapterOutcome> {
        let Some(descriptor) = self.model.descriptor() else {
            return Ok(AdapterOutcome::unavailable(format!(
                "no specialized model at {}",
                self.model.path().display()
            )));
        };

        let trained: Vec<CanonicalLabel> = CanonicalLabel::PRIORITY
            .iter()
            .copied()
            .filter(|label| descriptor.profile(*label).is_some())
            .collect();
        if trained.is_empty() {
            return Ok(AdapterOutcome::empty());
        }

        let keywords = request
            .file_name()
            .map(|name| keyword_hits(name, &trained))
            .unwrap_or_default();
        let signals = request.color_signals().await;

        let mut detections = Vec::new();
        for label in trained {
            let fraction = signals.as_deref().map_or(0.0, |s| s.fraction(label));
            let Some(confidence) = score(keywords.contains(&label), fraction) else {
                continue;
            };
            let bbox = color_box(signals.as_deref(), label)
                .filter(|_| fraction >= MIN_COLOR_FRACTION)
                .or_else(|| descriptor.profile(label).map(|p| p.mean_box));
            if let Some(bbox) = bbox {
                detections.push(
                    RawDetection::new(label.as_str(), confidence, bbox).with_original_class("specialized-model"),
                );
            }
        }

        debug!(count = detections.len(), "Specialized adapter finished");
        Ok(AdapterOutcome::Detections(detections))
    }
}
