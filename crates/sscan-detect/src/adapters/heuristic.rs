//! Deterministic last-resort adapter.
//!
//! Emits at most one detection per class, using a fixed confidence and box
//! per class. A class is reported when the file name mentions it or, for the
//! priority classes, when its signal color covers enough of the image. The
//! same input always produces the same output.

use async_trait::async_trait;
use sscan_models::{BoundingBox, CanonicalLabel, SourceStrategy};
use tracing::debug;

use super::{AdapterOutcome, AdapterRequest, DetectionAdapter};
use crate::error::DetectResult;
use crate::normalizer::RawDetection;
use crate::signals::keyword_hits;

const ORIGINAL_CLASS: &str = "heuristic";

/// Fixed confidence and box reported for `label`.
pub fn fallback_for(label: CanonicalLabel) -> (f64, BoundingBox) {
    match label {
        CanonicalLabel::Toolbox => (0.85, BoundingBox::new(0.2, 0.2, 0.4, 0.3)),
        CanonicalLabel::FireExtinguisher => (0.92, BoundingBox::new(0.7, 0.3, 0.25, 0.5)),
        CanonicalLabel::OxygenTank => (0.78, BoundingBox::new(0.4, 0.6, 0.3, 0.3)),
        CanonicalLabel::Astronaut => (0.70, BoundingBox::new(0.35, 0.1, 0.3, 0.8)),
    }
}

#[derive(Debug, Default, Clone)]
pub struct HeuristicAdapter;

impl HeuristicAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DetectionAdapter for HeuristicAdapter {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::Heuristic
    }

    async fn try_detect(&self, request: &AdapterRequest) -> DetectResult<AdapterOutcome> {
        let mut hits = request
            .file_name()
            .map(|name| keyword_hits(name, CanonicalLabel::ALL))
            .unwrap_or_default();

        if let Some(signals) = request.color_signals().await {
            for label in signals.present() {
                if label.is_priority() && !hits.contains(&label) {
                    hits.push(label);
                }
            }
        }

        // Report in vocabulary order regardless of which signal fired first.
        let detections: Vec<RawDetection> = CanonicalLabel::ALL
            .iter()
            .copied()
            .filter(|label| hits.contains(label))
            .map(|label| {
                let (confidence, bbox) = fallback_for(label);
                RawDetection::new(label.as_str(), confidence, bbox).with_original_class(ORIGINAL_CLASS)
            })
            .collect();

        debug!(count = detections.len(), "Heuristic adapter finished");
        Ok(AdapterOutcome::Detections(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::tests::red_blue_png;
    use sscan_models::ImageInput;

    async fn run(input: ImageInput) -> Vec<RawDetection> {
        match HeuristicAdapter::new()
            .try_detect(&AdapterRequest::new(input))
            .await
            .unwrap()
        {
            AdapterOutcome::Detections(d) => d,
            AdapterOutcome::Unavailable(_) => panic!("heuristic is always available"),
        }
    }

    #[tokio::test]
    async fn test_filename_keyword() {
        let detections = run(ImageInput::new(b"x".to_vec()).with_file_name("fire_extinguisher.jpg")).await;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_name, "fire extinguisher");
        assert_eq!(detections[0].confidence, 0.92);
        assert_eq!(detections[0].bounding_box, BoundingBox::new(0.7, 0.3, 0.25, 0.5));
    }

    #[tokio::test]
    async fn test_filename_substrings_are_not_keywords() {
        assert!(run(ImageInput::new(b"x".to_vec()).with_file_name("screwdriver_set.jpg")).await.is_empty());
    }

    #[tokio::test]
    async fn test_color_signals_one_per_class() {
        let detections = run(ImageInput::new(red_blue_png(32, 32)).with_file_name("red_extinguisher.png")).await;
        let labels: Vec<&str> = detections.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(labels, vec!["fire extinguisher", "oxygen tank"]);
    }

    #[tokio::test]
    async fn test_deterministic_and_never_fails() {
        let input = ImageInput::new(red_blue_png(20, 20));
        let a = run(input.clone()).await;
        let b = run(input).await;
        assert_eq!(a, b);

        assert!(run(ImageInput::new(b"not an image".to_vec())).await.is_empty());
    }

    #[test]
    fn test_fallback_boxes_are_valid() {
        for label in CanonicalLabel::ALL {
            let (confidence, bbox) = fallback_for(*label);
            assert!((0.0..=1.0).contains(&confidence));
            assert!(bbox.is_valid());
        }
    }
}
