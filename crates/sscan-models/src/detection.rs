//! Detection result types returned by the cascade.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::label::{CanonicalLabel, ObjectContext};
use crate::strategy::SourceStrategy;

/// Tolerance for float rounding when checking box bounds.
const BOUNDS_EPSILON: f64 = 1e-9;

/// A normalized rectangle (0.0 to 1.0) relative to the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    /// X coordinate of the top-left corner (0.0 = left, 1.0 = right)
    pub x: f64,
    /// Y coordinate of the top-left corner (0.0 = top, 1.0 = bottom)
    pub y: f64,
    /// Width of the rectangle (0.0 to 1.0)
    pub width: f64,
    /// Height of the rectangle (0.0 to 1.0)
    pub height: f64,
}

impl BoundingBox {
    /// Create a new normalized box. No validation is performed.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Convert a pixel-space `(x1, y1, x2, y2)` box into normalized coordinates.
    ///
    /// The box is clipped to the image first. Returns `None` for degenerate
    /// boxes, non-finite coordinates, or a zero-sized image.
    pub fn from_pixels(x1: f64, y1: f64, x2: f64, y2: f64, image_width: u32, image_height: u32) -> Option<Self> {
        if image_width == 0 || image_height == 0 {
            return None;
        }
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return None;
        }

        let w = f64::from(image_width);
        let h = f64::from(image_height);
        let (left, right) = (x1.min(x2).clamp(0.0, w), x1.max(x2).clamp(0.0, w));
        let (top, bottom) = (y1.min(y2).clamp(0.0, h), y1.max(y2).clamp(0.0, h));
        if right - left <= 0.0 || bottom - top <= 0.0 {
            return None;
        }

        Some(Self::new(left / w, top / h, (right - left) / w, (bottom - top) / h).fitted())
    }

    /// Check that the box has positive size and lies inside the unit square.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite())
            && self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.0 + BOUNDS_EPSILON
            && self.y + self.height <= 1.0 + BOUNDS_EPSILON
    }

    /// Trim width/height so the box never extends past the right or bottom edge.
    ///
    /// Absorbs float rounding from pixel division. Origin is clamped to [0, 1].
    pub fn fitted(self) -> Self {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let width = self.width.min(1.0 - x).max(0.0);
        let height = self.height.min(1.0 - y).max(0.0);
        Self { x, y, width, height }
    }

    /// Center point in normalized coordinates.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// A labeled, localized object in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: Uuid,
    pub label: CanonicalLabel,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub bounding_box: BoundingBox,
    /// Hex display color for the label.
    pub color: String,
    pub context: ObjectContext,
    /// Maintenance guidance for the label.
    pub guidance: String,
    /// Class name reported by the backend before normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_class: Option<String>,
    /// Anomaly flag set when the detection needs human review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
}

impl Detection {
    /// Check the confidence and geometry invariants.
    pub fn is_valid(&self) -> bool {
        self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
            && self.bounding_box.is_valid()
    }
}

/// Outcome of a single adapter in the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Returned at least one usable detection.
    Found,
    /// Ran but found nothing usable.
    Empty,
    /// Not attempted (model or credentials missing).
    Unavailable,
    /// Errored, timed out, or panicked.
    Failed,
    /// Not reached because an earlier adapter won.
    Skipped,
}

/// Audit record of one adapter invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdapterAttempt {
    pub strategy: SourceStrategy,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Unified result of one `detect()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub success: bool,
    pub detections: Vec<Detection>,
    pub source_strategy: SourceStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-adapter audit trail in cascade order.
    #[serde(default)]
    pub attempts: Vec<AdapterAttempt>,
}

impl DetectionResult {
    /// Result produced by the winning strategy.
    pub fn from_strategy(strategy: SourceStrategy, detections: Vec<Detection>, attempts: Vec<AdapterAttempt>) -> Self {
        Self {
            success: true,
            detections,
            source_strategy: strategy,
            error: None,
            attempts,
        }
    }

    /// Every strategy came back empty. Still a successful result.
    pub fn exhausted(attempts: Vec<AdapterAttempt>) -> Self {
        Self {
            success: true,
            detections: Vec::new(),
            source_strategy: SourceStrategy::None,
            error: None,
            attempts,
        }
    }

    /// The request itself was unusable, so no strategy ran.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            detections: Vec::new(),
            source_strategy: SourceStrategy::None,
            error: Some(error.into()),
            attempts: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.detections.len()
    }
}

/// Uploaded image handed to the cascade.
#[derive(Debug, Clone, Default)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    /// Original upload file name, used as a weak hint by keyword heuristics.
    pub file_name: Option<String>,
}

impl ImageInput {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pixels_normalizes_by_image_size() {
        let bbox = BoundingBox::from_pixels(64.0, 48.0, 320.0, 240.0, 640, 480).unwrap();
        assert!((bbox.x - 0.1).abs() < 1e-12);
        assert!((bbox.y - 0.1).abs() < 1e-12);
        assert!((bbox.width - 0.4).abs() < 1e-12);
        assert!((bbox.height - 0.4).abs() < 1e-12);
        assert!(bbox.is_valid());
    }

    #[test]
    fn test_from_pixels_clips_to_image() {
        let bbox = BoundingBox::from_pixels(-20.0, 400.0, 700.0, 520.0, 640, 480).unwrap();
        assert_eq!(bbox.x, 0.0);
        assert_eq!(bbox.width, 1.0);
        assert!(bbox.y + bbox.height <= 1.0);
    }

    #[test]
    fn test_from_pixels_rejects_degenerate() {
        assert!(BoundingBox::from_pixels(10.0, 10.0, 10.0, 50.0, 100, 100).is_none());
        assert!(BoundingBox::from_pixels(0.0, 0.0, 10.0, 10.0, 0, 100).is_none());
        assert!(BoundingBox::from_pixels(f64::NAN, 0.0, 10.0, 10.0, 100, 100).is_none());
    }

    #[test]
    fn test_fitted_trims_overflow() {
        let bbox = BoundingBox::new(0.7, 0.5, 0.5, 0.6).fitted();
        assert!(bbox.x + bbox.width <= 1.0);
        assert!(bbox.y + bbox.height <= 1.0);
        assert!(bbox.is_valid());
    }

    #[test]
    fn test_invalid_boxes() {
        assert!(!BoundingBox::new(-0.1, 0.0, 0.5, 0.5).is_valid());
        assert!(!BoundingBox::new(0.6, 0.0, 0.5, 0.5).is_valid());
        assert!(!BoundingBox::new(0.1, 0.1, 0.0, 0.5).is_valid());
    }

    #[test]
    fn test_exhausted_result_is_success() {
        let result = DetectionResult::exhausted(Vec::new());
        assert!(result.success);
        assert_eq!(result.count(), 0);
        assert_eq!(result.source_strategy, SourceStrategy::None);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = DetectionResult::exhausted(Vec::new());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["sourceStrategy"], "none");
        assert!(json.get("error").is_none());
    }
}
