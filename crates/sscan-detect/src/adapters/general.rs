//! General-model adapter.
//!
//! Posts the image to an HTTP object-detection service (a YOLO-style model
//! with the COCO vocabulary) and remaps its classes onto ours. The service
//! answers with pixel boxes, which are divided by the image size here.
//!
//! Expected response:
//!
//! ```json
//! {
//!   "width": 640, "height": 480,
//!   "detections": [{"class": "bottle", "confidence": 0.8, "bbox": [x1, y1, x2, y2]}]
//! }
//! ```

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sscan_models::{BoundingBox, CanonicalLabel, SourceStrategy};
use tracing::{debug, info};

use super::{AdapterOutcome, AdapterRequest, DetectionAdapter};
use crate::config::GeneralModelConfig;
use crate::error::{DetectError, DetectResult};
use crate::normalizer::RawDetection;
use crate::signals::image_dimensions;

/// COCO class to vocabulary remapping.
const COCO_REMAP: &[(&str, CanonicalLabel)] = &[
    ("backpack", CanonicalLabel::Toolbox),
    ("handbag", CanonicalLabel::Toolbox),
    ("suitcase", CanonicalLabel::Toolbox),
    ("book", CanonicalLabel::Toolbox),
    ("laptop", CanonicalLabel::Toolbox),
    ("bottle", CanonicalLabel::OxygenTank),
    ("vase", CanonicalLabel::OxygenTank),
    ("cup", CanonicalLabel::OxygenTank),
    ("fire hydrant", CanonicalLabel::FireExtinguisher),
    ("person", CanonicalLabel::Astronaut),
];

/// Vocabulary label for a COCO class, if it has one.
pub fn remap_coco(class_name: &str) -> Option<CanonicalLabel> {
    let name = class_name.trim().to_lowercase();
    COCO_REMAP.iter().find(|(coco, _)| *coco == name).map(|(_, label)| *label)
}

#[derive(Debug, Serialize)]
struct GeneralRequest<'a> {
    image: String,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GeneralResponse {
    #[serde(default)]
    detections: Vec<serde_json::Value>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeneralDetection {
    #[serde(alias = "label", alias = "name")]
    class: String,
    confidence: f64,
    #[serde(alias = "box", alias = "xyxy")]
    bbox: [f64; 4],
}

/// Client for the general detector service.
pub struct GeneralModelAdapter {
    config: GeneralModelConfig,
    client: Client,
}

impl GeneralModelAdapter {
    pub fn new(config: GeneralModelConfig) -> DetectResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DetectError::config_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn call_service(&self, url: &str, request: &AdapterRequest) -> DetectResult<GeneralResponse> {
        let body = GeneralRequest {
            image: base64::engine::general_purpose::STANDARD.encode(request.bytes()),
            confidence: self.config.min_confidence,
            filename: request.file_name(),
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectError::request_failed(format!("General model request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DetectError::UpstreamStatus { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| DetectError::malformed(format!("Failed to parse general model response: {}", e)))
    }
}

/// Convert one service detection, or `None` if it is unusable.
fn convert(value: serde_json::Value, width: u32, height: u32) -> Option<RawDetection> {
    let det: GeneralDetection = match serde_json::from_value(value) {
        Ok(det) => det,
        Err(e) => {
            debug!(error = %e, "Dropping malformed general detection");
            return None;
        }
    };
    let [x1, y1, x2, y2] = det.bbox;
    let bbox = BoundingBox::from_pixels(x1, y1, x2, y2, width, height)?;
    let class_name = remap_coco(&det.class)
        .map(|label| label.as_str().to_string())
        .unwrap_or_else(|| det.class.clone());
    Some(RawDetection::new(class_name, det.confidence, bbox).with_original_class(det.class))
}

#[async_trait]
impl DetectionAdapter for GeneralModelAdapter {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::General
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        Some(self.config.timeout)
    }

    async fn try_detect(&self, request: &AdapterRequest) -> DetectResult<AdapterOutcome> {
        let Some(url) = self.config.url.as_deref() else {
            return Ok(AdapterOutcome::unavailable("GENERAL_MODEL_URL not set"));
        };

        let response = self.call_service(url, request).await?;
        let (width, height) = match (response.width, response.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => image_dimensions(request.bytes())
                .ok_or_else(|| DetectError::image("image size unknown, cannot normalize pixel boxes"))?,
        };

        let reported = response.detections.len();
        let detections: Vec<RawDetection> = response
            .detections
            .into_iter()
            .filter_map(|value| convert(value, width, height))
            .collect();

        info!(reported, kept = detections.len(), "General model responded");
        Ok(AdapterOutcome::Detections(detections))
    }
}
