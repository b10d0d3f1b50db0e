//! Cloud vision adapter backed by Gemini `generateContent`.
//!
//! The image goes inline with a prompt that names only our vocabulary and asks
//! the model to abstain rather than guess. The reply is validated object by
//! object: anything with a missing or out-of-range field is dropped, the rest
//! of the response is kept.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sscan_models::{BoundingBox, CanonicalLabel, SourceStrategy};
use tracing::{debug, info, warn};

use super::{AdapterOutcome, AdapterRequest, DetectionAdapter};
use crate::config::CloudVisionConfig;
use crate::error::{DetectError, DetectResult};
use crate::normalizer::RawDetection;

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

fn mime_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Gif) => "image/gif",
        _ => "image/jpeg",
    }
}

fn build_prompt() -> String {
    let vocabulary = CanonicalLabel::ALL
        .iter()
        .map(|l| format!("\"{}\"", l.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"You are inspecting a photo taken inside a space station.

Report ONLY objects whose label is exactly one of: {vocabulary}.
If none of these objects is clearly visible, return an empty list. Do not
guess and do not invent objects or labels.

Return ONLY a single JSON object with this schema:
{{
  "objects": [
    {{"label": "one of the labels above", "confidence": 0.0, "x": 0.0, "y": 0.0, "width": 0.0, "height": 0.0}}
  ]
}}

- x and y are the top-left corner, normalized to [0, 1] by image width and height.
- width and height are normalized the same way; x + width and y + height must not exceed 1.
- confidence is in [0, 1].
"#
    )
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

fn number(obj: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key)?.as_f64().filter(|v| v.is_finite())
}

/// Validate one reported object. Any missing or out-of-range field drops it.
fn validate_object(value: &Value) -> Option<RawDetection> {
    let obj = value.as_object()?;
    let label = obj.get("label")?.as_str()?.trim();
    if label.is_empty() {
        return None;
    }
    let confidence = number(obj, "confidence").filter(|c| (0.0..=1.0).contains(c))?;
    let bbox = BoundingBox::new(
        number(obj, "x")?,
        number(obj, "y")?,
        number(obj, "width")?,
        number(obj, "height")?,
    );
    if !bbox.is_valid() {
        return None;
    }
    Some(RawDetection::new(label, confidence, bbox).with_original_class(label))
}

/// Parse the model's text output into detections.
///
/// Fails only when the text is not JSON or carries no object list. Individual
/// bad objects are dropped.
pub fn parse_objects(text: &str) -> DetectResult<Vec<RawDetection>> {
    let value: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| DetectError::malformed(format!("Cloud vision output is not JSON: {}", e)))?;

    let objects = match value {
        Value::Object(mut map) => match map.remove("objects") {
            Some(Value::Array(objects)) => objects,
            _ => return Err(DetectError::malformed("Cloud vision output has no objects array")),
        },
        Value::Array(objects) => objects,
        _ => return Err(DetectError::malformed("Cloud vision output has unexpected shape")),
    };

    let reported = objects.len();
    let detections: Vec<RawDetection> = objects.iter().filter_map(validate_object).collect();
    if detections.len() < reported {
        debug!(
            dropped = reported - detections.len(),
            "Dropped cloud vision objects that failed validation"
        );
    }
    Ok(detections)
}

/// Gemini vision client with model fallback.
pub struct CloudVisionAdapter {
    config: CloudVisionConfig,
    client: Client,
}

impl CloudVisionAdapter {
    pub fn new(config: CloudVisionConfig) -> DetectResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| DetectError::config_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn call_gemini_api(&self, api_key: &str, model: &str, request: &GeminiRequest) -> DetectResult<Vec<RawDetection>> {
        let url = format!("{}/models/{}:generateContent", self.config.base_url, model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .timeout(self.config.per_model_timeout())
            .json(request)
            .send()
            .await
            .map_err(|e| DetectError::request_failed(format!("Gemini API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DetectError::UpstreamStatus { status, body });
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| DetectError::malformed(format!("Failed to parse Gemini response: {}", e)))?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.iter().find_map(|p| p.text.as_deref()))
            .ok_or_else(|| DetectError::malformed("No content in Gemini response"))?;

        parse_objects(text)
    }
}

#[async_trait]
impl DetectionAdapter for CloudVisionAdapter {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::CloudVision
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        Some(self.config.timeout)
    }

    async fn try_detect(&self, request: &AdapterRequest) -> DetectResult<AdapterOutcome> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Ok(AdapterOutcome::unavailable("GEMINI_API_KEY not set"));
        };
        if self.config.models.is_empty() {
            return Ok(AdapterOutcome::unavailable("no cloud vision models configured"));
        }

        let body = GeminiRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: build_prompt() },
                    Part::Image {
                        inline_data: InlineData {
                            mime_type: mime_type(request.bytes()),
                            data: base64::engine::general_purpose::STANDARD.encode(request.bytes()),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: 0.0,
            },
        };

        let mut last_error = None;
        for model in &self.config.models {
            debug!(model = %model, "Attempting cloud vision model");
            match self.call_gemini_api(api_key, model, &body).await {
                Ok(detections) => {
                    info!(model = %model, count = detections.len(), "Cloud vision responded");
                    return Ok(AdapterOutcome::Detections(detections));
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "Cloud vision model failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DetectError::request_failed("All cloud vision models failed")))
    }
}
