//! Image detection handler.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use sscan_models::{DetectionResult, ImageInput};
use tracing::{info_span, Instrument};

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_upload_size;
use crate::middleware::RequestId;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DetectParams {
    /// Original upload name, used as a keyword hint by the local adapters.
    pub filename: Option<String>,
}

/// Run the detection cascade over the raw request body.
///
/// The body is the encoded image itself (`image/jpeg`, `image/png`, ...).
/// Backend failures never surface here; an image nobody recognized comes back
/// as a successful result with no detections.
pub async fn detect_image(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    Query(params): Query<DetectParams>,
    body: Bytes,
) -> ApiResult<Json<DetectionResult>> {
    if body.is_empty() {
        return Err(ApiError::bad_request("No image provided"));
    }
    record_upload_size(body.len());

    let mut image = ImageInput::new(body.to_vec());
    if let Some(name) = params.filename.filter(|n| !n.trim().is_empty()) {
        image = image.with_file_name(name);
    }

    let request_id = request_id.map(|Extension(RequestId(id))| id).unwrap_or_default();
    let result = state
        .orchestrator
        .detect(image)
        .instrument(info_span!("http_detect", request_id = %request_id))
        .await;

    Ok(Json(result))
}
