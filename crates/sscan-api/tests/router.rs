//! Router tests over an in-process cascade.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use sscan_api::{create_router, ApiConfig, AppState};
use sscan_detect::{CascadeConfig, DetectionAdapter, DetectionOrchestrator, HeuristicAdapter};
use sscan_models::{CanonicalLabel, DetectionResult, SourceStrategy, TrainingStats};
use sscan_training::{TrainingAccumulator, TrainingConfig};
use tempfile::TempDir;
use tower::ServiceExt;

async fn app(dir: &TempDir) -> Router {
    let accumulator = Arc::new(
        TrainingAccumulator::open(TrainingConfig::in_dir(dir.path()).with_retrain_threshold(100))
            .await
            .unwrap(),
    );
    let adapters: Vec<Arc<dyn DetectionAdapter>> = vec![Arc::new(HeuristicAdapter::new())];
    let orchestrator = DetectionOrchestrator::new(CascadeConfig::default(), adapters)
        .with_accumulator(Arc::clone(&accumulator));
    let state = AppState::from_parts(ApiConfig::default(), Arc::new(orchestrator), accumulator);
    create_router(state, None)
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir)
        .await
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn detect_rejects_empty_body() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir)
        .await
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/detect")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn detect_then_stats_reflect_the_sample() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/detect?filename=fire_extinguisher_bay2.jpg")
                .header("content-type", "image/jpeg")
                .header("X-Request-ID", "req-42")
                .body(Body::from(&b"\xff\xd8\xff not decodable"[..]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["X-Request-ID"], "req-42");
    let result: DetectionResult = body_json(response).await;
    assert!(result.success);
    assert_eq!(result.source_strategy, SourceStrategy::Heuristic);
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.detections[0].label, CanonicalLabel::FireExtinguisher);
    assert_eq!(result.detections[0].color, "#f44336");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/training/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats: TrainingStats = body_json(response).await;
    assert_eq!(stats.image_count, 1);
    assert_eq!(stats.count_for(CanonicalLabel::FireExtinguisher), 1);
    assert!(!stats.is_model_trained);
    assert_eq!(stats.target_classes.len(), CanonicalLabel::ALL.len());
}

#[tokio::test]
async fn unrecognized_upload_is_empty_success() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir)
        .await
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/detect?filename=holiday.jpg")
                .body(Body::from("plain bytes"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result: DetectionResult = body_json(response).await;
    assert!(result.success);
    assert!(result.detections.is_empty());
    assert_eq!(result.source_strategy, SourceStrategy::None);
}

#[tokio::test]
async fn readiness_reports_cascade() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir)
        .await
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = body_json(response).await;
    assert_eq!(body["cascade"], serde_json::json!(["heuristic"]));
    assert_eq!(body["model"]["isLoaded"], false);
    assert_eq!(body["retrainRunning"], false);
}
