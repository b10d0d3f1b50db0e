//! Multi-strategy object detection for StationScan.
//!
//! The [`DetectionOrchestrator`] tries each [`DetectionAdapter`] in priority
//! order, normalizes the first non-empty answer onto the fixed vocabulary, and
//! hands confident detections to the training accumulator.
//!
//! Adapters:
//! - [`SpecializedModelAdapter`]: locally retrained model
//! - [`GeneralModelAdapter`]: HTTP object-detection service with COCO remapping
//! - [`CloudVisionAdapter`]: Gemini multimodal model
//! - [`HeuristicAdapter`]: deterministic keyword and color fallback

pub mod adapters;
pub mod config;
pub mod error;
pub mod metrics;
pub mod normalizer;
pub mod orchestrator;
pub mod signals;

pub use adapters::{
    AdapterOutcome, AdapterRequest, CloudVisionAdapter, DetectionAdapter, GeneralModelAdapter, HeuristicAdapter,
    SpecializedModelAdapter,
};
pub use config::{CascadeConfig, CloudVisionConfig, GeneralModelConfig};
pub use error::{DetectError, DetectResult};
pub use normalizer::{normalize, LabelNormalizer, MatchKind, NormalizedLabel, RawDetection};
pub use orchestrator::DetectionOrchestrator;
pub use signals::ColorSignals;
