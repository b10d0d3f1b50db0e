//! Shared data models for the StationScan backend.
//!
//! This crate provides Serde-serializable types for:
//! - The canonical object vocabulary and object contexts
//! - Detection strategies
//! - Detections and cascade results
//! - Training samples, dataset statistics and model state

pub mod detection;
pub mod label;
pub mod strategy;
pub mod training;

// Re-export common types
pub use detection::{AdapterAttempt, AttemptOutcome, BoundingBox, Detection, DetectionResult, ImageInput};
pub use label::{CanonicalLabel, LabelParseError, ObjectContext};
pub use strategy::{SourceStrategy, SourceStrategyParseError};
pub use training::{DatasetSplit, ModelState, SampleLabel, TrainingSample, TrainingStats};
