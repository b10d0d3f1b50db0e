//! Training-data accumulation for StationScan.
//!
//! Accepted detections are written to a YOLO-style dataset on disk. Once
//! enough new samples arrive the [`RetrainTrigger`] runs a [`Retrainer`] in
//! the background and flips the shared [`ModelHandle`] to loaded.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod model;
pub mod retrain;
pub mod retry;

pub use accumulator::TrainingAccumulator;
pub use config::TrainingConfig;
pub use error::{TrainingError, TrainingResult};
pub use layout::DatasetLayout;
pub use manifest::ClassManifest;
pub use model::{ClassProfile, ModelDescriptor, ModelHandle};
pub use retrain::{CommandRetrainer, DescriptorRetrainer, RetrainJob, RetrainTrigger, Retrainer};
pub use retry::{retry_async, RetryPolicy, Retryable};
