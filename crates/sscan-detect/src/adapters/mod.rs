//! Backend adapters.
//!
//! Each adapter wraps one detection strategy behind [`DetectionAdapter`]. An
//! adapter reports one of three things:
//! - `Ok(AdapterOutcome::Detections(..))`, possibly empty
//! - `Ok(AdapterOutcome::Unavailable(..))` when its model or credentials are missing
//! - `Err(..)` for a hard failure, which the orchestrator logs and skips past

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sscan_models::{ImageInput, SourceStrategy};
use tokio::sync::OnceCell;

use crate::error::DetectResult;
use crate::normalizer::RawDetection;
use crate::signals::ColorSignals;

pub mod cloud_vision;
pub mod general;
pub mod heuristic;
pub mod specialized;

pub use cloud_vision::CloudVisionAdapter;
pub use general::GeneralModelAdapter;
pub use heuristic::HeuristicAdapter;
pub use specialized::SpecializedModelAdapter;

/// What an adapter produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterOutcome {
    Detections(Vec<RawDetection>),
    /// The adapter cannot run right now. Carries the reason.
    Unavailable(String),
}

impl AdapterOutcome {
    pub fn empty() -> Self {
        Self::Detections(Vec::new())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// The `ok` flag of the adapter contract.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Detections(_))
    }
}

/// One image moving through the cascade.
///
/// Color signals are computed on first use and shared by every adapter that
/// asks for them.
#[derive(Debug)]
pub struct AdapterRequest {
    image: Arc<ImageInput>,
    signals: OnceCell<Option<Arc<ColorSignals>>>,
}

impl AdapterRequest {
    pub fn new(image: ImageInput) -> Self {
        Self {
            image: Arc::new(image),
            signals: OnceCell::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.image.bytes
    }

    pub fn file_name(&self) -> Option<&str> {
        self.image.file_name.as_deref()
    }

    /// Decoded color signals, or `None` if the bytes are not a decodable image.
    pub async fn color_signals(&self) -> Option<Arc<ColorSignals>> {
        self.signals
            .get_or_init(|| async {
                let image = Arc::clone(&self.image);
                tokio::task::spawn_blocking(move || ColorSignals::analyze(&image.bytes))
                    .await
                    .ok()
                    .flatten()
                    .map(Arc::new)
            })
            .await
            .clone()
    }
}

/// Uniform wrapper around one detection strategy.
#[async_trait]
pub trait DetectionAdapter: Send + Sync {
    fn strategy(&self) -> SourceStrategy;

    /// Adapter name for logging.
    fn name(&self) -> &'static str {
        self.strategy().as_str()
    }

    /// Timeout for this adapter when it needs longer than the cascade default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn try_detect(&self, request: &AdapterRequest) -> DetectResult<AdapterOutcome>;
}
