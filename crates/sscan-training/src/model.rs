//! Specialized model descriptor and its shared load state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sscan_models::{BoundingBox, CanonicalLabel, ModelState};
use tracing::{info, warn};

use crate::error::TrainingResult;
use crate::layout::write_atomic;

pub const DESCRIPTOR_VERSION: u32 = 1;

/// What the retrainer learned about one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProfile {
    pub class_id: u32,
    pub samples: u64,
    /// Mean normalized box over every label of this class.
    pub mean_box: BoundingBox,
}

/// Model artifact written by the retrain trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub version: u32,
    pub trained_at: DateTime<Utc>,
    pub image_count: u64,
    pub label_count: u64,
    pub classes: BTreeMap<String, ClassProfile>,
    /// Weights produced by an external training job, if one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights_path: Option<String>,
}

impl ModelDescriptor {
    pub fn profile(&self, label: CanonicalLabel) -> Option<&ClassProfile> {
        self.classes.get(label.as_str())
    }

    pub async fn load(path: &Path) -> TrainingResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn save(&self, path: &Path) -> TrainingResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json).await
    }
}

#[derive(Debug)]
struct ModelSlot {
    state: ModelState,
    descriptor: Option<Arc<ModelDescriptor>>,
}

/// Shared handle to the specialized model's load state.
///
/// The retrain trigger installs new descriptors; the specialized adapter reads
/// them. Cloning the handle shares the same slot.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    path: PathBuf,
    slot: Arc<RwLock<ModelSlot>>,
}

impl ModelHandle {
    /// An unloaded handle for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = ModelState::unloaded(path.display().to_string());
        Self {
            path,
            slot: Arc::new(RwLock::new(ModelSlot {
                state,
                descriptor: None,
            })),
        }
    }

    /// Create a handle and load the descriptor if the model file exists.
    ///
    /// An unreadable descriptor leaves the handle unloaded.
    pub async fn discover(path: impl Into<PathBuf>) -> Self {
        let handle = Self::new(path);
        match tokio::fs::try_exists(&handle.path).await {
            Ok(true) => match ModelDescriptor::load(&handle.path).await {
                Ok(descriptor) => {
                    info!(
                        model_path = %handle.path.display(),
                        classes = descriptor.classes.len(),
                        "Specialized model found"
                    );
                    handle.install(descriptor);
                }
                Err(e) => warn!(
                    model_path = %handle.path.display(),
                    error = %e,
                    "Model file present but unreadable, staying unloaded"
                ),
            },
            Ok(false) => info!(model_path = %handle.path.display(), "No specialized model yet"),
            Err(e) => warn!(model_path = %handle.path.display(), error = %e, "Could not read model file"),
        }
        handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the model loaded with a fresh descriptor.
    pub fn install(&self, descriptor: ModelDescriptor) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        slot.state = ModelState::loaded(self.path.display().to_string());
        slot.descriptor = Some(Arc::new(descriptor));
    }

    /// Explicit reset back to unloaded.
    pub fn reset(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        slot.state = ModelState::unloaded(self.path.display().to_string());
        slot.descriptor = None;
    }

    pub fn state(&self) -> ModelState {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).state.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).state.is_loaded
    }

    pub fn descriptor(&self) -> Option<Arc<ModelDescriptor>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).descriptor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ModelDescriptor {
        let mut classes = BTreeMap::new();
        classes.insert(
            "toolbox".to_string(),
            ClassProfile {
                class_id: 0,
                samples: 3,
                mean_box: BoundingBox::new(0.2, 0.2, 0.4, 0.3),
            },
        );
        ModelDescriptor {
            version: DESCRIPTOR_VERSION,
            trained_at: Utc::now(),
            image_count: 3,
            label_count: 3,
            classes,
            weights_path: None,
        }
    }

    #[test]
    fn test_install_and_reset() {
        let handle = ModelHandle::new("/tmp/none.json");
        assert!(!handle.is_loaded());

        handle.install(descriptor());
        assert!(handle.is_loaded());
        assert!(handle.descriptor().unwrap().profile(CanonicalLabel::Toolbox).is_some());

        handle.reset();
        assert!(!handle.is_loaded());
        assert!(handle.descriptor().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let handle = ModelHandle::new("/tmp/none.json");
        let reader = handle.clone();
        handle.install(descriptor());
        assert!(reader.state().is_loaded);
    }

    #[tokio::test]
    async fn test_discover_loads_existing_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        descriptor().save(&path).await.unwrap();

        let handle = ModelHandle::discover(&path).await;
        assert!(handle.is_loaded());
        assert_eq!(handle.descriptor().unwrap().image_count, 3);
    }

    #[tokio::test]
    async fn test_discover_missing_or_corrupt_stays_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!ModelHandle::discover(dir.path().join("missing.json")).await.is_loaded());

        let corrupt = dir.path().join("corrupt.json");
        tokio::fs::write(&corrupt, b"not json").await.unwrap();
        assert!(!ModelHandle::discover(&corrupt).await.is_loaded());
    }
}
