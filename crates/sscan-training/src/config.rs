//! Training configuration.

use std::path::PathBuf;

/// Training accumulator configuration.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Dataset root holding `images/`, `labels/` and the class manifest
    pub data_dir: PathBuf,
    /// Number of new samples that triggers a retrain
    pub retrain_threshold: u64,
    /// Every Nth sample goes to the validation split (0 disables val)
    pub val_every: u64,
    /// Where the retrainer writes the model descriptor
    pub model_path: PathBuf,
    /// External training command, whitespace separated.
    /// `{data}`, `{model}` and `{weights}` are replaced with the data.yaml,
    /// descriptor and weights paths.
    pub training_command: Option<String>,
    /// Retries for a failed retrain run before giving up until the next crossing
    pub max_retries: u32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("training_data"),
            retrain_threshold: 5,
            val_every: 5,
            model_path: PathBuf::from("models/specialized.json"),
            training_command: None,
            max_retries: 1,
        }
    }
}

impl TrainingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("TRAINING_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            retrain_threshold: std::env::var("TRAINING_RETRAIN_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.retrain_threshold),
            val_every: std::env::var("TRAINING_VAL_EVERY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.val_every),
            model_path: std::env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            training_command: std::env::var("TRAINING_COMMAND")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            max_retries: std::env::var("TRAINING_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }

    /// Config rooted at `dir`, with the model descriptor inside it. Used by tests
    /// and single-directory deployments.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let data_dir = dir.into();
        Self {
            model_path: data_dir.join("model").join("specialized.json"),
            data_dir,
            ..Default::default()
        }
    }

    pub fn with_retrain_threshold(mut self, threshold: u64) -> Self {
        self.retrain_threshold = threshold.max(1);
        self
    }
}
