//! Training dataset types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::BoundingBox;
use crate::label::CanonicalLabel;

/// Dataset partition a sample is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSplit {
    Train,
    Val,
}

impl DatasetSplit {
    pub const ALL: &'static [DatasetSplit] = &[DatasetSplit::Train, DatasetSplit::Val];

    /// Directory name used under `images/` and `labels/`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Val => "val",
        }
    }
}

/// One labeled object inside a training sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SampleLabel {
    pub class: CanonicalLabel,
    pub bounding_box: BoundingBox,
}

impl SampleLabel {
    pub fn new(class: CanonicalLabel, bounding_box: BoundingBox) -> Self {
        Self { class, bounding_box }
    }
}

/// An accepted image with its labels, as written to the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSample {
    pub image_path: String,
    pub label_path: String,
    pub split: DatasetSplit,
    pub labels: Vec<SampleLabel>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate view over the accumulated dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrainingStats {
    pub image_count: u64,
    pub label_count: u64,
    /// Labels per canonical class name. Ordered for stable output.
    pub class_distribution: BTreeMap<String, u64>,
    pub is_model_trained: bool,
    pub target_classes: Vec<String>,
}

impl TrainingStats {
    /// Empty stats for the given vocabulary.
    pub fn empty(target_classes: &[CanonicalLabel]) -> Self {
        Self {
            target_classes: target_classes.iter().map(|c| c.as_str().to_string()).collect(),
            ..Default::default()
        }
    }

    /// Fold one recorded sample into the counters.
    pub fn absorb(&mut self, labels: &[SampleLabel]) {
        self.image_count += 1;
        self.label_count += labels.len() as u64;
        for label in labels {
            *self
                .class_distribution
                .entry(label.class.as_str().to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn count_for(&self, class: CanonicalLabel) -> u64 {
        self.class_distribution.get(class.as_str()).copied().unwrap_or(0)
    }
}

/// Load state of a model-backed adapter.
///
/// Moves from unloaded to loaded when a model artifact is found or produced,
/// and only reverts on an explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelState {
    pub is_loaded: bool,
    pub model_path: String,
}

impl ModelState {
    pub fn unloaded(model_path: impl Into<String>) -> Self {
        Self {
            is_loaded: false,
            model_path: model_path.into(),
        }
    }

    pub fn loaded(model_path: impl Into<String>) -> Self {
        Self {
            is_loaded: true,
            model_path: model_path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_updates_counters() {
        let mut stats = TrainingStats::empty(CanonicalLabel::ALL);
        let bbox = BoundingBox::new(0.1, 0.1, 0.2, 0.2);
        stats.absorb(&[
            SampleLabel::new(CanonicalLabel::OxygenTank, bbox),
            SampleLabel::new(CanonicalLabel::OxygenTank, bbox),
            SampleLabel::new(CanonicalLabel::Toolbox, bbox),
        ]);

        assert_eq!(stats.image_count, 1);
        assert_eq!(stats.label_count, 3);
        assert_eq!(stats.count_for(CanonicalLabel::OxygenTank), 2);
        assert_eq!(stats.count_for(CanonicalLabel::FireExtinguisher), 0);
        assert_eq!(stats.target_classes.len(), 4);
    }

    #[test]
    fn test_stats_json_shape() {
        let stats = TrainingStats::empty(CanonicalLabel::PRIORITY);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["imageCount"], 0);
        assert_eq!(json["isModelTrained"], false);
        assert_eq!(json["targetClasses"][1], "fire extinguisher");
    }
}
