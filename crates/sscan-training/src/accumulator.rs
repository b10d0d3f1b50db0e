//! Training accumulator.
//!
//! Persists accepted detections as labeled samples, keeps incremental class
//! counters, and launches the retrain trigger once per threshold crossing.
//!
//! Writers serialize on one async mutex held across the image and label
//! writes. Readers get the last published [`TrainingStats`] snapshot without
//! touching that mutex.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use metrics::counter;
use sha2::{Digest, Sha256};
use sscan_models::{CanonicalLabel, DatasetSplit, SampleLabel, TrainingSample, TrainingStats};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TrainingConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::{format_label_line, parse_label_line, write_atomic, DatasetLayout};
use crate::manifest::ClassManifest;
use crate::model::ModelHandle;
use crate::retrain::{CommandRetrainer, DescriptorRetrainer, RetrainJob, RetrainTrigger, Retrainer};
use crate::retry::RetryPolicy;

struct WriterState {
    manifest: ClassManifest,
    stats: TrainingStats,
    next_index: u64,
    /// `image_count` at the last launched retrain.
    last_trigger_at: u64,
}

/// Append-only training set with a retrain trigger.
pub struct TrainingAccumulator {
    config: TrainingConfig,
    layout: DatasetLayout,
    model: ModelHandle,
    trigger: RetrainTrigger,
    writer: Mutex<WriterState>,
    snapshot: RwLock<Arc<TrainingStats>>,
}

impl TrainingAccumulator {
    /// Open with the retrainer selected by `config.training_command`.
    pub async fn open(config: TrainingConfig) -> TrainingResult<Self> {
        let model = ModelHandle::discover(&config.model_path).await;
        let retrainer: Arc<dyn Retrainer> = match &config.training_command {
            Some(command) => Arc::new(CommandRetrainer::new(command.clone())),
            None => Arc::new(DescriptorRetrainer),
        };
        Self::open_with(config, model, retrainer).await
    }

    /// Open the dataset at `config.data_dir`, rebuilding counters from the
    /// label files already on disk.
    pub async fn open_with(
        config: TrainingConfig,
        model: ModelHandle,
        retrainer: Arc<dyn Retrainer>,
    ) -> TrainingResult<Self> {
        let layout = DatasetLayout::new(&config.data_dir);
        layout.ensure_dirs().await?;
        let manifest = ClassManifest::load_or_create(layout.manifest_path(), CanonicalLabel::ALL).await?;

        let (stats, next_index) = rebuild_stats(&layout, &manifest).await?;
        let threshold = config.retrain_threshold.max(1);
        // A trained model already covers every full batch on disk; an
        // untrained one should retrain on the next record.
        let last_trigger_at = if model.is_loaded() {
            stats.image_count / threshold * threshold
        } else {
            0
        };

        info!(
            data_dir = %config.data_dir.display(),
            images = stats.image_count,
            labels = stats.label_count,
            model_loaded = model.is_loaded(),
            "Training accumulator opened"
        );

        let policy = RetryPolicy::new("retrain").with_max_retries(config.max_retries);
        let trigger = RetrainTrigger::new(retrainer, model.clone()).with_retry_policy(policy);
        let snapshot = RwLock::new(Arc::new(stats.clone()));

        Ok(Self {
            config,
            layout,
            model,
            trigger,
            writer: Mutex::new(WriterState {
                manifest,
                stats,
                next_index,
                last_trigger_at,
            }),
            snapshot,
        })
    }

    /// Persist `image` with its labels as one training sample.
    ///
    /// Image and label file are written before counters move, so a failed
    /// write leaves the stats untouched. May launch a background retrain.
    pub async fn record(&self, image: &[u8], labels: &[SampleLabel]) -> TrainingResult<TrainingSample> {
        if image.is_empty() {
            return Err(TrainingError::EmptyImage);
        }
        if labels.is_empty() {
            return Err(TrainingError::EmptySample);
        }

        let mut state = self.writer.lock().await;

        let index = state.next_index;
        let split = split_for(index, self.config.val_every);
        let stem = format!("{:06}_{}", index, content_hash(image));
        let image_path = self
            .layout
            .images_dir(split)
            .join(format!("{}.{}", stem, image_extension(image)));
        let label_path = self.layout.labels_dir(split).join(format!("{}.txt", stem));

        let mut manifest_changed = false;
        let mut lines = String::new();
        for label in labels {
            manifest_changed |= state.manifest.ensure(label.class);
            let class_id = state
                .manifest
                .id_for(label.class)
                .ok_or_else(|| TrainingError::manifest(state.manifest.path(), "class id missing after ensure"))?;
            lines.push_str(&format_label_line(class_id, &label.bounding_box.fitted()));
            lines.push('\n');
        }
        if manifest_changed {
            state.manifest.save().await?;
        }

        write_atomic(&image_path, image).await?;
        write_atomic(&label_path, lines.as_bytes()).await?;

        state.next_index += 1;
        state.stats.absorb(labels);
        self.publish(&state.stats);
        counter!("sscan_training_samples_total").increment(1);

        debug!(
            image = %image_path.display(),
            split = split.dir_name(),
            labels = labels.len(),
            total = state.stats.image_count,
            "Training sample recorded"
        );

        self.maybe_train_locked(&mut state);

        Ok(TrainingSample {
            image_path: image_path.display().to_string(),
            label_path: label_path.display().to_string(),
            split,
            labels: labels.to_vec(),
            recorded_at: Utc::now(),
        })
    }

    /// Read `path` and record it as a sample.
    pub async fn record_file(&self, path: &Path, labels: &[SampleLabel]) -> TrainingResult<TrainingSample> {
        let image = tokio::fs::read(path).await?;
        self.record(&image, labels).await
    }

    /// Current aggregate view. Never rescans the dataset.
    pub fn stats(&self) -> TrainingStats {
        let snapshot = Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()));
        let mut stats = (*snapshot).clone();
        stats.is_model_trained = self.model.is_loaded();
        stats
    }

    /// Launch a retrain if enough samples arrived since the last one.
    pub async fn maybe_train(&self) -> Option<JoinHandle<()>> {
        let mut state = self.writer.lock().await;
        self.maybe_train_locked(&mut state)
    }

    fn maybe_train_locked(&self, state: &mut WriterState) -> Option<JoinHandle<()>> {
        let threshold = self.config.retrain_threshold.max(1);
        let pending = state.stats.image_count.saturating_sub(state.last_trigger_at);
        if pending < threshold {
            return None;
        }

        let job = RetrainJob {
            layout: self.layout.clone(),
            model_path: self.config.model_path.clone(),
            class_names: state.manifest.names_by_id(),
            stats: state.stats.clone(),
        };
        let handle = self.trigger.try_launch(job)?;
        state.last_trigger_at = state.stats.image_count;
        Some(handle)
    }

    fn publish(&self, stats: &TrainingStats) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *snapshot = Arc::new(stats.clone());
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn trigger(&self) -> &RetrainTrigger {
        &self.trigger
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }
}

/// Every `val_every`-th sample goes to validation.
fn split_for(index: u64, val_every: u64) -> DatasetSplit {
    if val_every > 0 && (index + 1) % val_every == 0 {
        DatasetSplit::Val
    } else {
        DatasetSplit::Train
    }
}

fn content_hash(image: &[u8]) -> String {
    let digest = Sha256::digest(image);
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

fn image_extension(image: &[u8]) -> &'static str {
    image::guess_format(image)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("jpg")
}

fn index_from_stem(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.split('_').next()?.parse().ok()
}

async fn rebuild_stats(layout: &DatasetLayout, manifest: &ClassManifest) -> TrainingResult<(TrainingStats, u64)> {
    let mut stats = TrainingStats::empty(CanonicalLabel::ALL);
    let mut next_index = 0u64;

    for split in DatasetSplit::ALL {
        let files: Vec<PathBuf> = layout.label_files(*split).await?;
        for path in files {
            // The index is claimed even if the file turns out unreadable, so a
            // new sample never reuses its stem.
            if let Some(index) = index_from_stem(&path) {
                next_index = next_index.max(index + 1);
            }

            let contents = tokio::fs::read_to_string(&path).await?;
            let mut labels = Vec::new();
            for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
                match parse_label_line(line) {
                    Some((id, bbox)) => {
                        if let Some(class) = manifest.label_for(id) {
                            labels.push(SampleLabel::new(class, bbox));
                        }
                    }
                    None => warn!(path = %path.display(), line, "Skipping malformed label line"),
                }
            }
            stats.absorb(&labels);
        }
    }

    next_index = next_index.max(stats.image_count);
    Ok((stats, next_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelDescriptor, DESCRIPTOR_VERSION};
    use async_trait::async_trait;
    use sscan_models::BoundingBox;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingRetrainer {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Retrainer for CountingRetrainer {
        async fn retrain(&self, job: &RetrainJob) -> TrainingResult<ModelDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(ModelDescriptor {
                version: DESCRIPTOR_VERSION,
                trained_at: Utc::now(),
                image_count: job.stats.image_count,
                label_count: job.stats.label_count,
                classes: BTreeMap::new(),
                weights_path: None,
            })
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct FailingRetrainer;

    #[async_trait]
    impl Retrainer for FailingRetrainer {
        async fn retrain(&self, _job: &RetrainJob) -> TrainingResult<ModelDescriptor> {
            Err(TrainingError::config_error("trainer binary missing"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    async fn open(dir: &Path, threshold: u64) -> (TrainingAccumulator, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let config = TrainingConfig::in_dir(dir).with_retrain_threshold(threshold);
        let model = ModelHandle::new(&config.model_path);
        let retrainer = Arc::new(CountingRetrainer {
            calls: Arc::clone(&calls),
        });
        let acc = TrainingAccumulator::open_with(config, model, retrainer).await.unwrap();
        (acc, calls)
    }

    fn tank() -> SampleLabel {
        SampleLabel::new(CanonicalLabel::OxygenTank, BoundingBox::new(0.4, 0.6, 0.3, 0.3))
    }

    #[tokio::test]
    async fn test_record_writes_image_and_label() {
        let dir = tempfile::tempdir().unwrap();
        let (acc, _) = open(dir.path(), 100).await;

        let sample = acc.record(b"image-bytes", &[tank()]).await.unwrap();
        assert_eq!(sample.split, DatasetSplit::Train);
        assert!(sample.image_path.ends_with(".jpg"));

        let label = tokio::fs::read_to_string(&sample.label_path).await.unwrap();
        assert_eq!(label.trim(), "1 0.550000 0.750000 0.300000 0.300000");
        assert_eq!(tokio::fs::read(&sample.image_path).await.unwrap(), b"image-bytes");
    }

    #[tokio::test]
    async fn test_image_count_increments_by_one() {
        let dir = tempfile::tempdir().unwrap();
        let (acc, _) = open(dir.path(), 100).await;

        for expected in 1..=3u64 {
            let two = [tank(), SampleLabel::new(CanonicalLabel::Toolbox, BoundingBox::new(0.1, 0.1, 0.2, 0.2))];
            acc.record(b"img", &two).await.unwrap();
            let stats = acc.stats();
            assert_eq!(stats.image_count, expected);
            assert_eq!(stats.label_count, expected * 2);
        }
        assert_eq!(acc.stats().count_for(CanonicalLabel::OxygenTank), 3);
    }

    #[tokio::test]
    async fn test_rejects_empty_samples() {
        let dir = tempfile::tempdir().unwrap();
        let (acc, _) = open(dir.path(), 100).await;

        assert!(matches!(acc.record(b"", &[tank()]).await, Err(TrainingError::EmptyImage)));
        assert!(matches!(acc.record(b"img", &[]).await, Err(TrainingError::EmptySample)));
        assert_eq!(acc.stats().image_count, 0);
    }

    #[tokio::test]
    async fn test_every_fifth_sample_goes_to_val() {
        let dir = tempfile::tempdir().unwrap();
        let (acc, _) = open(dir.path(), 100).await;

        let mut splits = Vec::new();
        for _ in 0..5 {
            splits.push(acc.record(b"img", &[tank()]).await.unwrap().split);
        }
        assert_eq!(splits[4], DatasetSplit::Val);
        assert!(splits[..4].iter().all(|s| *s == DatasetSplit::Train));
    }

    #[tokio::test]
    async fn test_concurrent_records_trigger_one_retrain() {
        let dir = tempfile::tempdir().unwrap();
        let (acc, calls) = open(dir.path(), 5).await;
        let acc = Arc::new(acc);

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let acc = Arc::clone(&acc);
                tokio::spawn(async move {
                    let bytes = format!("image-{}", i).into_bytes();
                    acc.record(&bytes, &[tank()]).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(acc.trigger().wait_idle(Duration::from_secs(5)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(acc.stats().image_count, 5);
        assert!(acc.stats().is_model_trained);

        // More records below the next crossing do not retrain again.
        for _ in 0..4 {
            acc.record(b"img", &[tank()]).await.unwrap();
        }
        assert!(acc.maybe_train().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The tenth sample crosses again.
        acc.record(b"img", &[tank()]).await.unwrap();
        assert!(acc.trigger().wait_idle(Duration::from_secs(5)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_counters_rebuilt_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (acc, _) = open(dir.path(), 100).await;
            acc.record(b"a", &[tank()]).await.unwrap();
            acc.record(b"b", &[tank(), tank()]).await.unwrap();
        }

        let (acc, _) = open(dir.path(), 100).await;
        let stats = acc.stats();
        assert_eq!(stats.image_count, 2);
        assert_eq!(stats.label_count, 3);
        assert_eq!(stats.count_for(CanonicalLabel::OxygenTank), 3);

        let sample = acc.record(b"c", &[tank()]).await.unwrap();
        assert!(Path::new(&sample.image_path)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("000002_"));
    }

    #[tokio::test]
    async fn test_sub_precision_box_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let sliver = SampleLabel::new(CanonicalLabel::Toolbox, BoundingBox::new(0.1, 0.1, 0.0000004, 0.2));
        let first = {
            let (acc, _) = open(dir.path(), 100).await;
            acc.record(b"same-bytes", &[sliver]).await.unwrap()
        };

        let (acc, _) = open(dir.path(), 100).await;
        assert_eq!(acc.stats().image_count, 1);
        assert_eq!(acc.stats().count_for(CanonicalLabel::Toolbox), 1);

        let second = acc.record(b"same-bytes", &[sliver]).await.unwrap();
        assert_ne!(first.image_path, second.image_path);
        assert_eq!(acc.stats().image_count, 2);
        assert!(Path::new(&first.label_path).exists());
    }

    #[tokio::test]
    async fn test_unparseable_label_file_still_counts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (acc, _) = open(dir.path(), 100).await;
            let sample = acc.record(b"a", &[tank()]).await.unwrap();
            tokio::fs::write(&sample.label_path, "garbage line\n1 0.5 0.5 0.2 0.2\n")
                .await
                .unwrap();
        }

        let (acc, _) = open(dir.path(), 100).await;
        assert_eq!(acc.stats().image_count, 1);
        assert_eq!(acc.stats().label_count, 1);
        let next = acc.record(b"a", &[tank()]).await.unwrap();
        assert!(Path::new(&next.image_path)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("000001_"));
    }

    #[tokio::test]
    async fn test_failed_retrain_is_retried_on_next_crossing() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig::in_dir(dir.path()).with_retrain_threshold(2);
        let model = ModelHandle::new(&config.model_path);
        let acc = TrainingAccumulator::open_with(config, model, Arc::new(FailingRetrainer))
            .await
            .unwrap();

        acc.record(b"a", &[tank()]).await.unwrap();
        acc.record(b"b", &[tank()]).await.unwrap();
        assert!(acc.trigger().wait_idle(Duration::from_secs(5)).await);
        assert!(!acc.trigger().is_running());
        assert_eq!(acc.trigger().launched(), 1);
        assert_eq!(acc.trigger().succeeded(), 0);
        assert!(!acc.stats().is_model_trained);
        assert_eq!(acc.stats().image_count, 2);

        acc.record(b"c", &[tank()]).await.unwrap();
        acc.record(b"d", &[tank()]).await.unwrap();
        assert!(acc.trigger().wait_idle(Duration::from_secs(5)).await);
        assert_eq!(acc.trigger().launched(), 2);
        assert_eq!(acc.trigger().succeeded(), 0);
        assert!(!acc.stats().is_model_trained);
    }

    #[tokio::test]
    async fn test_record_file_reads_image_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (acc, _) = open(&dir.path().join("dataset"), 100).await;
        let upload = dir.path().join("upload.jpg");
        tokio::fs::write(&upload, b"uploaded-bytes").await.unwrap();

        let sample = acc.record_file(&upload, &[tank()]).await.unwrap();
        assert_eq!(tokio::fs::read(&sample.image_path).await.unwrap(), b"uploaded-bytes");
        assert_eq!(acc.stats().image_count, 1);

        let missing = acc.record_file(&dir.path().join("nope.jpg"), &[tank()]).await;
        assert!(matches!(missing, Err(TrainingError::Io(_))));
        assert_eq!(acc.stats().image_count, 1);
    }

    #[test]
    fn test_split_for() {
        assert_eq!(split_for(0, 5), DatasetSplit::Train);
        assert_eq!(split_for(4, 5), DatasetSplit::Val);
        assert_eq!(split_for(4, 0), DatasetSplit::Train);
    }
}
