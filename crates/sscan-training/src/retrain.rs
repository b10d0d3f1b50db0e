//! Retrain trigger.
//!
//! The accumulator hands a [`RetrainJob`] to [`RetrainTrigger::try_launch`] when
//! the sample threshold is crossed. The trigger runs the configured
//! [`Retrainer`] on a background task, installs the resulting descriptor into
//! the shared [`ModelHandle`], and refuses to start a second run while one is
//! in flight.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sscan_models::{BoundingBox, TrainingStats};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{TrainingError, TrainingResult};
use crate::layout::{parse_label_file, write_atomic, DatasetLayout};
use crate::model::{ClassProfile, ModelDescriptor, ModelHandle, DESCRIPTOR_VERSION};
use crate::retry::{retry_async, RetryPolicy};

/// Snapshot of the dataset handed to a retrainer.
#[derive(Debug, Clone)]
pub struct RetrainJob {
    pub layout: DatasetLayout,
    pub model_path: PathBuf,
    /// `(class_id, name)` ordered by id.
    pub class_names: Vec<(u32, String)>,
    pub stats: TrainingStats,
}

impl RetrainJob {
    /// Where an external trainer should write its weights.
    pub fn weights_path(&self) -> PathBuf {
        self.model_path.with_extension("pt")
    }
}

/// A strategy for turning the accumulated dataset into a model artifact.
#[async_trait]
pub trait Retrainer: Send + Sync {
    async fn retrain(&self, job: &RetrainJob) -> TrainingResult<ModelDescriptor>;

    /// Retrainer name for logging.
    fn name(&self) -> &'static str;
}

/// Writes `data.yaml` and a model descriptor with per-class mean boxes.
///
/// This is the in-process "training" used when no external job is configured.
#[derive(Debug, Default, Clone)]
pub struct DescriptorRetrainer;

#[derive(Default)]
struct BoxSum {
    samples: u64,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl DescriptorRetrainer {
    async fn write_data_yaml(&self, job: &RetrainJob) -> TrainingResult<()> {
        let mut yaml = format!(
            "path: {}\ntrain: images/train\nval: images/val\nnc: {}\nnames:\n",
            job.layout.root().display(),
            job.class_names.len()
        );
        for (id, name) in &job.class_names {
            yaml.push_str(&format!("  {}: {}\n", id, name));
        }
        write_atomic(&job.layout.data_yaml_path(), yaml.as_bytes()).await
    }
}

#[async_trait]
impl Retrainer for DescriptorRetrainer {
    async fn retrain(&self, job: &RetrainJob) -> TrainingResult<ModelDescriptor> {
        self.write_data_yaml(job).await?;

        let names: BTreeMap<u32, &str> = job
            .class_names
            .iter()
            .map(|(id, name)| (*id, name.as_str()))
            .collect();
        let mut sums: BTreeMap<u32, BoxSum> = BTreeMap::new();
        let mut image_count = 0u64;
        let mut label_count = 0u64;

        for split in sscan_models::DatasetSplit::ALL {
            for path in job.layout.label_files(*split).await? {
                let contents = tokio::fs::read_to_string(&path).await?;
                let labels = match parse_label_file(&path, &contents) {
                    Ok(labels) => labels,
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable label file");
                        continue;
                    }
                };
                image_count += 1;
                for (class_id, bbox) in labels {
                    if !names.contains_key(&class_id) {
                        continue;
                    }
                    label_count += 1;
                    let sum = sums.entry(class_id).or_default();
                    sum.samples += 1;
                    sum.x += bbox.x;
                    sum.y += bbox.y;
                    sum.width += bbox.width;
                    sum.height += bbox.height;
                }
            }
        }

        let classes = sums
            .into_iter()
            .filter_map(|(class_id, sum)| {
                let name = names.get(&class_id)?;
                let n = sum.samples as f64;
                let mean_box = BoundingBox::new(sum.x / n, sum.y / n, sum.width / n, sum.height / n).fitted();
                Some((
                    name.to_string(),
                    ClassProfile {
                        class_id,
                        samples: sum.samples,
                        mean_box,
                    },
                ))
            })
            .collect();

        let descriptor = ModelDescriptor {
            version: DESCRIPTOR_VERSION,
            trained_at: Utc::now(),
            image_count,
            label_count,
            classes,
            weights_path: None,
        };
        descriptor.save(&job.model_path).await?;
        Ok(descriptor)
    }

    fn name(&self) -> &'static str {
        "descriptor"
    }
}

/// Runs an external training command, then records a descriptor pointing at
/// the produced weights.
///
/// The command string is split on whitespace. `{data}`, `{model}` and
/// `{weights}` are replaced with the data.yaml, descriptor and weights paths.
#[derive(Debug, Clone)]
pub struct CommandRetrainer {
    command: String,
    descriptor: DescriptorRetrainer,
}

impl CommandRetrainer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            descriptor: DescriptorRetrainer,
        }
    }

    fn argv(&self, job: &RetrainJob) -> Vec<String> {
        let data = job.layout.data_yaml_path().display().to_string();
        let model = job.model_path.display().to_string();
        let weights = job.weights_path().display().to_string();
        self.command
            .split_whitespace()
            .map(|part| {
                part.replace("{data}", &data)
                    .replace("{model}", &model)
                    .replace("{weights}", &weights)
            })
            .collect()
    }
}

#[async_trait]
impl Retrainer for CommandRetrainer {
    async fn retrain(&self, job: &RetrainJob) -> TrainingResult<ModelDescriptor> {
        // data.yaml must exist before the external job reads it.
        self.descriptor.write_data_yaml(job).await?;

        let argv = self.argv(job);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TrainingError::config_error("TRAINING_COMMAND is empty"))?;

        info!(program = %program, "Starting external training job");
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    TrainingError::config_error(format!("Training program not found: {}", program))
                }
                _ => TrainingError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
            return Err(TrainingError::retrain_failed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                tail.trim()
            )));
        }

        let mut descriptor = self.descriptor.retrain(job).await?;
        descriptor.weights_path = Some(job.weights_path().display().to_string());
        descriptor.save(&job.model_path).await?;
        Ok(descriptor)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Clears the in-progress flag when the background task ends, even on panic.
struct InProgressGuard(Arc<AtomicBool>);

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fire-and-forget retrain launcher with a single-flight guard.
#[derive(Clone)]
pub struct RetrainTrigger {
    retrainer: Arc<dyn Retrainer>,
    model: ModelHandle,
    policy: RetryPolicy,
    in_progress: Arc<AtomicBool>,
    launched: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
}

impl RetrainTrigger {
    pub fn new(retrainer: Arc<dyn Retrainer>, model: ModelHandle) -> Self {
        Self {
            retrainer,
            model,
            policy: RetryPolicy::new("retrain"),
            in_progress: Arc::new(AtomicBool::new(false)),
            launched: Arc::new(AtomicU64::new(0)),
            succeeded: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start a background retrain unless one is already running.
    ///
    /// Returns the task handle when a run was started. Must be called from
    /// within a tokio runtime.
    pub fn try_launch(&self, job: RetrainJob) -> Option<JoinHandle<()>> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Retrain already in progress, not launching another");
            return None;
        }
        let guard = InProgressGuard(Arc::clone(&self.in_progress));
        self.launched.fetch_add(1, Ordering::Relaxed);

        let retrainer = Arc::clone(&self.retrainer);
        let model = self.model.clone();
        let policy = self.policy.clone();
        let succeeded = Arc::clone(&self.succeeded);

        info!(
            retrainer = retrainer.name(),
            images = job.stats.image_count,
            labels = job.stats.label_count,
            "Retrain triggered"
        );

        Some(tokio::spawn(async move {
            let _guard = guard;
            let started = std::time::Instant::now();
            match retry_async(&policy, || retrainer.retrain(&job)).await {
                Ok(descriptor) => {
                    let classes = descriptor.classes.len();
                    model.install(descriptor);
                    succeeded.fetch_add(1, Ordering::Relaxed);
                    counter!("sscan_retrain_total", "outcome" => "success").increment(1);
                    info!(
                        retrainer = retrainer.name(),
                        classes,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Retrain completed, specialized model loaded"
                    );
                }
                Err((e, attempts)) => {
                    counter!("sscan_retrain_total", "outcome" => "failure").increment(1);
                    error!(
                        retrainer = retrainer.name(),
                        attempts,
                        error = %e,
                        "Retrain failed, will retry on a later threshold crossing"
                    );
                }
            }
        }))
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Runs started so far.
    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    /// Runs that installed a model.
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Poll until no run is in flight or `timeout` elapses. Returns true when idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_running() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}
