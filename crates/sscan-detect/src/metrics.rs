//! Cascade metrics.

use metrics::{counter, histogram};
use sscan_models::{AttemptOutcome, SourceStrategy};

/// Metric names as constants for consistency.
pub mod names {
    pub const ADAPTER_ATTEMPTS_TOTAL: &str = "sscan_adapter_attempts_total";
    pub const DETECT_DURATION_SECONDS: &str = "sscan_detect_duration_seconds";
    pub const DETECTIONS_RETURNED_TOTAL: &str = "sscan_detections_returned_total";
    pub const SAMPLE_RECORD_FAILURES_TOTAL: &str = "sscan_sample_record_failures_total";
}

fn outcome_label(outcome: AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Found => "found",
        AttemptOutcome::Empty => "empty",
        AttemptOutcome::Unavailable => "unavailable",
        AttemptOutcome::Failed => "failed",
        AttemptOutcome::Skipped => "skipped",
    }
}

/// Record one adapter invocation.
pub fn record_attempt(strategy: SourceStrategy, outcome: AttemptOutcome) {
    let labels = [
        ("adapter", strategy.as_str().to_string()),
        ("outcome", outcome_label(outcome).to_string()),
    ];
    counter!(names::ADAPTER_ATTEMPTS_TOTAL, &labels).increment(1);
}

/// Record a finished `detect()` call.
pub fn record_detect(strategy: SourceStrategy, detections: usize, duration_secs: f64) {
    let labels = [("strategy", strategy.as_str().to_string())];
    histogram!(names::DETECT_DURATION_SECONDS, &labels).record(duration_secs);
    counter!(names::DETECTIONS_RETURNED_TOTAL, &labels).increment(detections as u64);
}

pub fn record_sample_failure() {
    counter!(names::SAMPLE_RECORD_FAILURES_TOTAL).increment(1);
}
