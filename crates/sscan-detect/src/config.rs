//! Cascade and backend configuration.

use std::time::Duration;

use sscan_models::SourceStrategy;
use tracing::warn;

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_CLOUD_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-2.5-flash-lite", "gemini-2.5-pro"];

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .map(Duration::from_secs)
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Orchestrator policy.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Adapters in priority order
    pub order: Vec<SourceStrategy>,
    /// Minimum confidence for a detection to become a training sample
    pub acceptance_threshold: f64,
    /// Upper bound on a single adapter call
    pub adapter_timeout: Duration,
    /// Detections below this confidence are flagged for review
    pub review_threshold: f64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            order: SourceStrategy::CASCADE.to_vec(),
            acceptance_threshold: 0.65,
            adapter_timeout: Duration::from_secs(10),
            review_threshold: 0.5,
        }
    }
}

impl CascadeConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let order = match std::env::var("DETECT_ADAPTER_ORDER") {
            Ok(raw) => match SourceStrategy::parse_order(&raw) {
                Ok(order) if !order.is_empty() => order,
                Ok(_) => defaults.order.clone(),
                Err(e) => {
                    warn!(error = %e, "Invalid DETECT_ADAPTER_ORDER, using default order");
                    defaults.order.clone()
                }
            },
            Err(_) => defaults.order.clone(),
        };

        Self {
            order,
            acceptance_threshold: env_f64("DETECT_ACCEPTANCE_THRESHOLD")
                .map(unit)
                .unwrap_or(defaults.acceptance_threshold),
            adapter_timeout: env_secs("DETECT_ADAPTER_TIMEOUT_SECS").unwrap_or(defaults.adapter_timeout),
            review_threshold: env_f64("DETECT_REVIEW_THRESHOLD")
                .map(unit)
                .unwrap_or(defaults.review_threshold),
        }
    }

    pub fn with_order(mut self, order: Vec<SourceStrategy>) -> Self {
        self.order = order;
        self
    }

    pub fn with_acceptance_threshold(mut self, threshold: f64) -> Self {
        self.acceptance_threshold = unit(threshold);
        self
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }
}

/// General-purpose detector service.
#[derive(Debug, Clone)]
pub struct GeneralModelConfig {
    /// Detection endpoint. Unset leaves the adapter unavailable.
    pub url: Option<String>,
    pub timeout: Duration,
    /// Minimum confidence passed to the service
    pub min_confidence: f64,
}

impl Default for GeneralModelConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(8),
            min_confidence: 0.25,
        }
    }
}

impl GeneralModelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("GENERAL_MODEL_URL")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            timeout: env_secs("GENERAL_MODEL_TIMEOUT_SECS").unwrap_or(defaults.timeout),
            min_confidence: env_f64("GENERAL_MODEL_MIN_CONFIDENCE")
                .map(unit)
                .unwrap_or(defaults.min_confidence),
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// Cloud multimodal vision backend (Gemini `generateContent`).
#[derive(Debug, Clone)]
pub struct CloudVisionConfig {
    /// Unset leaves the adapter unavailable.
    pub api_key: Option<String>,
    pub base_url: String,
    /// Models tried in order until one answers
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl Default for CloudVisionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            models: DEFAULT_CLOUD_MODELS.iter().map(|m| m.to_string()).collect(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl CloudVisionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let models: Vec<String> = std::env::var("CLOUD_VISION_MODELS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            api_key: std::env::var("GEMINI_API_KEY").ok().filter(|s| !s.trim().is_empty()),
            base_url: std::env::var("GEMINI_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            models: if models.is_empty() { defaults.models } else { models },
            timeout: env_secs("CLOUD_VISION_TIMEOUT_SECS").unwrap_or(defaults.timeout),
        }
    }

    /// Config pointing at a custom endpoint. Used by tests and proxies.
    pub fn with_endpoint(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Share of [`timeout`](Self::timeout) each model in the fallback list gets.
    pub fn per_model_timeout(&self) -> Duration {
        let share = u32::try_from(self.models.len().max(1)).unwrap_or(u32::MAX);
        self.timeout / share
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_defaults() {
        let config = CascadeConfig::default();
        assert_eq!(config.order, SourceStrategy::CASCADE);
        assert_eq!(config.acceptance_threshold, 0.65);
        assert_eq!(config.adapter_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_thresholds_clamped() {
        let config = CascadeConfig::default().with_acceptance_threshold(1.7);
        assert_eq!(config.acceptance_threshold, 1.0);
        assert_eq!(unit(-0.3), 0.0);
        assert_eq!(unit(f64::NAN), 0.0);
    }

    #[test]
    fn test_cloud_endpoint_trims_slash() {
        let config = CloudVisionConfig::with_endpoint("key", "http://localhost:9000/");
        assert_eq!(config.base_url, "http://localhost:9000");
        assert!(!config.models.is_empty());
    }

    #[test]
    fn test_per_model_timeout_splits_budget() {
        let config = CloudVisionConfig::default().with_models(vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        assert_eq!(config.per_model_timeout(), Duration::from_secs(5));
        let config = config.with_models(Vec::new());
        assert_eq!(config.per_model_timeout(), Duration::from_secs(20));
    }
}
