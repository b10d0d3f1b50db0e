//! Detection strategy identifiers.
//!
//! The cascade tries strategies in a configurable priority order:
//!
//! - `Specialized`: locally trained model for the priority classes
//! - `General`: broad-vocabulary object detector with class remapping
//! - `CloudVision`: multimodal vision backend
//! - `Heuristic`: deterministic last resort
//!
//! `None` tags a result where every strategy came back empty.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which backend produced a detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceStrategy {
    Specialized,
    General,
    CloudVision,
    Heuristic,
    /// No strategy produced detections.
    #[default]
    None,
}

impl SourceStrategy {
    /// Default cascade order.
    pub const CASCADE: &'static [SourceStrategy] = &[
        SourceStrategy::Specialized,
        SourceStrategy::General,
        SourceStrategy::CloudVision,
        SourceStrategy::Heuristic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStrategy::Specialized => "specialized",
            SourceStrategy::General => "general",
            SourceStrategy::CloudVision => "cloud_vision",
            SourceStrategy::Heuristic => "heuristic",
            SourceStrategy::None => "none",
        }
    }

    /// Parse a comma-separated priority list such as
    /// `"specialized,general,cloud_vision,heuristic"`.
    ///
    /// Duplicates are dropped, keeping the first occurrence. `none` is not a
    /// valid cascade entry.
    pub fn parse_order(s: &str) -> Result<Vec<SourceStrategy>, SourceStrategyParseError> {
        let mut order = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let strategy: SourceStrategy = part.parse()?;
            if strategy == SourceStrategy::None {
                return Err(SourceStrategyParseError(part.to_string()));
            }
            if !order.contains(&strategy) {
                order.push(strategy);
            }
        }
        Ok(order)
    }
}

impl fmt::Display for SourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceStrategy {
    type Err = SourceStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "specialized" | "custom" => Ok(SourceStrategy::Specialized),
            "general" | "generic" => Ok(SourceStrategy::General),
            "cloud_vision" | "cloud" | "vision" => Ok(SourceStrategy::CloudVision),
            "heuristic" | "fallback" => Ok(SourceStrategy::Heuristic),
            "none" => Ok(SourceStrategy::None),
            _ => Err(SourceStrategyParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown detection strategy: {0}")]
pub struct SourceStrategyParseError(String);
