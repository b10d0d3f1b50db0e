//! Canonical object vocabulary.
//!
//! Every detection leaving the cascade carries one of these labels. The set is
//! closed: backend class names are mapped onto it and free-text labels never
//! reach a caller.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A member of the fixed output vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum CanonicalLabel {
    /// Maintenance tool storage.
    #[serde(rename = "toolbox")]
    Toolbox,

    /// Fire suppression equipment.
    #[serde(rename = "fire extinguisher")]
    FireExtinguisher,

    /// Pressurized life support cylinder.
    #[serde(rename = "oxygen tank")]
    OxygenTank,

    /// Crew member.
    #[serde(rename = "astronaut")]
    Astronaut,
}

impl CanonicalLabel {
    /// Vocabulary in declaration order. The first entry is the default bucket
    /// for labels that cannot be classified.
    pub const ALL: &'static [CanonicalLabel] = &[
        CanonicalLabel::Toolbox,
        CanonicalLabel::FireExtinguisher,
        CanonicalLabel::OxygenTank,
        CanonicalLabel::Astronaut,
    ];

    /// The three safety-critical classes the specialized model is trained on.
    pub const PRIORITY: &'static [CanonicalLabel] = &[
        CanonicalLabel::Toolbox,
        CanonicalLabel::FireExtinguisher,
        CanonicalLabel::OxygenTank,
    ];

    /// Returns the label as it appears on the wire and in label files.
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalLabel::Toolbox => "toolbox",
            CanonicalLabel::FireExtinguisher => "fire extinguisher",
            CanonicalLabel::OxygenTank => "oxygen tank",
            CanonicalLabel::Astronaut => "astronaut",
        }
    }

    /// Class index used when a dataset manifest is created from scratch.
    ///
    /// Matches the class order of the original priority model, so datasets
    /// produced here stay compatible with weights trained against it.
    pub fn default_class_id(&self) -> u32 {
        match self {
            CanonicalLabel::Toolbox => 0,
            CanonicalLabel::OxygenTank => 1,
            CanonicalLabel::FireExtinguisher => 2,
            CanonicalLabel::Astronaut => 3,
        }
    }

    /// Returns true for the three priority classes.
    pub fn is_priority(&self) -> bool {
        !matches!(self, CanonicalLabel::Astronaut)
    }
}

impl Default for CanonicalLabel {
    fn default() -> Self {
        CanonicalLabel::ALL[0]
    }
}

impl fmt::Display for CanonicalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CanonicalLabel {
    type Err = LabelParseError;

    /// Exact (case-insensitive) match only. Fuzzy matching belongs to the
    /// label normalizer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        CanonicalLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == lowered)
            .ok_or_else(|| LabelParseError(s.to_string()))
    }
}

#[derive(Debug, Error)]
#[error("Unknown canonical label: {0}")]
pub struct LabelParseError(String);

/// Operational category attached to each detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectContext {
    Tools,
    Emergency,
    Crew,
    Equipment,
    #[default]
    Uncategorized,
}

impl ObjectContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectContext::Tools => "TOOLS",
            ObjectContext::Emergency => "EMERGENCY",
            ObjectContext::Crew => "CREW",
            ObjectContext::Equipment => "EQUIPMENT",
            ObjectContext::Uncategorized => "UNCATEGORIZED",
        }
    }
}

impl fmt::Display for ObjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
