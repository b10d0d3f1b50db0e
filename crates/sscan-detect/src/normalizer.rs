//! Label normalizer.
//!
//! Maps whatever class name a backend reports onto the closed vocabulary and
//! attaches the display metadata for the resulting label. Matching runs in
//! three steps: exact name, whole-word keyword, then the default bucket.
//! Nothing is ever dropped for having an unknown name.

use sscan_models::{BoundingBox, CanonicalLabel, Detection, ObjectContext};
use uuid::Uuid;

/// Keyword table checked in order. Specific classes come before the broad
/// container words that map to toolbox.
const KEYWORDS: &[(CanonicalLabel, &[&str])] = &[
    (CanonicalLabel::FireExtinguisher, &["extinguisher", "fire"]),
    (
        CanonicalLabel::OxygenTank,
        &["oxygen", "tank", "cylinder", "canister", "gas"],
    ),
    (
        CanonicalLabel::Astronaut,
        &["astronaut", "person", "crew", "human", "spacesuit"],
    ),
    (
        CanonicalLabel::Toolbox,
        &["toolbox", "tool", "box", "container", "case"],
    ),
];

/// How a raw name reached its canonical label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Keyword,
    /// No rule matched; the label is the default bucket.
    Default,
}

/// Output of [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedLabel {
    pub label: CanonicalLabel,
    pub color: &'static str,
    pub context: ObjectContext,
    pub matched: MatchKind,
}

impl NormalizedLabel {
    /// The label, color and context triple, without provenance.
    pub fn metadata(&self) -> (CanonicalLabel, &'static str, ObjectContext) {
        (self.label, self.color, self.context)
    }
}

/// Display color for a label.
pub fn color_for(label: CanonicalLabel) -> &'static str {
    match label {
        CanonicalLabel::Toolbox => "#ffc107",
        CanonicalLabel::FireExtinguisher => "#f44336",
        CanonicalLabel::OxygenTank => "#2196f3",
        CanonicalLabel::Astronaut => "#4caf50",
    }
}

pub fn context_for(label: CanonicalLabel) -> ObjectContext {
    match label {
        CanonicalLabel::Toolbox => ObjectContext::Tools,
        CanonicalLabel::FireExtinguisher => ObjectContext::Emergency,
        CanonicalLabel::OxygenTank => ObjectContext::Equipment,
        CanonicalLabel::Astronaut => ObjectContext::Crew,
    }
}

/// Maintenance guidance shown next to a detection.
pub fn guidance_for(label: CanonicalLabel) -> &'static str {
    match label {
        CanonicalLabel::Toolbox => "Equipment storage. Ensure proper organization and inventory completion.",
        CanonicalLabel::FireExtinguisher => "Critical safety equipment. Check pressure gauge and ensure easy access.",
        CanonicalLabel::OxygenTank => "Life support equipment. Verify pressure levels and connection integrity.",
        CanonicalLabel::Astronaut => "Crew member. Confirm suit integrity and tether status.",
    }
}

/// Keywords that identify `label`.
pub fn keywords_for(label: CanonicalLabel) -> &'static [&'static str] {
    KEYWORDS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, words)| *words)
        .unwrap_or(&[])
}

/// Whether any word of `text` is one of `label`'s keywords, allowing a plural
/// `s`/`es`. Matching whole words keeps "screwdriver" away from "crew".
pub fn mentions(text: &str, label: CanonicalLabel) -> bool {
    let keywords = keywords_for(label);
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .any(|word| {
            keywords.iter().any(|k| {
                word == *k
                    || word
                        .strip_prefix(k)
                        .is_some_and(|rest| rest == "s" || rest == "es")
            })
        })
}

/// Lowercase and collapse `_`, `-` and repeated whitespace.
fn canonicalize(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a raw backend class name to the vocabulary. Pure.
pub fn normalize(raw: &str) -> NormalizedLabel {
    let name = canonicalize(raw);

    let (label, matched) = if let Ok(label) = name.parse::<CanonicalLabel>() {
        (label, MatchKind::Exact)
    } else if let Some((label, _)) = KEYWORDS.iter().find(|(label, _)| mentions(&name, *label)) {
        (*label, MatchKind::Keyword)
    } else {
        (CanonicalLabel::default(), MatchKind::Default)
    };

    NormalizedLabel {
        label,
        color: color_for(label),
        context: context_for(label),
        matched,
    }
}

/// A detection as an adapter reports it, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_name: String,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
    /// Backend class before any adapter-side remapping.
    pub original_class: Option<String>,
}

impl RawDetection {
    pub fn new(class_name: impl Into<String>, confidence: f64, bounding_box: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bounding_box,
            original_class: None,
        }
    }

    pub fn with_original_class(mut self, original: impl Into<String>) -> Self {
        self.original_class = Some(original.into());
        self
    }
}

/// A normalized detection plus how its label was matched.
#[derive(Debug, Clone)]
pub struct NormalizedDetection {
    pub detection: Detection,
    pub matched: MatchKind,
}

/// Turns raw adapter output into caller-facing detections.
#[derive(Debug, Clone)]
pub struct LabelNormalizer {
    review_threshold: f64,
}

impl Default for LabelNormalizer {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl LabelNormalizer {
    pub fn new(review_threshold: f64) -> Self {
        Self { review_threshold }
    }

    /// Normalize one raw detection.
    ///
    /// Returns `None` when the confidence or box violates the detection
    /// invariants. Boxes that overshoot an edge only by float rounding are
    /// trimmed to the unit square.
    pub fn apply(&self, raw: RawDetection) -> Option<NormalizedDetection> {
        let normalized = normalize(&raw.class_name);
        let bounding_box = if raw.bounding_box.is_valid() {
            raw.bounding_box.fitted()
        } else {
            return None;
        };
        if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
            return None;
        }

        let original_class = raw.original_class.unwrap_or_else(|| raw.class_name.clone());
        let issue = if normalized.matched == MatchKind::Default {
            Some(format!(
                "Unrecognized class '{}' retained for review",
                original_class
            ))
        } else if raw.confidence < self.review_threshold {
            Some(format!(
                "Low confidence detection ({:.0}%), verify manually",
                raw.confidence * 100.0
            ))
        } else {
            None
        };

        let detection = Detection {
            id: Uuid::new_v4(),
            label: normalized.label,
            confidence: raw.confidence,
            bounding_box,
            color: normalized.color.to_string(),
            context: normalized.context,
            guidance: guidance_for(normalized.label).to_string(),
            original_class: Some(original_class),
            issue,
        };
        detection.is_valid().then_some(NormalizedDetection {
            detection,
            matched: normalized.matched,
        })
    }
}
