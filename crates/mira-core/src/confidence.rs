//! Distance → decision mapping.
//!
//! `confidence = max(0, 100 - distance)`. Rules, first match wins:
//! unknown label or `distance >= REJECTION_DISTANCE` → unrecognized;
//! `confidence >= HIGH_CONFIDENCE_MIN` → high; `>= MEDIUM_CONFIDENCE_MIN`
//! → medium; otherwise low.

use crate::label_map::LabelMap;
use serde::Serialize;

// --- Named constants ---
/// Distances at or beyond this are never attributed to anyone.
pub const REJECTION_DISTANCE: f64 = 100.0;
/// Lowest confidence reported as a high-confidence match.
pub const HIGH_CONFIDENCE_MIN: f64 = 70.0;
/// Lowest confidence reported as a medium-confidence match.
pub const MEDIUM_CONFIDENCE_MIN: f64 = 50.0;
/// Confidence of a perfect match.
pub const CONFIDENCE_CEILING: f64 = 100.0;

/// `max(0, 100 - distance)`. NaN maps to 0.
pub fn confidence_from_distance(distance: f64) -> f64 {
    let c = CONFIDENCE_CEILING - distance;
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, CONFIDENCE_CEILING)
    }
}

/// Decision reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Unrecognized,
    LowConfidence { name: String, confidence: f64 },
    MediumConfidence { name: String, confidence: f64 },
    HighConfidence { name: String, confidence: f64 },
}

impl Outcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            Outcome::Unrecognized => None,
            Outcome::LowConfidence { name, .. }
            | Outcome::MediumConfidence { name, .. }
            | Outcome::HighConfidence { name, .. } => Some(name),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Outcome::Unrecognized)
    }
}

/// Threshold set. The default is the canonical policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidencePolicy {
    pub rejection_distance: f64,
    pub high_min: f64,
    pub medium_min: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            rejection_distance: REJECTION_DISTANCE,
            high_min: HIGH_CONFIDENCE_MIN,
            medium_min: MEDIUM_CONFIDENCE_MIN,
        }
    }
}

impl ConfidencePolicy {
    pub fn classify(&self, label_id: u32, distance: f64, label_map: &LabelMap) -> Outcome {
        let Some(name) = label_map.name(label_id) else {
            tracing::debug!(label_id, "predicted label not in label map");
            return Outcome::Unrecognized;
        };
        if distance.is_nan() || distance >= self.rejection_distance {
            return Outcome::Unrecognized;
        }

        let name = name.to_string();
        let confidence = confidence_from_distance(distance);
        if confidence >= self.high_min {
            Outcome::HighConfidence { name, confidence }
        } else if confidence >= self.medium_min {
            Outcome::MediumConfidence { name, confidence }
        } else {
            Outcome::LowConfidence { name, confidence }
        }
    }
}

/// Classify with the canonical policy.
pub fn classify(label_id: u32, distance: f64, label_map: &LabelMap) -> Outcome {
    ConfidencePolicy::default().classify(label_id, distance, label_map)
}
