// ============================================================
// Layer 3 — Narrative Labels
// ============================================================
// Sentences are either part of a narrative span or not.
// On disk labels appear as strings ("is_nar" / "not_nar") or as
// 0/1 numbers, depending on which export produced them.
// The transformer needs class indices; the CRF and the metrics
// work on the string form.

use serde::{Deserialize, Serialize};

pub const NOT_NARRATIVE: &str = "not_nar";
pub const NARRATIVE: &str = "is_nar";

/// Binary class used by the transformer classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NarrativeLabel {
    NotNarrative = 0,
    Narrative = 1,
}

impl NarrativeLabel {
    pub const ALL: [NarrativeLabel; 2] = [NarrativeLabel::NotNarrative, NarrativeLabel::Narrative];

    /// Fixed string → class mapping: "not_nar" (or "0") is class 0,
    /// every other label is class 1.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            NOT_NARRATIVE | "0" | "0.0" => NarrativeLabel::NotNarrative,
            _ => NarrativeLabel::Narrative,
        }
    }

    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            NarrativeLabel::NotNarrative
        } else {
            NarrativeLabel::Narrative
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NarrativeLabel::NotNarrative => NOT_NARRATIVE,
            NarrativeLabel::Narrative => NARRATIVE,
        }
    }
}

/// Normalise a label read from JSON into its string form.
/// Numbers are mapped through the binary class (0 → "not_nar").
pub fn label_from_json(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => {
            let v = n.as_f64()?;
            let label = if v == 0.0 {
                NarrativeLabel::NotNarrative
            } else {
                NarrativeLabel::Narrative
            };
            Some(label.as_str().to_string())
        }
        serde_json::Value::Bool(b) => Some(NarrativeLabel::from_index(*b as usize).as_str().to_string()),
        _ => None,
    }
}
