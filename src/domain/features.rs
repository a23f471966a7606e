// ============================================================
// Layer 3 — Per-Sentence Feature Schema
// ============================================================
// Each sentence fed to the CRF carries a record of lexical and
// positional features. The exported JSON stores them as a flat
// name → value object; here they are validated once, at
// ingestion, into a fixed schema:
//
//   - named optional fields for the features the pipeline itself
//     reads (positions used for re-alignment, speaker, length)
//   - a sparse `extra` map for the open-ended engineered features
//
// Only scalar values are accepted. Arrays / objects / null are
// rejected with InvalidInput so a malformed export fails before
// any model sees it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};

/// A single scalar feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FeatureValue {
    fn from_json(name: &str, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(FeatureValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .filter(|v| v.is_finite())
                .map(FeatureValue::Number)
                .ok_or_else(|| PipelineError::invalid_input(format!("feature '{name}' is not a finite number"))),
            serde_json::Value::String(s) => Ok(FeatureValue::Text(s.clone())),
            other => Err(PipelineError::invalid_input(format!(
                "feature '{name}' must be a scalar, got {}",
                json_kind(other)
            ))),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FeatureValue::Number(n) => Some(*n),
            FeatureValue::Text(_) => None,
        }
    }

    /// Render for CSV / report columns.
    pub fn render(&self) -> String {
        match self {
            FeatureValue::Bool(b) => b.to_string(),
            FeatureValue::Number(n) => n.to_string(),
            FeatureValue::Text(s) => s.clone(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
        serde_json::Value::Bool(_) => "a bool",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
    }
}

// ─── SentenceFeatures ────────────────────────────────────────────────────────
/// Validated feature record for one sentence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentenceFeatures {
    /// Paragraph index inside the source document
    pub par_idx_in_doc: Option<i64>,
    /// Sentence index inside its paragraph
    pub sent_idx_in_par: Option<i64>,
    /// Sentence length in characters
    pub sent_len: Option<f64>,
    /// Whether the paragraph was spoken by the client
    pub is_client: Option<bool>,
    /// "client" / "therapist" / "no_mark"
    pub par_type: Option<String>,
    /// Surface token / text feature (exported as "TOKEN")
    pub token: Option<String>,
    /// Every other engineered feature
    pub extra: BTreeMap<String, FeatureValue>,
}

impl SentenceFeatures {
    pub const PAR_IDX_IN_DOC: &'static str = "par_idx_in_doc";
    pub const SENT_IDX_IN_PAR: &'static str = "sent_idx_in_par";
    pub const SENT_LEN: &'static str = "sent_len";
    pub const IS_CLIENT: &'static str = "is_client";
    pub const PAR_TYPE: &'static str = "par_type";
    pub const TOKEN: &'static str = "TOKEN";

    /// Validate a raw JSON feature object into the fixed schema.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            PipelineError::invalid_input(format!(
                "sentence features must be an object, got {}",
                json_kind(value)
            ))
        })?;

        let mut features = SentenceFeatures::default();
        for (name, raw) in map {
            let v = FeatureValue::from_json(name, raw)?;
            features.set(name, v)?;
        }
        Ok(features)
    }

    /// Set a feature by its exported name.
    pub fn set(&mut self, name: &str, value: FeatureValue) -> Result<()> {
        match name {
            Self::PAR_IDX_IN_DOC => self.par_idx_in_doc = Some(as_index(name, &value)?),
            Self::SENT_IDX_IN_PAR => self.sent_idx_in_par = Some(as_index(name, &value)?),
            Self::SENT_LEN => {
                self.sent_len = Some(value.as_f64().ok_or_else(|| {
                    PipelineError::invalid_input(format!("feature '{name}' must be numeric"))
                })?)
            }
            Self::IS_CLIENT => {
                self.is_client = Some(match value {
                    FeatureValue::Bool(b) => b,
                    FeatureValue::Number(n) => n != 0.0,
                    FeatureValue::Text(ref s) => s == "client" || s == "1" || s == "true",
                })
            }
            Self::PAR_TYPE => self.par_type = Some(value.render()),
            Self::TOKEN => self.token = Some(value.render()),
            _ => {
                self.extra.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Look a feature up by its exported name.
    pub fn get(&self, name: &str) -> Option<FeatureValue> {
        match name {
            Self::PAR_IDX_IN_DOC => self.par_idx_in_doc.map(|v| FeatureValue::Number(v as f64)),
            Self::SENT_IDX_IN_PAR => self.sent_idx_in_par.map(|v| FeatureValue::Number(v as f64)),
            Self::SENT_LEN => self.sent_len.map(FeatureValue::Number),
            Self::IS_CLIENT => self.is_client.map(FeatureValue::Bool),
            Self::PAR_TYPE => self.par_type.clone().map(FeatureValue::Text),
            Self::TOKEN => self.token.clone().map(FeatureValue::Text),
            _ => self.extra.get(name).cloned(),
        }
    }

    /// All present features as (name, value) pairs, named fields first.
    pub fn iter(&self) -> impl Iterator<Item = (String, FeatureValue)> + '_ {
        let named = [
            Self::PAR_IDX_IN_DOC,
            Self::SENT_IDX_IN_PAR,
            Self::SENT_LEN,
            Self::IS_CLIENT,
            Self::PAR_TYPE,
            Self::TOKEN,
        ]
        .into_iter()
        .filter_map(move |name| self.get(name).map(|v| (name.to_string(), v)));
        named.chain(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// CRF attributes for this sentence.
    ///
    /// Text values become indicator attributes `name=value` (weight 1),
    /// numbers and bools become a single attribute `name` weighted by the value.
    pub fn attributes(&self) -> Vec<(String, f64)> {
        self.iter()
            .map(|(name, value)| match value {
                FeatureValue::Text(s) => (format!("{name}={s}"), 1.0),
                other => (name, other.as_f64().unwrap_or(0.0)),
            })
            .collect()
    }
}

fn as_index(name: &str, value: &FeatureValue) -> Result<i64> {
    match value {
        FeatureValue::Number(n) if n.fract() == 0.0 => Ok(*n as i64),
        _ => Err(PipelineError::invalid_input(format!(
            "feature '{name}' must be an integer position"
        ))),
    }
}
