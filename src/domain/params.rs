// ============================================================
// Layer 3 — Hyperparameter Sets
// ============================================================
// Estimators accept parameter overrides as plain key/value pairs
// (from `--param c1=0.05` flags, a saved best-params JSON record,
// or a grid search). Each estimator maps the keys it knows onto
// its typed config and rejects the rest.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet {
    values: BTreeMap<String, String>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Parse "key=value".
    pub fn parse_pair(pair: &str) -> Result<(String, String)> {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| PipelineError::invalid_input(format!("expected key=value, got '{pair}'")))?;
        let k = k.trim();
        if k.is_empty() {
            return Err(PipelineError::invalid_input(format!("empty parameter name in '{pair}'")));
        }
        Ok((k.to_string(), v.trim().to_string()))
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut set = ParamSet::new();
        for pair in pairs {
            let (k, v) = Self::parse_pair(pair)?;
            set.values.insert(k, v);
        }
        Ok(set)
    }

    /// Read a flat JSON object; scalar values of any type are accepted.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| PipelineError::invalid_input("parameter record must be a JSON object"))?;
        let mut set = ParamSet::new();
        for (k, v) in map {
            let rendered = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(PipelineError::invalid_input(format!(
                        "parameter '{k}' must be a scalar"
                    )))
                }
            };
            set.values.insert(k.clone(), rendered);
        }
        Ok(set)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn merged(&self, other: &ParamSet) -> ParamSet {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        ParamSet { values }
    }
}

/// Parse one parameter value, naming the key on failure.
pub fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| PipelineError::invalid_input(format!("cannot parse parameter {key}='{value}'")))
}

pub fn unknown_param(estimator: &str, key: &str) -> PipelineError {
    PipelineError::invalid_input(format!("{estimator} has no parameter '{key}'"))
}
