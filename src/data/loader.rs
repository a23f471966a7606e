// ============================================================
// Layer 4 — Document Map Loader
// ============================================================
// Reads the exported document map (JSON) into a DocumentMap.
//
// Expected shape (per document, keyed by a string or integer id):
//
//   {
//     "1": {
//       "X_3_3":  [[{feature record}, ...], ...],   windows of sentences
//       "y_3_3":  [["not_nar", "is_nar", ...], ...],
//       "X":      [{feature record}, ...],          per sentence (optional)
//       "y":      ["not_nar", ...],
//       "X_bert": ["sentence text", ...],           transformer inputs
//       "y_bert": [0, 1, ...]
//     },
//     ...
//   }
//
// Every feature record is validated into SentenceFeatures here,
// once, so nothing downstream deals with untyped JSON.
// Errors name the document and key that failed.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::domain::document::{DocId, DocumentMap, DocumentRecord, SeqConfig, SequenceSet};
use crate::domain::error::PipelineError;
use crate::domain::features::SentenceFeatures;
use crate::domain::label::label_from_json;

pub struct DocumentMapLoader {
    path: std::path::PathBuf,
}

impl DocumentMapLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read and validate the whole document map.
    pub fn load(&self) -> Result<DocumentMap> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read document map '{}'", self.path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("'{}' is not valid JSON", self.path.display()))?;
        let map = parse_document_map(&value)
            .with_context(|| format!("Invalid document map '{}'", self.path.display()))?;
        tracing::info!("Loaded {} documents from '{}'", map.len(), self.path.display());
        Ok(map)
    }
}

/// Parse an in-memory JSON document map.
pub fn parse_document_map(value: &Value) -> crate::domain::error::Result<DocumentMap> {
    let obj = value
        .as_object()
        .ok_or_else(|| PipelineError::invalid_input("document map must be a JSON object"))?;

    let mut map = DocumentMap::new();
    for (key, raw) in obj {
        let doc_id: DocId = key
            .trim()
            .parse()
            .map_err(|_| PipelineError::invalid_input(format!("document key '{key}' is not an integer id")))?;
        let record = parse_record(doc_id, raw)?;
        map.insert(doc_id, record);
    }
    Ok(map)
}

fn parse_record(doc_id: DocId, value: &Value) -> crate::domain::error::Result<DocumentRecord> {
    let obj = value
        .as_object()
        .ok_or_else(|| PipelineError::invalid_input(format!("document {doc_id} must be a JSON object")))?;

    let mut record = DocumentRecord::new();

    // ── Windowed configurations: pair every X_a_b with its y_a_b ─────────────
    let mut windows: BTreeMap<SeqConfig, (Option<&Value>, Option<&Value>)> = BTreeMap::new();
    for (key, v) in obj {
        if let Some((kind, cfg)) = SeqConfig::parse_key(key) {
            let slot = windows.entry(cfg).or_default();
            match kind {
                'X' => slot.0 = Some(v),
                _ => slot.1 = Some(v),
            }
        }
    }
    for (cfg, (xs, ys)) in windows {
        let (xs, ys) = match (xs, ys) {
            (Some(xs), Some(ys)) => (xs, ys),
            _ => {
                return Err(PipelineError::invalid_input(format!(
                    "document {doc_id}: '{}' and '{}' must both be present",
                    cfg.x_key(),
                    cfg.y_key()
                )))
            }
        };
        let ctx = |e: PipelineError| PipelineError::invalid_input(format!("document {doc_id}, {}: {e}", cfg.x_key()));
        let samples = array(xs, &cfg.x_key(), doc_id)?
            .iter()
            .map(|seq| parse_feature_list(seq, doc_id, &cfg.x_key()))
            .collect::<crate::domain::error::Result<Vec<_>>>()?;
        let labels = array(ys, &cfg.y_key(), doc_id)?
            .iter()
            .map(|seq| parse_label_list(seq, doc_id, &cfg.y_key()))
            .collect::<crate::domain::error::Result<Vec<_>>>()?;
        record.insert_sequences(cfg, SequenceSet::new(samples, labels).map_err(ctx)?);
    }

    // ── Per-sentence features ────────────────────────────────────────────────
    if let (Some(xs), Some(ys)) = (obj.get("X"), obj.get("y")) {
        let sentences = parse_feature_list(xs, doc_id, "X")?;
        let labels = parse_label_list(ys, doc_id, "y")?;
        record
            .set_sentences(sentences, labels)
            .map_err(|e| PipelineError::invalid_input(format!("document {doc_id}: {e}")))?;
    }

    // ── Transformer inputs ───────────────────────────────────────────────────
    if let (Some(xs), Some(ys)) = (obj.get("X_bert"), obj.get("y_bert")) {
        let texts = array(xs, "X_bert", doc_id)?
            .iter()
            .map(|t| {
                t.as_str().map(str::to_string).ok_or_else(|| {
                    PipelineError::invalid_input(format!("document {doc_id}: X_bert entries must be strings"))
                })
            })
            .collect::<crate::domain::error::Result<Vec<_>>>()?;
        let labels = parse_label_list(ys, doc_id, "y_bert")?;
        record
            .set_texts(texts, labels)
            .map_err(|e| PipelineError::invalid_input(format!("document {doc_id}: {e}")))?;
    }

    Ok(record)
}

fn array<'a>(value: &'a Value, key: &str, doc_id: DocId) -> crate::domain::error::Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| PipelineError::invalid_input(format!("document {doc_id}: '{key}' must be an array")))
}

fn parse_feature_list(value: &Value, doc_id: DocId, key: &str) -> crate::domain::error::Result<Vec<SentenceFeatures>> {
    array(value, key, doc_id)?
        .iter()
        .enumerate()
        .map(|(i, f)| {
            SentenceFeatures::from_json(f)
                .map_err(|e| PipelineError::invalid_input(format!("document {doc_id}, '{key}' item {i}: {e}")))
        })
        .collect()
}

fn parse_label_list(value: &Value, doc_id: DocId, key: &str) -> crate::domain::error::Result<Vec<String>> {
    array(value, key, doc_id)?
        .iter()
        .enumerate()
        .map(|(i, l)| {
            label_from_json(l).ok_or_else(|| {
                PipelineError::invalid_input(format!("document {doc_id}, '{key}' item {i}: label must be a scalar"))
            })
        })
        .collect()
}
