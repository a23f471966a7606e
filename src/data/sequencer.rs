// ============================================================
// Layer 4 — Sentence Windowing
// ============================================================
// Cuts one document's sentence list into windows of `seq_len`
// sentences, starting a new window every `step` sentences:
//
//   items = [s0 s1 s2 s3 s4], seq_len = 3, step = 2
//   → [s0 s1 s2] [s2 s3 s4] [s4]
//
// The final window may be shorter. Windows are built per
// document, so they never cross a transcript boundary.

use crate::domain::document::{DocumentMap, SeqConfig, SequenceSet};
use crate::domain::error::{PipelineError, Result};

pub fn reshape_to_seq<T: Clone>(items: &[T], config: SeqConfig) -> Result<Vec<Vec<T>>> {
    if config.seq_len == 0 || config.step == 0 {
        return Err(PipelineError::invalid_input(format!(
            "seq_len and step must be positive, got {config}"
        )));
    }
    Ok((0..items.len())
        .step_by(config.step)
        .map(|start| items[start..(start + config.seq_len).min(items.len())].to_vec())
        .collect())
}

/// Make sure every document has windows for `config`, building them from
/// the per-sentence lists where they are missing.
///
/// Returns the number of documents that had to be windowed.
pub fn ensure_sequences(map: &mut DocumentMap, config: SeqConfig) -> Result<usize> {
    let mut built = 0;
    for (doc_id, record) in map.iter_mut() {
        if record.sequences(config).is_some() {
            continue;
        }
        let (sentences, labels) = record.sentences();
        if sentences.is_empty() {
            return Err(PipelineError::invalid_input(format!(
                "document {doc_id} has no '{}' sequences and no per-sentence features to build them from",
                config.x_key()
            )));
        }
        let samples = reshape_to_seq(sentences, config)?;
        let label_windows = reshape_to_seq(labels, config)?;
        let set = SequenceSet::new(samples, label_windows)
            .map_err(|e| PipelineError::invalid_input(format!("document {doc_id}: {e}")))?;
        record.insert_sequences(config, set);
        built += 1;
    }
    if built > 0 {
        tracing::info!("Built {} windows for {} documents", config, built);
    }
    Ok(built)
}
