// ============================================================
// Layer 5 — Feature Re-alignment
// ============================================================
// Joins flattened predictions back onto the data they came from
// so errors can be read in context.
//
//   record (seq_idx, idx_in_seq)
//       │
//       ├──► X_test[seq_idx][idx_in_seq]         → feature columns
//       │
//       └──► sentence table of record.doc_idx
//              row where par_idx_in_doc  == features.par_idx_in_doc
//                    and sent_idx_in_par == features.sent_idx_in_par
//                                                  → text + sentence columns
//
// A lookup that finds zero or several rows is not fatal: the row
// keeps its missing values, a warning is logged and the error is
// collected for the caller.

use std::collections::BTreeMap;

use tracing::warn;

use crate::data::sentence_table::SentenceTable;
use crate::domain::document::DocId;
use crate::domain::error::{PipelineError, Result};
use crate::domain::features::SentenceFeatures;
use crate::eval::flatten::PredictionRecord;

fn sample<'a>(x_test: &'a [Vec<SentenceFeatures>], record: &PredictionRecord) -> Option<&'a SentenceFeatures> {
    x_test.get(record.seq_idx)?.get(record.idx_in_seq)
}

/// Copy every feature of the originating sample into the record.
///
/// # Errors
/// InvalidInput if a record points outside `x_test`.
pub fn attach_sample_features(records: &mut [PredictionRecord], x_test: &[Vec<SentenceFeatures>]) -> Result<()> {
    for record in records.iter_mut() {
        let features = sample(x_test, record).ok_or_else(|| {
            PipelineError::invalid_input(format!(
                "record ({}, {}) of document {} has no sample in X_test",
                record.seq_idx, record.idx_in_seq, record.doc_idx
            ))
        })?;
        for (name, value) in features.iter() {
            record.features.insert(name, value.render());
        }
    }
    Ok(())
}

/// Copy the matching sentence-table row into each record.
///
/// Returns one `AmbiguousMatch` per record that did not match exactly one row.
pub fn retrieve_sentence_info(
    records: &mut [PredictionRecord],
    x_test:  &[Vec<SentenceFeatures>],
    tables:  &BTreeMap<DocId, SentenceTable>,
) -> Vec<PipelineError> {
    let mut problems = Vec::new();

    for record in records.iter_mut() {
        let position = sample(x_test, record).and_then(|f| f.par_idx_in_doc.zip(f.sent_idx_in_par));
        let matches = match (position, tables.get(&record.doc_idx)) {
            (Some((par, sent)), Some(table)) => table.matches(par, sent),
            _ => Vec::new(),
        };

        if let [row] = matches.as_slice() {
            for (column, value) in &row.columns {
                record.features.insert(column.clone(), value.clone());
            }
            continue;
        }

        let (par_idx, sent_idx) = position.unwrap_or((-1, -1));
        let err = PipelineError::AmbiguousMatch {
            doc_idx: record.doc_idx,
            seq_idx: record.seq_idx,
            idx_in_seq: record.idx_in_seq,
            par_idx,
            sent_idx,
            matches: matches.len(),
        };
        warn!("{err}");
        problems.push(err);
    }

    if !problems.is_empty() {
        warn!("{} of {} records could not be aligned to a sentence", problems.len(), records.len());
    }
    problems
}
