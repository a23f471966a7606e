// ============================================================
// Layer 4 — Sequence Assembler
// ============================================================
// Turns a set of document ids into the flat lists an estimator
// trains on:
//
//   X      : every sample of every selected document, in order
//   y      : the matching targets
//   groups : the document id of each sample (for re-aggregation)
//
// This is the only place samples are pulled out of the document
// map, so a split made by document id can never leak samples of
// one document into the other side.
//
// Which samples a document contributes depends on the estimator:
// a `DocumentView` picks them (CRF windows at one configuration,
// or raw sentence texts for the transformer).

use crate::domain::document::{DocId, DocumentMap, DocumentRecord, SeqConfig};
use crate::domain::error::{PipelineError, Result};
use crate::domain::features::SentenceFeatures;

/// Flat, document-grouped samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled<S, T> {
    pub x: Vec<S>,
    pub y: Vec<T>,
    pub groups: Vec<DocId>,
}

impl<S, T> Assembled<S, T> {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

// ─── DocumentView ─────────────────────────────────────────────────────────────
/// Selects the samples and targets one document contributes.
pub trait DocumentView {
    type Sample: Clone;
    type Target: Clone;

    fn view<'a>(
        &self,
        doc_id: DocId,
        record: &'a DocumentRecord,
    ) -> Result<(&'a [Self::Sample], &'a [Self::Target])>;
}

/// CRF windows at a fixed (seq_len, step) configuration.
#[derive(Debug, Clone, Copy)]
pub struct SequenceView {
    pub config: SeqConfig,
}

impl SequenceView {
    pub fn new(config: SeqConfig) -> Self {
        Self { config }
    }
}

impl DocumentView for SequenceView {
    type Sample = Vec<SentenceFeatures>;
    type Target = Vec<String>;

    fn view<'a>(
        &self,
        doc_id: DocId,
        record: &'a DocumentRecord,
    ) -> Result<(&'a [Self::Sample], &'a [Self::Target])> {
        let set = record.sequences(self.config).ok_or_else(|| {
            PipelineError::invalid_input(format!(
                "document {doc_id} has no '{}' sequences",
                self.config.x_key()
            ))
        })?;
        Ok((set.samples(), set.labels()))
    }
}

/// One sample per sentence text (transformer path).
#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceView;

impl DocumentView for SentenceView {
    type Sample = String;
    type Target = String;

    fn view<'a>(
        &self,
        _doc_id: DocId,
        record: &'a DocumentRecord,
    ) -> Result<(&'a [Self::Sample], &'a [Self::Target])> {
        Ok(record.texts())
    }
}

/// Concatenate the samples of `doc_ids` (in iteration order) into flat lists.
///
/// # Errors
/// InvalidInput if an id is missing from the map, the view has nothing for
/// it, or a document's samples and targets differ in length.
pub fn assemble<'i, V: DocumentView>(
    map: &DocumentMap,
    doc_ids: impl IntoIterator<Item = &'i DocId>,
    view: &V,
) -> Result<Assembled<V::Sample, V::Target>> {
    let mut out = Assembled {
        x: Vec::new(),
        y: Vec::new(),
        groups: Vec::new(),
    };

    for &doc_id in doc_ids {
        let record = map
            .get(doc_id)
            .ok_or_else(|| PipelineError::invalid_input(format!("document {doc_id} is not in the document map")))?;
        let (samples, targets) = view.view(doc_id, record)?;
        if samples.len() != targets.len() {
            return Err(PipelineError::invalid_input(format!(
                "document {doc_id}: {} samples but {} targets",
                samples.len(),
                targets.len()
            )));
        }
        out.x.extend_from_slice(samples);
        out.y.extend_from_slice(targets);
        out.groups.extend(std::iter::repeat(doc_id).take(samples.len()));
    }

    debug_assert_eq!(out.x.len(), out.y.len());
    debug_assert_eq!(out.x.len(), out.groups.len());
    Ok(out)
}
