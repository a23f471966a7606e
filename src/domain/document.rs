// ============================================================
// Layer 3 — Document Map
// ============================================================
// A transcript is one document. For every document we keep:
//
//   - per sequence configuration (seq_len, step):
//       samples: windows of sentence feature records   (CRF)
//       labels:  one label per sentence in each window
//   - the per-sentence features + labels the windows are cut from
//   - raw sentence texts + labels                      (transformer)
//
// Invariant: inside one configuration `samples.len() == labels.len()`
// and every window has as many labels as sentences. Windows are built
// per document so a sample never spans two transcripts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};
use crate::domain::features::SentenceFeatures;

/// Document identifier. String keys on disk are normalised to this.
pub type DocId = u32;

// ─── SeqConfig ────────────────────────────────────────────────────────────────
/// Sliding window configuration: window length and stride, in sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeqConfig {
    pub seq_len: usize,
    pub step: usize,
}

impl SeqConfig {
    pub fn new(seq_len: usize, step: usize) -> Self {
        Self { seq_len, step }
    }

    /// Key of the feature windows, e.g. "X_3_3"
    pub fn x_key(&self) -> String {
        format!("X_{}_{}", self.seq_len, self.step)
    }

    /// Key of the label windows, e.g. "y_3_3"
    pub fn y_key(&self) -> String {
        format!("y_{}_{}", self.seq_len, self.step)
    }

    /// Parse "X_3_3" / "y_3_3" into ('X' | 'y', config).
    pub fn parse_key(key: &str) -> Option<(char, SeqConfig)> {
        let (kind, rest) = if let Some(rest) = key.strip_prefix("X_") {
            ('X', rest)
        } else if let Some(rest) = key.strip_prefix("y_") {
            ('y', rest)
        } else {
            return None;
        };
        let (len, step) = rest.split_once('_')?;
        Some((kind, SeqConfig::new(len.parse().ok()?, step.parse().ok()?)))
    }
}

impl Default for SeqConfig {
    fn default() -> Self {
        Self::new(3, 3)
    }
}

impl fmt::Display for SeqConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.seq_len, self.step)
    }
}

// ─── SequenceSet ──────────────────────────────────────────────────────────────
/// Windows of one document at one configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceSet {
    samples: Vec<Vec<SentenceFeatures>>,
    labels: Vec<Vec<String>>,
}

impl SequenceSet {
    pub fn new(samples: Vec<Vec<SentenceFeatures>>, labels: Vec<Vec<String>>) -> Result<Self> {
        if samples.len() != labels.len() {
            return Err(PipelineError::invalid_input(format!(
                "{} sequences but {} label sequences",
                samples.len(),
                labels.len()
            )));
        }
        if let Some(i) = samples.iter().zip(&labels).position(|(x, y)| x.len() != y.len()) {
            return Err(PipelineError::invalid_input(format!(
                "sequence {i} has {} sentences but {} labels",
                samples[i].len(),
                labels[i].len()
            )));
        }
        Ok(Self { samples, labels })
    }

    pub fn samples(&self) -> &[Vec<SentenceFeatures>] {
        &self.samples
    }

    pub fn labels(&self) -> &[Vec<String>] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ─── DocumentRecord ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    sequences: BTreeMap<SeqConfig, SequenceSet>,
    sentences: Vec<SentenceFeatures>,
    sentence_labels: Vec<String>,
    texts: Vec<String>,
    text_labels: Vec<String>,
}

impl DocumentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sequences(&mut self, config: SeqConfig, set: SequenceSet) {
        self.sequences.insert(config, set);
    }

    pub fn sequences(&self, config: SeqConfig) -> Option<&SequenceSet> {
        self.sequences.get(&config)
    }

    pub fn configs(&self) -> impl Iterator<Item = SeqConfig> + '_ {
        self.sequences.keys().copied()
    }

    pub fn set_sentences(&mut self, sentences: Vec<SentenceFeatures>, labels: Vec<String>) -> Result<()> {
        if sentences.len() != labels.len() {
            return Err(PipelineError::invalid_input(format!(
                "{} sentences but {} sentence labels",
                sentences.len(),
                labels.len()
            )));
        }
        self.sentences = sentences;
        self.sentence_labels = labels;
        Ok(())
    }

    pub fn sentences(&self) -> (&[SentenceFeatures], &[String]) {
        (&self.sentences, &self.sentence_labels)
    }

    pub fn set_texts(&mut self, texts: Vec<String>, labels: Vec<String>) -> Result<()> {
        if texts.len() != labels.len() {
            return Err(PipelineError::invalid_input(format!(
                "{} sentence texts but {} text labels",
                texts.len(),
                labels.len()
            )));
        }
        self.texts = texts;
        self.text_labels = labels;
        Ok(())
    }

    pub fn texts(&self) -> (&[String], &[String]) {
        (&self.texts, &self.text_labels)
    }
}

// ─── DocumentMap ──────────────────────────────────────────────────────────────
/// All documents of a corpus, keyed by id. Iteration is in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMap {
    docs: BTreeMap<DocId, DocumentRecord>,
}

impl DocumentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: DocId, record: DocumentRecord) {
        self.docs.insert(id, record);
    }

    pub fn get(&self, id: DocId) -> Option<&DocumentRecord> {
        self.docs.get(&id)
    }

    pub fn get_mut(&mut self, id: DocId) -> Option<&mut DocumentRecord> {
        self.docs.get_mut(&id)
    }

    pub fn ids(&self) -> BTreeSet<DocId> {
        self.docs.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DocId, &DocumentRecord)> {
        self.docs.iter().map(|(id, r)| (*id, r))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (DocId, &mut DocumentRecord)> {
        self.docs.iter_mut().map(|(id, r)| (*id, r))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Restrict the map to the given ids (missing ids are ignored).
    pub fn select(&self, ids: &BTreeSet<DocId>) -> DocumentMap {
        DocumentMap {
            docs: self
                .docs
                .iter()
                .filter(|(id, _)| ids.contains(id))
                .map(|(id, r)| (*id, r.clone()))
                .collect(),
        }
    }
}
