// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between the exported document map and the inputs
// an estimator consumes.
//
//   docs_map.json
//       │
//       ▼
//   DocumentMapLoader → validated DocumentMap
//       │
//       ▼
//   Sequencer         → builds missing (seq_len, step) windows
//       │
//       ▼
//   Splitter          → train / test document ids
//       │
//       ▼
//   Assembler         → flat X, y, groups per side
//       │
//       ├──► CRF estimator (sentence windows)
//       │
//       └──► SentenceItem → SentenceBatcher → transformer
//
// Sentence tables (per-document CSVs) are read separately for
// error analysis.

/// Reads and validates the JSON document map
pub mod loader;

/// Sliding windows over a document's sentences
pub mod sequencer;

/// Document-grouped train / test / validation splits
pub mod splitter;

/// Flattens selected documents into X / y / groups
pub mod assembler;

/// Per-document sentence CSV tables
pub mod sentence_table;

/// Tokenised sentence items
pub mod dataset;

/// Burn Batcher producing tensor batches
pub mod batcher;
