// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-backed concerns shared by several layers:
//
//   checkpoint.rs      — transformer weights (Burn CompactRecorder),
//                        config JSON and best-params records
//
//   tokenizer_store.rs — loads a pretrained tokenizer.json, or
//                        builds a word-level one from the corpus;
//                        SentenceEncoder pads/truncates to max_len
//
//   metrics.rs         — append-only CSV logs of epochs and of
//                        repeated-validation runs
//
//   report.rs          — prediction / error / score tables and
//                        classification reports for review
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint and config persistence
pub mod checkpoint;

/// Tokenizer loading and sentence encoding
pub mod tokenizer_store;

/// Epoch and validation-run CSV loggers
pub mod metrics;

/// CSV / JSON evaluation exports
pub mod report;
