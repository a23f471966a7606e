// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing what the
// pipeline works on: documents, sentence features, labels,
// hyperparameters, the estimator capability surface and the
// error taxonomy.
//
// Rules for this layer:
//   - NO Burn framework types
//   - NO file I/O
//   - NO model code

// Document map, sequence configurations, document ids
pub mod document;

// Fixed-schema per-sentence features
pub mod features;

// Narrative / not-narrative labels
pub mod label;

// Key/value hyperparameter overrides
pub mod params;

// Estimator trait and target/probability views
pub mod traits;

// Error kinds shared by every core layer
pub mod error;
