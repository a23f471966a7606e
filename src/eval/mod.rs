// ============================================================
// Layer 5 — Evaluation
// ============================================================
// Everything that happens after an estimator has produced
// predictions, plus the loop that produces them repeatedly.
//
//   harness    → split / fit / predict / score, N times
//   flatten    → nested predictions → flat records, errors first
//   alignment  → join records back to features and sentence rows

pub mod alignment;
pub mod flatten;
pub mod harness;
