// ============================================================
// Layer 5 — ML / Model Layer
// ============================================================
// Both competing classifiers and the scores they are judged by.
//
//   crf/      Linear-chain CRF on sentence feature records.
//             Pure Rust: feature index, Viterbi and
//             forward-backward, L-BFGS with orthant-wise L1.
//
//   bert/     Transformer classifier on raw sentence text.
//             All Burn framework code lives here: encoder,
//             classification head, weighted-NLL training loop.
//
//   metrics   Flat per-label precision / recall / F1, weighted
//             averages and balanced class weights.
//
// Both estimators implement domain::traits::Estimator, so the
// evaluation harness never needs to know which one it runs.
//
// Reference: Lafferty et al. (2001) Conditional Random Fields
//            Andrew & Gao (2007) OWL-QN
//            Devlin et al. (2019) BERT

/// Linear-chain CRF estimator
pub mod crf;

/// Transformer estimator (Burn)
pub mod bert;

/// Flat classification metrics and class weights
pub mod metrics;
