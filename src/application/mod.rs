// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one experiment (validation, evaluation, search, training).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - No direct file parsing (that's Layer 4 and 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Repeated validation of the CRF or the transformer
pub mod validate_use_case;

// One CRF split with error analysis exports
pub mod evaluate_use_case;

// c1 × c2 grid search for the CRF
pub mod search_use_case;

// Transformer train / validate / test workflow
pub mod bert_use_case;
