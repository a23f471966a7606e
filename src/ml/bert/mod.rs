//! Transformer sentence classifier: a BERT-style encoder with a
//! two-layer head, its training loop and the estimator wrapper.

pub mod estimator;
pub mod model;
pub mod trainer;

pub use estimator::TransformerEstimator;
pub use trainer::BertConfig;
