// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Both classifiers in this project expose the same capability
// surface so the validation harness and the hyperparameter
// search can run either one without knowing which it is:
//
//   fit            → train on samples + targets
//   predict        → targets for new samples
//   predict_proba  → per-label probabilities
//   score          → weighted F1 against known targets
//   set_params     → apply hyperparameter overrides
//
// Implementations:
//   - CrfEstimator          → sample = sentence window, target = label per sentence
//   - TransformerEstimator  → sample = sentence text,   target = one label
//
// The shapes differ, so the trait uses associated types. The
// small `LabelSteps` / `ProbaSteps` traits let generic code view
// either shape as a sequence (a scalar target is a sequence of one).

use std::collections::BTreeMap;

use crate::domain::error::Result;
use crate::domain::params::ParamSet;

/// Probability per label for one position.
pub type LabelProbabilities = BTreeMap<String, f64>;

// ─── LabelSteps ───────────────────────────────────────────────────────────────
/// A target viewed as an ordered run of labels.
pub trait LabelSteps {
    fn label_steps(&self) -> &[String];
}

impl LabelSteps for String {
    fn label_steps(&self) -> &[String] {
        std::slice::from_ref(self)
    }
}

impl LabelSteps for Vec<String> {
    fn label_steps(&self) -> &[String] {
        self.as_slice()
    }
}

// ─── ProbaSteps ───────────────────────────────────────────────────────────────
/// A probability output viewed as an ordered run of per-position maps.
pub trait ProbaSteps {
    fn proba_steps(&self) -> &[LabelProbabilities];
}

impl ProbaSteps for LabelProbabilities {
    fn proba_steps(&self) -> &[LabelProbabilities] {
        std::slice::from_ref(self)
    }
}

impl ProbaSteps for Vec<LabelProbabilities> {
    fn proba_steps(&self) -> &[LabelProbabilities] {
        self.as_slice()
    }
}

/// Flatten nested targets into one label list, preserving order.
pub fn flatten_labels<T: LabelSteps>(targets: &[T]) -> Vec<String> {
    targets
        .iter()
        .flat_map(|t| t.label_steps().iter().cloned())
        .collect()
}

// ─── Estimator ────────────────────────────────────────────────────────────────
/// Uniform fit / predict surface shared by the CRF and the transformer.
pub trait Estimator {
    type Sample;
    type Target: LabelSteps + Clone;
    type Proba: ProbaSteps;

    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &[Self::Sample], y: &[Self::Target]) -> Result<()>;

    fn predict(&self, x: &[Self::Sample]) -> Result<Vec<Self::Target>>;

    fn predict_proba(&self, x: &[Self::Sample]) -> Result<Vec<Self::Proba>>;

    /// Weighted-average F1 over the fitted classes.
    fn score(&self, x: &[Self::Sample], y: &[Self::Target]) -> Result<f64>;

    fn set_params(&mut self, params: &ParamSet) -> Result<()>;

    /// Labels seen during `fit`, in the estimator's own order.
    fn classes(&self) -> Option<&[String]>;
}
