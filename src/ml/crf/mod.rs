// ============================================================
// Layer 5 — Linear-Chain CRF
// ============================================================
//   features   attribute / label / transition → weight index
//   model      lattice scores, Viterbi, forward-backward
//   lbfgs      L-BFGS with orthant-wise L1 (OWL-QN)
//   trainer    NLL + L2 objective and the training entry point
//   estimator  CrfEstimator: the Estimator surface

pub mod estimator;
pub mod features;
pub mod lbfgs;
pub mod model;
pub mod trainer;

pub use estimator::CrfEstimator;
pub use trainer::CrfConfig;
