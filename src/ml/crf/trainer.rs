// ============================================================
// Layer 5 — CRF Training
// ============================================================
// Objective over N training sequences:
//
//   f(w) = Σ_n [ log Z(x_n) - score(y_n | x_n) ] + c2 · ||w||²
//
// Gradient per weight = expected count - observed count:
//
//   state (a, y):   Σ_t v_a(x_t) · ( P(y_t = y) - [y_t = y] )
//   trans (i → j):  Σ_t ( P(y_{t-1} = i, y_t = j) - [y_{t-1}=i, y_t=j] )
//
// plus 2 · c2 · w. The L1 term c1 · ||w||₁ is handled by the
// optimiser (OWL-QN), not here.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::features::SentenceFeatures;
use crate::ml::crf::features::{EncodedSequence, FeatureIndex};
use crate::ml::crf::lbfgs::{minimize, LbfgsParams};
use crate::ml::crf::model::{CrfModel, Lattice};

// ─── CrfConfig ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrfConfig {
    /// L1 coefficient
    pub c1: f64,
    /// L2 coefficient
    pub c2: f64,
    /// Minimum summed attribute value for a state feature to be kept
    pub min_freq: f64,
    pub max_iterations: usize,
    /// Give every label pair a trainable transition weight
    pub all_possible_transitions: bool,
    /// Convergence threshold on the relative gradient norm
    pub epsilon: f64,
    /// Number of L-BFGS correction pairs
    pub history: usize,
}

impl Default for CrfConfig {
    fn default() -> Self {
        Self {
            c1:                       0.1,
            c2:                       0.1,
            min_freq:                 5.0,
            max_iterations:           100,
            all_possible_transitions: true,
            epsilon:                  1e-5,
            history:                  6,
        }
    }
}

/// Negative log-likelihood plus L2 penalty, and its gradient.
pub fn objective(
    index:     &FeatureIndex,
    sequences: &[EncodedSequence],
    c2:        f64,
    weights:   &[f64],
    grad:      &mut [f64],
) -> f64 {
    grad.iter_mut().for_each(|g| *g = 0.0);
    let n = index.n_labels();
    let mut loss = 0.0;

    for seq in sequences {
        if seq.items.is_empty() {
            continue;
        }
        let lattice = Lattice::new(index, weights, &seq.items);
        let fb = lattice.forward_backward();
        loss += fb.log_z - lattice.path_score(&seq.labels);

        for (t, item) in seq.items.iter().enumerate() {
            let gold = seq.labels[t];
            let marginals: Vec<f64> = (0..n).map(|y| fb.node_marginal(t, y)).collect();
            for &(attr, value) in item {
                for &(label, fid) in index.state_features(attr) {
                    grad[fid] += marginals[label] * value;
                    if label == gold {
                        grad[fid] -= value;
                    }
                }
            }

            if t > 0 {
                let prev_gold = seq.labels[t - 1];
                for i in 0..n {
                    for j in 0..n {
                        if let Some(fid) = index.transition(i, j) {
                            grad[fid] += fb.edge_marginal(&lattice, t, i, j);
                            if i == prev_gold && j == gold {
                                grad[fid] -= 1.0;
                            }
                        }
                    }
                }
            }
        }
    }

    if c2 > 0.0 {
        for (g, w) in grad.iter_mut().zip(weights) {
            loss += c2 * w * w;
            *g += 2.0 * c2 * w;
        }
    }
    loss
}

/// Fit a CRF on already-validated sequences.
pub fn train(x: &[Vec<SentenceFeatures>], y: &[Vec<String>], config: &CrfConfig) -> CrfModel {
    let index = FeatureIndex::build(x, y, config.min_freq, config.all_possible_transitions);
    let sequences: Vec<EncodedSequence> = x
        .iter()
        .zip(y)
        .filter_map(|(items, labels)| index.encode(items, labels))
        .collect();

    info!(
        sequences  = sequences.len(),
        labels     = index.n_labels(),
        attributes = index.n_attributes(),
        weights    = index.n_weights(),
        "Training CRF"
    );

    let params = LbfgsParams {
        c1:             config.c1,
        max_iterations: config.max_iterations,
        epsilon:        config.epsilon,
        history:        config.history,
    };
    let minimum = minimize(vec![0.0; index.n_weights()], &params, |w, g| {
        objective(&index, &sequences, config.c2, w, g)
    });

    info!(
        iterations = minimum.iterations,
        loss       = minimum.value,
        stop       = ?minimum.reason,
        "CRF training finished"
    );
    CrfModel::new(index, minimum.x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::FeatureValue;

    fn sent(token: &str) -> SentenceFeatures {
        let mut f = SentenceFeatures::default();
        f.set("TOKEN", FeatureValue::Text(token.into())).unwrap();
        f.set("bias", FeatureValue::Number(1.0)).unwrap();
        f
    }

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn toy() -> (Vec<Vec<SentenceFeatures>>, Vec<Vec<String>>) {
        let x = vec![
            vec![sent("hello"), sent("remember"), sent("then")],
            vec![sent("remember"), sent("then"), sent("okay")],
            vec![sent("hello"), sent("okay")],
        ];
        let y = vec![
            labels(&["not_nar", "is_nar", "is_nar"]),
            labels(&["is_nar", "is_nar", "not_nar"]),
            labels(&["not_nar", "not_nar"]),
        ];
        (x, y)
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let (x, y) = toy();
        let index = FeatureIndex::build(&x, &y, 0.0, true);
        let seqs: Vec<_> = x.iter().zip(&y).filter_map(|(i, l)| index.encode(i, l)).collect();

        let w: Vec<f64> = (0..index.n_weights()).map(|i| 0.1 * ((i % 5) as f64 - 2.0)).collect();
        let mut grad = vec![0.0; w.len()];
        objective(&index, &seqs, 0.05, &w, &mut grad);

        let h = 1e-6;
        let mut scratch = vec![0.0; w.len()];
        for k in 0..w.len() {
            let mut plus = w.clone();
            plus[k] += h;
            let mut minus = w.clone();
            minus[k] -= h;
            let numeric = (objective(&index, &seqs, 0.05, &plus, &mut scratch)
                - objective(&index, &seqs, 0.05, &minus, &mut scratch))
                / (2.0 * h);
            assert!((numeric - grad[k]).abs() < 1e-5, "weight {k}: {numeric} vs {}", grad[k]);
        }
    }

    #[test]
    fn test_training_reduces_loss_and_fits_toy_data() {
        let (x, y) = toy();
        let config = CrfConfig { min_freq: 0.0, c1: 0.0, c2: 0.01, ..CrfConfig::default() };
        let model = train(&x, &y, &config);

        let index = model.index();
        let seqs: Vec<_> = x.iter().zip(&y).filter_map(|(i, l)| index.encode(i, l)).collect();
        let mut g = vec![0.0; index.n_weights()];
        let at_zero = objective(index, &seqs, 0.01, &vec![0.0; index.n_weights()], &mut g);
        let trained = objective(index, &seqs, 0.01, model.weights(), &mut g);
        assert!(trained < at_zero);

        for (items, gold) in x.iter().zip(&y) {
            let tags = model.tag(&index.encode_items(items));
            let predicted: Vec<&str> = tags.iter().map(|&t| model.labels()[t].as_str()).collect();
            assert_eq!(predicted, gold.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_strong_l1_zeroes_weights() {
        let (x, y) = toy();
        let config = CrfConfig { min_freq: 0.0, c1: 100.0, c2: 0.0, ..CrfConfig::default() };
        let model = train(&x, &y, &config);
        assert_eq!(model.active_features(), 0);
    }
}
