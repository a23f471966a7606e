// ============================================================
// Layer 5 — Linear-Chain CRF Model
// ============================================================
// score(y | x) = Σ_t emit[t][y_t] + Σ_{t>0} trans[y_{t-1}][y_t]
//
//   emit[t][y]   = Σ_{(a, v) ∈ x_t} w[state(a, y)] · v
//   trans[i][j]  = w[transition(i, j)]  (0 when the pair has no weight)
//
// Decoding is joint: Viterbi returns the single best label
// sequence. Forward-backward in log space gives log Z and the
// per-position marginals used as confidence scores; marginals
// never decide the predicted labels.

use serde::{Deserialize, Serialize};

use crate::ml::crf::features::{EncodedItem, FeatureIndex};

pub fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.map(|v| (v - max).exp()).sum::<f64>().ln()
}

// ─── Score lattice ────────────────────────────────────────────────────────────
/// Emission and transition scores for one sequence.
#[derive(Debug, Clone)]
pub struct Lattice {
    pub n_labels: usize,
    /// `[t][label]`
    pub emit:  Vec<Vec<f64>>,
    /// Row-major `[prev * n_labels + next]`
    pub trans: Vec<f64>,
}

/// Log-space forward-backward tables.
#[derive(Debug, Clone)]
pub struct ForwardBackward {
    pub alpha: Vec<Vec<f64>>,
    pub beta:  Vec<Vec<f64>>,
    pub log_z: f64,
}

impl Lattice {
    pub fn new(index: &FeatureIndex, weights: &[f64], items: &[EncodedItem]) -> Self {
        let n = index.n_labels();
        let emit = items
            .iter()
            .map(|item| {
                let mut row = vec![0.0; n];
                for &(attr, value) in item {
                    for &(label, fid) in index.state_features(attr) {
                        row[label] += weights[fid] * value;
                    }
                }
                row
            })
            .collect();

        let mut trans = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                if let Some(fid) = index.transition(i, j) {
                    trans[i * n + j] = weights[fid];
                }
            }
        }
        Self { n_labels: n, emit, trans }
    }

    pub fn len(&self) -> usize {
        self.emit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emit.is_empty()
    }

    fn t(&self, prev: usize, next: usize) -> f64 {
        self.trans[prev * self.n_labels + next]
    }

    /// Unnormalised score of a complete label path.
    pub fn path_score(&self, labels: &[usize]) -> f64 {
        let mut score = 0.0;
        for (t, &y) in labels.iter().enumerate() {
            score += self.emit[t][y];
            if t > 0 {
                score += self.t(labels[t - 1], y);
            }
        }
        score
    }

    /// Best label path.
    pub fn viterbi(&self) -> Vec<usize> {
        let n = self.n_labels;
        let len = self.len();
        if len == 0 || n == 0 {
            return Vec::new();
        }

        let mut delta = self.emit[0].clone();
        let mut back: Vec<Vec<usize>> = Vec::with_capacity(len);
        back.push(vec![0; n]);

        for t in 1..len {
            let mut next = vec![f64::NEG_INFINITY; n];
            let mut ptr = vec![0usize; n];
            for j in 0..n {
                for i in 0..n {
                    let s = delta[i] + self.t(i, j);
                    // strict > keeps the lowest label id on ties
                    if s > next[j] {
                        next[j] = s;
                        ptr[j] = i;
                    }
                }
                next[j] += self.emit[t][j];
            }
            delta = next;
            back.push(ptr);
        }

        let mut best = 0;
        for j in 1..n {
            if delta[j] > delta[best] {
                best = j;
            }
        }
        let mut path = vec![best; len];
        for t in (1..len).rev() {
            path[t - 1] = back[t][path[t]];
        }
        path
    }

    pub fn forward_backward(&self) -> ForwardBackward {
        let n = self.n_labels;
        let len = self.len();
        let mut alpha = vec![vec![f64::NEG_INFINITY; n]; len];
        let mut beta  = vec![vec![0.0; n]; len];

        if len == 0 {
            return ForwardBackward { alpha, beta, log_z: 0.0 };
        }

        alpha[0] = self.emit[0].clone();
        for t in 1..len {
            for j in 0..n {
                let prev = &alpha[t - 1];
                let v = self.emit[t][j] + log_sum_exp((0..n).map(|i| prev[i] + self.t(i, j)));
                alpha[t][j] = v;
            }
        }

        for t in (0..len - 1).rev() {
            for i in 0..n {
                let next = &beta[t + 1];
                let v = log_sum_exp((0..n).map(|j| self.t(i, j) + self.emit[t + 1][j] + next[j]));
                beta[t][i] = v;
            }
        }

        let log_z = log_sum_exp(alpha[len - 1].iter().copied());
        ForwardBackward { alpha, beta, log_z }
    }
}

impl ForwardBackward {
    /// P(y_t = label | x)
    pub fn node_marginal(&self, t: usize, label: usize) -> f64 {
        (self.alpha[t][label] + self.beta[t][label] - self.log_z).exp()
    }

    /// P(y_{t-1} = prev, y_t = next | x), t ≥ 1
    pub fn edge_marginal(&self, lattice: &Lattice, t: usize, prev: usize, next: usize) -> f64 {
        (self.alpha[t - 1][prev]
            + lattice.t(prev, next)
            + lattice.emit[t][next]
            + self.beta[t][next]
            - self.log_z)
            .exp()
    }
}

// ─── CrfModel ─────────────────────────────────────────────────────────────────
/// A trained CRF: feature index plus learned weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrfModel {
    index:   FeatureIndex,
    weights: Vec<f64>,
}

impl CrfModel {
    pub fn new(index: FeatureIndex, weights: Vec<f64>) -> Self {
        Self { index, weights }
    }

    pub fn index(&self) -> &FeatureIndex {
        &self.index
    }

    pub fn labels(&self) -> &[String] {
        self.index.labels()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of weights the L1 penalty left non-zero.
    pub fn active_features(&self) -> usize {
        self.weights.iter().filter(|w| **w != 0.0).count()
    }

    pub fn lattice(&self, items: &[EncodedItem]) -> Lattice {
        Lattice::new(&self.index, &self.weights, items)
    }

    pub fn tag(&self, items: &[EncodedItem]) -> Vec<usize> {
        self.lattice(items).viterbi()
    }

    /// Per-position label probabilities, `[t][label]`.
    pub fn marginals(&self, items: &[EncodedItem]) -> Vec<Vec<f64>> {
        let lattice = self.lattice(items);
        let fb = lattice.forward_backward();
        (0..lattice.len())
            .map(|t| (0..lattice.n_labels).map(|y| fb.node_marginal(t, y)).collect())
            .collect()
    }
}
