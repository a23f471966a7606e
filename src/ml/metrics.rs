// ============================================================
// Layer 5 — Flat Classification Metrics
// ============================================================
// Sequence predictions are scored after flattening: every
// sentence counts as one independent decision.
//
// Per label:
//   precision = tp / (tp + fp)      0 when nothing was predicted
//   recall    = tp / (tp + fn)      0 when the label never occurs
//   f1        = 2pr / (p + r)       0 when p + r = 0
//
// Weighted average: per-label scores weighted by true support.
// Scoring an empty ground truth is an EmptySplit error, never a
// division by zero.
//
// Class weights follow inverse-frequency balancing:
//   w_c = n_samples / (n_classes * count_c)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};
use crate::domain::traits::{flatten_labels, LabelSteps};

/// Weighted F1 / recall / precision of one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunScores {
    pub f1:        f64,
    pub recall:    f64,
    pub precision: f64,
}

impl RunScores {
    /// Columns in the order [f1, recall, precision]
    pub fn as_row(&self) -> [f64; 3] {
        [self.f1, self.recall, self.precision]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScores {
    pub label:     String,
    pub precision: f64,
    pub recall:    f64,
    pub f1:        f64,
    pub support:   usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub precision: f64,
    pub recall:    f64,
    pub f1:        f64,
    pub support:   usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub labels:       Vec<LabelScores>,
    pub accuracy:     f64,
    pub macro_avg:    Averages,
    pub weighted_avg: Averages,
}

impl ClassificationReport {
    pub fn run_scores(&self) -> RunScores {
        RunScores {
            f1:        self.weighted_avg.f1,
            recall:    self.weighted_avg.recall,
            precision: self.weighted_avg.precision,
        }
    }

    pub fn label(&self, label: &str) -> Option<&LabelScores> {
        self.labels.iter().find(|l| l.label == label)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Per-label and averaged scores over flat label lists.
///
/// `labels` fixes which labels are reported and averaged, in order.
/// When empty, the sorted union of true and predicted labels is used.
pub fn classification_report(
    y_true: &[String],
    y_pred: &[String],
    labels: &[String],
) -> Result<ClassificationReport> {
    if y_true.len() != y_pred.len() {
        return Err(PipelineError::invalid_input(format!(
            "{} true labels but {} predictions",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(PipelineError::empty_split("no test samples to score"));
    }

    let labels: Vec<String> = if labels.is_empty() {
        let mut all: Vec<String> = y_true.iter().chain(y_pred).cloned().collect();
        all.sort();
        all.dedup();
        all
    } else {
        labels.to_vec()
    };

    let mut tp: BTreeMap<&str, usize> = BTreeMap::new();
    let mut pred_count: BTreeMap<&str, usize> = BTreeMap::new();
    let mut true_count: BTreeMap<&str, usize> = BTreeMap::new();
    let mut correct = 0usize;

    for (t, p) in y_true.iter().zip(y_pred) {
        *true_count.entry(t.as_str()).or_insert(0) += 1;
        *pred_count.entry(p.as_str()).or_insert(0) += 1;
        if t == p {
            *tp.entry(t.as_str()).or_insert(0) += 1;
            correct += 1;
        }
    }

    let per_label: Vec<LabelScores> = labels
        .iter()
        .map(|label| {
            let l = label.as_str();
            let hits      = tp.get(l).copied().unwrap_or(0);
            let support   = true_count.get(l).copied().unwrap_or(0);
            let precision = ratio(hits, pred_count.get(l).copied().unwrap_or(0));
            let recall    = ratio(hits, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            LabelScores { label: label.clone(), precision, recall, f1, support }
        })
        .collect();

    let total_support: usize = per_label.iter().map(|l| l.support).sum();
    let n = per_label.len().max(1) as f64;

    let macro_avg = Averages {
        precision: per_label.iter().map(|l| l.precision).sum::<f64>() / n,
        recall:    per_label.iter().map(|l| l.recall).sum::<f64>() / n,
        f1:        per_label.iter().map(|l| l.f1).sum::<f64>() / n,
        support:   total_support,
    };

    let weighted = |f: fn(&LabelScores) -> f64| -> f64 {
        if total_support == 0 {
            0.0
        } else {
            per_label.iter().map(|l| f(l) * l.support as f64).sum::<f64>() / total_support as f64
        }
    };
    let weighted_avg = Averages {
        precision: weighted(|l| l.precision),
        recall:    weighted(|l| l.recall),
        f1:        weighted(|l| l.f1),
        support:   total_support,
    };

    Ok(ClassificationReport {
        labels: per_label,
        accuracy: correct as f64 / y_true.len() as f64,
        macro_avg,
        weighted_avg,
    })
}

/// Weighted F1 / recall / precision over nested (or scalar) targets.
pub fn flat_scores<T: LabelSteps>(y_true: &[T], y_pred: &[T], labels: &[String]) -> Result<RunScores> {
    let t = flatten_labels(y_true);
    let p = flatten_labels(y_pred);
    Ok(classification_report(&t, &p, labels)?.run_scores())
}

/// Inverse-frequency ("balanced") weight per class index `0..n_classes`.
///
/// Classes absent from `y` get weight 1.0.
pub fn class_weights(y: &[usize], n_classes: usize) -> Result<Vec<f64>> {
    if y.is_empty() {
        return Err(PipelineError::empty_split("cannot derive class weights from an empty training set"));
    }
    let mut counts = vec![0usize; n_classes];
    for &c in y {
        if c >= n_classes {
            return Err(PipelineError::invalid_input(format!("class index {c} out of range (n_classes = {n_classes})")));
        }
        counts[c] += 1;
    }
    let present = counts.iter().filter(|&&c| c > 0).count() as f64;
    Ok(counts
        .iter()
        .map(|&c| if c == 0 { 1.0 } else { y.len() as f64 / (present * c as f64) })
        .collect())
}

/// Mean and population standard deviation of each score column.
pub fn summarise(scores: &[RunScores]) -> Option<(RunScores, RunScores)> {
    if scores.is_empty() {
        return None;
    }
    let n = scores.len() as f64;
    let mean_of = |f: fn(&RunScores) -> f64| scores.iter().map(f).sum::<f64>() / n;
    let mean = RunScores {
        f1:        mean_of(|s| s.f1),
        recall:    mean_of(|s| s.recall),
        precision: mean_of(|s| s.precision),
    };
    let std_of = |f: fn(&RunScores) -> f64, m: f64| {
        (scores.iter().map(|s| (f(s) - m).powi(2)).sum::<f64>() / n).sqrt()
    };
    let std = RunScores {
        f1:        std_of(|s| s.f1, mean.f1),
        recall:    std_of(|s| s.recall, mean.recall),
        precision: std_of(|s| s.precision, mean.precision),
    };
    Some((mean, std))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_perfect_prediction() {
        let y = s(&["a", "b", "a"]);
        let r = classification_report(&y, &y, &[]).unwrap();
        assert_eq!(r.accuracy, 1.0);
        assert_eq!(r.weighted_avg.f1, 1.0);
    }

    #[test]
    fn test_weighted_scores_by_hand() {
        // true: a a a b ; pred: a a b b
        // a: p=2/2 r=2/3 f1=0.8      support 3
        // b: p=1/2 r=1/1 f1=2/3      support 1
        let r = classification_report(&s(&["a", "a", "a", "b"]), &s(&["a", "a", "b", "b"]), &[]).unwrap();
        let a = r.label("a").unwrap();
        assert!((a.precision - 1.0).abs() < 1e-12);
        assert!((a.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((a.f1 - 0.8).abs() < 1e-12);

        let expected_f1 = (0.8 * 3.0 + (2.0 / 3.0) * 1.0) / 4.0;
        assert!((r.weighted_avg.f1 - expected_f1).abs() < 1e-12);
        let expected_p = (1.0 * 3.0 + 0.5 * 1.0) / 4.0;
        assert!((r.weighted_avg.precision - expected_p).abs() < 1e-12);
        assert!((r.weighted_avg.recall - 0.75).abs() < 1e-12);
        assert!((r.accuracy - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_label_never_predicted_scores_zero() {
        let r = classification_report(&s(&["a", "b"]), &s(&["a", "a"]), &s(&["a", "b"])).unwrap();
        let b = r.label("b").unwrap();
        assert_eq!(b.precision, 0.0);
        assert_eq!(b.f1, 0.0);
    }

    #[test]
    fn test_empty_ground_truth_is_empty_split() {
        let err = classification_report(&[], &[], &[]).unwrap_err();
        assert_eq!(err.kind(), "EmptySplitError");
    }

    #[test]
    fn test_flat_scores_on_sequences() {
        let t = vec![s(&["a", "b"]), s(&["b"])];
        let p = vec![s(&["a", "b"]), s(&["a"])];
        let scores = flat_scores(&t, &p, &s(&["a", "b"])).unwrap();
        assert!(scores.f1 > 0.0 && scores.f1 < 1.0);
    }

    #[test]
    fn test_class_weights_imbalanced() {
        let w = class_weights(&[0, 0, 0, 1], 2).unwrap();
        assert!(w[1] > w[0]);
        assert!((w[0] - 4.0 / 6.0).abs() < 1e-12);
        assert!((w[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_class_weights_missing_class() {
        let w = class_weights(&[1, 1], 2).unwrap();
        assert_eq!(w, vec![1.0, 1.0]);
        assert!(class_weights(&[], 2).is_err());
        assert!(class_weights(&[3], 2).is_err());
    }

    #[test]
    fn test_summarise() {
        let runs = [
            RunScores { f1: 0.5, recall: 0.4, precision: 0.6 },
            RunScores { f1: 0.7, recall: 0.6, precision: 0.8 },
        ];
        let (mean, std) = summarise(&runs).unwrap();
        assert!((mean.f1 - 0.6).abs() < 1e-12);
        assert!((std.f1 - 0.1).abs() < 1e-12);
        assert!(summarise(&[]).is_none());
    }
}
