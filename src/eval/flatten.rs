// ============================================================
// Layer 5 — Prediction Flattening
// ============================================================
// Nested predictions (sequence → position) become one flat
// record per sentence:
//
//   y_pred[s][i], y_pred_proba[s][i], y_true[s][i], groups[s]
//        │
//        ▼
//   PredictionRecord { seq_idx: s, idx_in_seq: i, doc_idx, … }
//
// Records keep (seq_idx, idx_in_seq) order so they can be joined
// back onto X_test. Confidence = the largest probability of the
// position. Errors and correct rows are returned separately,
// each sorted by confidence, highest first.
//
// Pure transformation: nothing here trains or mutates inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::document::DocId;
use crate::domain::error::{PipelineError, Result};
use crate::domain::traits::{LabelSteps, ProbaSteps};

/// One flattened prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub seq_idx:    usize,
    pub idx_in_seq: usize,
    pub doc_idx:    DocId,
    pub seq_len:    usize,
    pub label:      String,
    pub pred:       String,
    /// Highest predicted probability at this position
    pub pred_proba: f64,
    pub correct:    bool,
    /// Columns appended for qualitative review
    #[serde(default)]
    pub features:   BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenedPredictions {
    /// (seq_idx, idx_in_seq) order
    pub all:      Vec<PredictionRecord>,
    /// pred ≠ label, confidence descending
    pub errors:   Vec<PredictionRecord>,
    /// pred = label, confidence descending
    pub corrects: Vec<PredictionRecord>,
}

fn by_confidence(records: &mut [PredictionRecord]) {
    // stable: equal confidences keep flattening order
    records.sort_by(|a, b| b.pred_proba.total_cmp(&a.pred_proba));
}

impl FlattenedPredictions {
    /// Split `all` into errors and corrects again, e.g. after columns were attached.
    pub fn from_records(all: Vec<PredictionRecord>) -> Self {
        let (mut corrects, mut errors): (Vec<_>, Vec<_>) = all.iter().cloned().partition(|r| r.correct);
        by_confidence(&mut errors);
        by_confidence(&mut corrects);
        Self { all, errors, corrects }
    }
}

pub fn flatten_predictions<T: LabelSteps, P: ProbaSteps>(
    y_pred:       &[T],
    y_pred_proba: &[P],
    y_true:       &[T],
    groups:       &[DocId],
) -> Result<FlattenedPredictions> {
    let n = y_true.len();
    if y_pred.len() != n || y_pred_proba.len() != n || groups.len() != n {
        return Err(PipelineError::invalid_input(format!(
            "flatten needs parallel inputs: {} predictions, {} probabilities, {} targets, {} groups",
            y_pred.len(),
            y_pred_proba.len(),
            n,
            groups.len()
        )));
    }

    let mut all = Vec::new();
    for (seq_idx, (((pred, proba), truth), &doc_idx)) in
        y_pred.iter().zip(y_pred_proba).zip(y_true).zip(groups).enumerate()
    {
        let (pred, proba, truth) = (pred.label_steps(), proba.proba_steps(), truth.label_steps());
        if pred.len() != truth.len() || proba.len() != truth.len() {
            return Err(PipelineError::invalid_input(format!(
                "sequence {seq_idx} of document {doc_idx}: {} predictions, {} probabilities, {} targets",
                pred.len(),
                proba.len(),
                truth.len()
            )));
        }

        let seq_len = truth.len();
        for (idx_in_seq, ((p, probs), t)) in pred.iter().zip(proba).zip(truth).enumerate() {
            let pred_proba = probs.values().copied().fold(0.0, f64::max);
            all.push(PredictionRecord {
                seq_idx,
                idx_in_seq,
                doc_idx,
                seq_len,
                label: t.clone(),
                pred: p.clone(),
                pred_proba,
                correct: p == t,
                features: BTreeMap::new(),
            });
        }
    }

    Ok(FlattenedPredictions::from_records(all))
}

/// Rebuild the nested structure from records in any order.
///
/// Sequences that contributed no records come back empty.
pub fn regroup(records: &[PredictionRecord]) -> Result<Vec<Vec<PredictionRecord>>> {
    let n_seqs = records.iter().map(|r| r.seq_idx + 1).max().unwrap_or(0);
    let mut slots: Vec<BTreeMap<usize, &PredictionRecord>> = vec![BTreeMap::new(); n_seqs];
    for r in records {
        if slots[r.seq_idx].insert(r.idx_in_seq, r).is_some() {
            return Err(PipelineError::invalid_input(format!(
                "duplicate record for sequence {} position {}",
                r.seq_idx, r.idx_in_seq
            )));
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(seq_idx, positions)| {
            if positions.keys().copied().ne(0..positions.len()) {
                return Err(PipelineError::invalid_input(format!(
                    "sequence {seq_idx} has gaps in its positions"
                )));
            }
            Ok(positions.into_values().cloned().collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::LabelProbabilities;
    use proptest::prelude::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn proba(p_not: f64, p_nar: f64) -> LabelProbabilities {
        [("not_nar".to_string(), p_not), ("is_nar".to_string(), p_nar)].into_iter().collect()
    }

    #[test]
    fn test_scenario_c_indices() {
        let y_pred = vec![s(&["a", "a", "b"]), s(&["b", "a"])];
        let y_true = vec![s(&["a", "b", "b"]), s(&["b", "b"])];
        let y_proba = vec![
            vec![proba(0.6, 0.4), proba(0.7, 0.3), proba(0.1, 0.9)],
            vec![proba(0.2, 0.8), proba(0.55, 0.45)],
        ];
        let flat = flatten_predictions(&y_pred, &y_proba, &y_true, &[4, 9]).unwrap();

        assert_eq!(flat.all.len(), 5);
        assert_eq!(flat.all.iter().map(|r| r.seq_idx).collect::<Vec<_>>(), vec![0, 0, 0, 1, 1]);
        assert_eq!(flat.all.iter().map(|r| r.idx_in_seq).collect::<Vec<_>>(), vec![0, 1, 2, 0, 1]);
        assert_eq!(flat.all.iter().map(|r| r.doc_idx).collect::<Vec<_>>(), vec![4, 4, 4, 9, 9]);
        assert_eq!(flat.all.iter().map(|r| r.seq_len).collect::<Vec<_>>(), vec![3, 3, 3, 2, 2]);
    }

    #[test]
    fn test_scenario_d_confidence() {
        let y_pred = vec!["is_nar".to_string(), "not_nar".to_string()];
        let y_true = y_pred.clone();
        let y_proba = vec![proba(0.2, 0.8), proba(0.9, 0.1)];
        let flat = flatten_predictions(&y_pred, &y_proba, &y_true, &[0, 0]).unwrap();
        assert_eq!(flat.all.iter().map(|r| r.pred_proba).collect::<Vec<_>>(), vec![0.8, 0.9]);
    }

    #[test]
    fn test_errors_sorted_by_confidence_desc() {
        let y_pred = vec![s(&["x", "x", "x", "y"])];
        let y_true = vec![s(&["y", "y", "x", "y"])];
        let y_proba = vec![vec![proba(0.6, 0.4), proba(0.05, 0.95), proba(0.5, 0.5), proba(0.3, 0.7)]];
        let flat = flatten_predictions(&y_pred, &y_proba, &y_true, &[1]).unwrap();

        assert_eq!(flat.errors.iter().map(|r| r.idx_in_seq).collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(flat.corrects.iter().map(|r| r.idx_in_seq).collect::<Vec<_>>(), vec![3, 2]);
        assert!(flat.errors.iter().all(|r| !r.correct));
        assert!(flat.corrects.iter().all(|r| r.correct));
    }

    #[test]
    fn test_length_mismatch_is_invalid_input() {
        let err = flatten_predictions(&[s(&["a"])], &[vec![proba(0.5, 0.5)]], &[s(&["a", "b"])], &[0])
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
        assert!(err.to_string().contains("sequence 0"));

        let err = flatten_predictions(&[s(&["a"])], &[vec![proba(0.5, 0.5)]], &[s(&["a"])], &[]).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
    }

    #[test]
    fn test_regroup_rejects_duplicates() {
        let y = vec![s(&["a"])];
        let flat = flatten_predictions(&y, &[vec![proba(1.0, 0.0)]], &y, &[0]).unwrap();
        let doubled: Vec<_> = flat.all.iter().chain(&flat.all).cloned().collect();
        assert!(regroup(&doubled).is_err());
    }

    proptest! {
        #[test]
        fn prop_flatten_then_regroup_round_trips(
            lens in proptest::collection::vec(1usize..5, 1..6),
            seed in 0usize..2,
        ) {
            let labels = ["not_nar", "is_nar"];
            let y_true: Vec<Vec<String>> = lens.iter().enumerate()
                .map(|(s, &n)| (0..n).map(|i| labels[(s + i + seed) % 2].to_string()).collect())
                .collect();
            let y_pred: Vec<Vec<String>> = lens.iter().enumerate()
                .map(|(s, &n)| (0..n).map(|i| labels[(s * i + seed) % 2].to_string()).collect())
                .collect();
            let y_proba: Vec<Vec<LabelProbabilities>> = lens.iter()
                .map(|&n| (0..n).map(|i| proba(0.1 * i as f64, 1.0 - 0.1 * i as f64)).collect())
                .collect();
            let groups: Vec<DocId> = (0..lens.len() as DocId).collect();

            let flat = flatten_predictions(&y_pred, &y_proba, &y_true, &groups).unwrap();
            prop_assert_eq!(flat.all.len(), lens.iter().sum::<usize>());
            prop_assert_eq!(flat.errors.len() + flat.corrects.len(), flat.all.len());

            // regroup from the shuffled error/correct lists, not from `all`
            let mixed: Vec<_> = flat.errors.iter().chain(&flat.corrects).cloned().collect();
            let nested = regroup(&mixed).unwrap();
            let preds: Vec<Vec<String>> = nested.iter().map(|s| s.iter().map(|r| r.pred.clone()).collect()).collect();
            let truth: Vec<Vec<String>> = nested.iter().map(|s| s.iter().map(|r| r.label.clone()).collect()).collect();
            prop_assert_eq!(preds, y_pred);
            prop_assert_eq!(truth, y_true);
        }
    }
}
