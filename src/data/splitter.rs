// ============================================================
// Layer 4 — Document-Grouped Splitter
// ============================================================
// Splits a corpus into train / test by DOCUMENT, never by sample.
//
// Why by document?
//   Sentence windows from the same transcript share speakers,
//   topics and phrasing. If windows of one document landed on
//   both sides, the test score would measure memorisation.
//
// Sizes:
//   test_count = floor(test_fraction * doc_count)
//   train      = everything else
//
// A test_count of 0 is allowed here; code that needs a non-empty
// side calls `ensure_non_empty()` and gets an EmptySplit error.
//
// Sampling is uniform without replacement via
// rand::seq::SliceRandom::choose_multiple. Passing a seed makes
// the split reproducible; `None` draws fresh entropy per call.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::domain::document::DocId;
use crate::domain::error::{PipelineError, Result};

/// Train / test partition of document ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSplit {
    pub train: BTreeSet<DocId>,
    pub test: BTreeSet<DocId>,
}

impl DocumentSplit {
    /// Fail with EmptySplit if either side has no documents.
    pub fn ensure_non_empty(&self) -> Result<()> {
        if self.train.is_empty() {
            return Err(PipelineError::empty_split("no training documents"));
        }
        if self.test.is_empty() {
            return Err(PipelineError::empty_split("no test documents"));
        }
        Ok(())
    }
}

/// Train / validation / test partition of document ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreeWaySplit {
    pub train: BTreeSet<DocId>,
    pub val: BTreeSet<DocId>,
    pub test: BTreeSet<DocId>,
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Draw `floor(test_fraction * n)` documents for test, the rest for train.
///
/// # Errors
/// InvalidInput if `doc_ids` is empty or `test_fraction` is not in (0, 1).
pub fn split_documents(
    doc_ids: &BTreeSet<DocId>,
    test_fraction: f64,
    seed: Option<u64>,
) -> Result<DocumentSplit> {
    if doc_ids.is_empty() {
        return Err(PipelineError::invalid_input("cannot split an empty document set"));
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::invalid_input(format!(
            "test_fraction must be in (0, 1), got {test_fraction}"
        )));
    }

    let test_count = (test_fraction * doc_ids.len() as f64).floor() as usize;

    // BTreeSet iteration is sorted, so a fixed seed always sees the same input order
    let ids: Vec<DocId> = doc_ids.iter().copied().collect();
    let mut rng = make_rng(seed);
    let test: BTreeSet<DocId> = ids.choose_multiple(&mut rng, test_count).copied().collect();
    let train: BTreeSet<DocId> = doc_ids.difference(&test).copied().collect();

    tracing::debug!(
        "Document split: {} train, {} test (test_fraction={})",
        train.len(),
        test.len(),
        test_fraction
    );

    Ok(DocumentSplit { train, test })
}

/// Two-stage split: (train, temp) with `test_fraction`, then temp into
/// (val, test) with `val_test_fraction`. The stages use independent random
/// state; with a seed the second stage is seeded with `seed + 1`.
pub fn split_train_val_test(
    doc_ids: &BTreeSet<DocId>,
    test_fraction: f64,
    val_test_fraction: f64,
    seed: Option<u64>,
) -> Result<ThreeWaySplit> {
    let first = split_documents(doc_ids, test_fraction, seed)?;

    if first.test.is_empty() {
        return Ok(ThreeWaySplit {
            train: first.train,
            val: BTreeSet::new(),
            test: BTreeSet::new(),
        });
    }

    let second = split_documents(&first.test, val_test_fraction, seed.map(|s| s.wrapping_add(1)))?;

    // second.train holds what was not drawn → validation; second.test → test
    Ok(ThreeWaySplit {
        train: first.train,
        val: second.train,
        test: second.test,
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(range: std::ops::RangeInclusive<u32>) -> BTreeSet<DocId> {
        range.collect()
    }

    #[test]
    fn test_ten_docs_thirty_percent() {
        let all = ids(1..=10);
        let split = split_documents(&all, 0.3, None).unwrap();
        assert_eq!(split.test.len(), 3);
        assert_eq!(split.train.len(), 7);
        assert!(split.train.is_disjoint(&split.test));
        let union: BTreeSet<_> = split.train.union(&split.test).copied().collect();
        assert_eq!(union, all);
    }

    #[test]
    fn test_seeded_split_is_deterministic() {
        let all = ids(1..=20);
        let a = split_documents(&all, 0.25, Some(7)).unwrap();
        let b = split_documents(&all, 0.25, Some(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_test_count_does_not_raise() {
        let all = ids(1..=3);
        let split = split_documents(&all, 0.2, Some(1)).unwrap();
        assert!(split.test.is_empty());
        assert_eq!(split.train, all);

        let err = split.ensure_non_empty().unwrap_err();
        assert_eq!(err.kind(), "EmptySplitError");
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(split_documents(&BTreeSet::new(), 0.3, None).is_err());
        assert!(split_documents(&ids(1..=5), 0.0, None).is_err());
        assert!(split_documents(&ids(1..=5), 1.0, None).is_err());
        assert!(split_documents(&ids(1..=5), f64::NAN, None).is_err());
    }

    #[test]
    fn test_three_way_split_partitions_everything() {
        let all = ids(1..=20);
        let split = split_train_val_test(&all, 0.3, 0.5, Some(2018)).unwrap();
        assert_eq!(split.train.len(), 14);
        assert_eq!(split.val.len() + split.test.len(), 6);
        assert_eq!(split.test.len(), 3);
        assert!(split.train.is_disjoint(&split.val));
        assert!(split.train.is_disjoint(&split.test));
        assert!(split.val.is_disjoint(&split.test));
    }

    #[test]
    fn test_three_way_with_empty_temp() {
        let split = split_train_val_test(&ids(1..=2), 0.3, 0.5, None).unwrap();
        assert_eq!(split.train.len(), 2);
        assert!(split.val.is_empty() && split.test.is_empty());
    }

    proptest! {
        #[test]
        fn split_is_a_partition(n in 1u32..60, fraction in 0.01f64..0.99, seed in any::<u64>()) {
            let all: BTreeSet<DocId> = (0..n).collect();
            let split = split_documents(&all, fraction, Some(seed)).unwrap();

            prop_assert!(split.train.is_disjoint(&split.test));
            let union: BTreeSet<_> = split.train.union(&split.test).copied().collect();
            prop_assert_eq!(&union, &all);
            prop_assert_eq!(split.test.len(), (fraction * n as f64).floor() as usize);
        }
    }
}
