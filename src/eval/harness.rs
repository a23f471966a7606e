// ============================================================
// Layer 5 — Repeated Validation Harness
// ============================================================
// Estimates how much a model's score moves with the choice of
// held-out documents:
//
//   for run in 0..num_runs:
//     split documents  (fresh, unseeded unless a seed is given)
//     assemble train / test through the DocumentView
//     fresh estimator  → fit(train) → predict(test)
//     weighted F1 / recall / precision on the flattened labels
//
// Output: a (num_runs × 3) score matrix, columns [f1, recall,
// precision]. Mean and std are computed by `summarise`.
//
// Each run builds its own estimator through the factory closure,
// so no model is shared between runs. With RetainArtifacts::Yes
// the test ids and flattened prediction records of every run are
// kept for error analysis.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::assembler::{assemble, DocumentView};
use crate::data::splitter::split_documents;
use crate::domain::document::{DocId, DocumentMap};
use crate::domain::error::PipelineError;
use crate::domain::traits::Estimator;
use crate::eval::flatten::{flatten_predictions, PredictionRecord};
use crate::infra::metrics::RunLogger;
use crate::ml::metrics::{flat_scores, summarise, RunScores};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetainArtifacts {
    #[default]
    No,
    Yes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub test_fraction: f64,
    pub num_runs:      usize,
    /// Run `r` splits with `seed + r`; None gives independent random splits
    pub seed:          Option<u64>,
    pub retain:        RetainArtifacts,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { test_fraction: 0.3, num_runs: 10, seed: None, retain: RetainArtifacts::No }
    }
}

/// What one run leaves behind when artifacts are retained.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub run:      usize,
    pub test_ids: BTreeSet<DocId>,
    pub records:  Vec<PredictionRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub scores:    Vec<RunScores>,
    /// Empty unless RetainArtifacts::Yes
    pub artifacts: Vec<RunArtifacts>,
}

impl ValidationOutcome {
    /// One row per run: [f1, recall, precision]
    pub fn score_matrix(&self) -> Vec<[f64; 3]> {
        self.scores.iter().map(RunScores::as_row).collect()
    }

    /// Column means and population standard deviations.
    pub fn summary(&self) -> Option<(RunScores, RunScores)> {
        summarise(&self.scores)
    }
}

/// Run `cfg.num_runs` independent split / fit / score trials.
pub fn validate<E, V, F>(
    map:     &DocumentMap,
    view:    &V,
    cfg:     &ValidationConfig,
    mut new_estimator: F,
    logger:  Option<&RunLogger>,
) -> Result<ValidationOutcome>
where
    E: Estimator,
    V: DocumentView<Sample = E::Sample, Target = E::Target>,
    F: FnMut() -> crate::domain::error::Result<E>,
{
    let doc_ids = map.ids();
    let mut outcome = ValidationOutcome::default();

    for run in 0..cfg.num_runs {
        let seed = cfg.seed.map(|s| s.wrapping_add(run as u64));
        let split = split_documents(&doc_ids, cfg.test_fraction, seed)
            .with_context(|| format!("Run {run}: cannot split {} documents", doc_ids.len()))?;
        split
            .ensure_non_empty()
            .with_context(|| format!("Run {run}: test_fraction={} leaves a side empty", cfg.test_fraction))?;

        let train = assemble(map, &split.train, view)
            .with_context(|| format!("Run {run}: cannot assemble training documents"))?;
        let test = assemble(map, &split.test, view)
            .with_context(|| format!("Run {run}: cannot assemble test documents {:?}", split.test))?;
        if test.is_empty() {
            return Err(PipelineError::empty_split(format!("run {run}: test documents have no samples")).into());
        }

        let mut estimator = new_estimator().with_context(|| format!("Run {run}: cannot build estimator"))?;
        estimator
            .fit(&train.x, &train.y)
            .with_context(|| format!("Run {run}: {} failed to fit", estimator.name()))?;
        let y_pred = estimator.predict(&test.x).with_context(|| format!("Run {run}: prediction failed"))?;

        let labels = estimator.classes().map(<[String]>::to_vec).unwrap_or_default();
        let scores = flat_scores(&test.y, &y_pred, &labels).with_context(|| format!("Run {run}: scoring failed"))?;

        info!(
            run,
            train_docs = split.train.len(),
            test_docs = split.test.len(),
            f1 = scores.f1,
            recall = scores.recall,
            precision = scores.precision,
            "Validation run finished"
        );
        if let Some(logger) = logger {
            logger.log(estimator.name(), run, &scores)?;
        }

        if cfg.retain == RetainArtifacts::Yes {
            let y_proba = estimator
                .predict_proba(&test.x)
                .with_context(|| format!("Run {run}: probability prediction failed"))?;
            let flat = flatten_predictions(&y_pred, &y_proba, &test.y, &test.groups)
                .with_context(|| format!("Run {run}: cannot flatten predictions"))?;
            outcome.artifacts.push(RunArtifacts { run, test_ids: split.test, records: flat.all });
        }
        outcome.scores.push(scores);
    }

    Ok(outcome)
}
