// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// One CRF split, kept in full for error analysis:
//
//   Step 1: Load map + build windows           (Layer 4 - data)
//   Step 2: Split documents, assemble X / y    (Layer 4 - data)
//   Step 3: Fit the CRF, predict labels and
//           marginals on the test side         (Layer 5 - ml)
//   Step 4: Flatten predictions                (Layer 5 - eval)
//   Step 5: Attach sample features and, when
//           sentence tables are given, the
//           matching sentence rows             (Layer 5 - eval)
//   Step 6: Export tables + report             (Layer 6 - infra)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::application::validate_use_case::{load_crf_corpus, new_crf, resolve_params};
use crate::data::assembler::{assemble, SequenceView};
use crate::data::sentence_table::load_tables;
use crate::data::splitter::split_documents;
use crate::domain::document::{DocId, SeqConfig};
use crate::domain::params::ParamSet;
use crate::domain::traits::{flatten_labels, Estimator};
use crate::eval::alignment::{attach_sample_features, retrieve_sentence_info};
use crate::eval::flatten::{flatten_predictions, FlattenedPredictions};
use crate::infra::report::ReportWriter;
use crate::ml::metrics::{classification_report, ClassificationReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateConfig {
    pub docs_map:      PathBuf,
    /// Directory of `{doc:02}_sent_db.csv` tables; None skips sentence lookup
    pub sent_db_dir:   Option<PathBuf>,
    pub output_dir:    PathBuf,
    pub seq:           SeqConfig,
    pub test_fraction: f64,
    pub seed:          Option<u64>,
    pub params:        ParamSet,
    pub params_file:   Option<PathBuf>,
}

impl Default for EvaluateConfig {
    fn default() -> Self {
        Self {
            docs_map:      PathBuf::from("data/docs_map.json"),
            sent_db_dir:   None,
            output_dir:    PathBuf::from("results"),
            seq:           SeqConfig::default(),
            test_fraction: 0.3,
            seed:          None,
            params:        ParamSet::new(),
            params_file:   None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluateOutcome {
    pub test_ids:    BTreeSet<DocId>,
    pub report:      ClassificationReport,
    pub predictions: FlattenedPredictions,
    /// Records that matched zero or several sentence rows
    pub unaligned:   usize,
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvaluateOutcome> {
        let cfg = &self.config;
        let params = resolve_params(&cfg.params, cfg.params_file.as_deref())?;

        // ── Step 1 + 2: Data ─────────────────────────────────────────────────
        let map = load_crf_corpus(&cfg.docs_map, cfg.seq)?;
        let split = split_documents(&map.ids(), cfg.test_fraction, cfg.seed)?;
        split.ensure_non_empty()?;
        let view = SequenceView::new(cfg.seq);
        let train = assemble(&map, &split.train, &view).context("Cannot assemble training documents")?;
        let test = assemble(&map, &split.test, &view).context("Cannot assemble test documents")?;
        tracing::info!(
            "Evaluating on documents {:?} ({} sequences, trained on {})",
            split.test,
            test.len(),
            train.len()
        );

        // ── Step 3: Fit + predict ────────────────────────────────────────────
        let mut crf = new_crf(&params)?;
        crf.fit(&train.x, &train.y)?;
        let y_pred = crf.predict(&test.x)?;
        let y_proba = crf.predict_proba(&test.x)?;

        // ── Step 4: Flatten ──────────────────────────────────────────────────
        let flat = flatten_predictions(&y_pred, &y_proba, &test.y, &test.groups)?;
        let mut records = flat.all;

        // ── Step 5: Features and sentence rows ───────────────────────────────
        attach_sample_features(&mut records, &test.x)?;
        let unaligned = match &cfg.sent_db_dir {
            Some(dir) => {
                let tables = load_tables(dir, &split.test)
                    .with_context(|| format!("Cannot read sentence tables from '{}'", dir.display()))?;
                retrieve_sentence_info(&mut records, &test.x, &tables).len()
            }
            None => 0,
        };
        let predictions = FlattenedPredictions::from_records(records);

        let labels = crf.classes().map(<[String]>::to_vec).unwrap_or_default();
        let report = classification_report(&flatten_labels(&test.y), &flatten_labels(&y_pred), &labels)?;

        // ── Step 6: Export ───────────────────────────────────────────────────
        let writer = ReportWriter::new(&cfg.output_dir)?;
        writer.write_records("predictions.csv", &predictions.all)?;
        writer.write_records("errors.csv", &predictions.errors)?;
        writer.write_records("corrects.csv", &predictions.corrects)?;
        writer.write_report("report.json", &report)?;

        Ok(EvaluateOutcome { test_ids: split.test, report, predictions, unaligned })
    }
}
