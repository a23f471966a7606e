// ============================================================
// Layer 6 — Report Writer
// ============================================================
// Exports evaluation results for offline review:
//
//   predictions.csv   every flattened record
//   errors.csv        wrong predictions, most confident first
//   corrects.csv      right predictions, most confident first
//   scores.csv        one row per validation run (f1,recall,precision)
//   report.json       classification report of one evaluation
//
// Record tables have the fixed prediction columns followed by
// the union of all feature columns, sorted by name. A record
// without a value for a column gets an empty cell.

use anyhow::{Context, Result};
use std::{
    collections::BTreeSet,
    fs,
    path::PathBuf,
};

use crate::eval::flatten::PredictionRecord;
use crate::ml::metrics::{ClassificationReport, RunScores};

const RECORD_COLUMNS: [&str; 8] =
    ["seq_idx", "idx_in_seq", "doc_idx", "seq_len", "label", "pred", "pred_proba", "correct"];

/// Writes CSV and JSON reports into one output directory.
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create report directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn write_records(&self, file_name: &str, records: &[PredictionRecord]) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let feature_columns: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.features.keys().map(String::as_str))
            .filter(|name| !RECORD_COLUMNS.contains(name))
            .collect();

        let mut wtr = csv::Writer::from_path(&path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        wtr.write_record(RECORD_COLUMNS.iter().copied().chain(feature_columns.iter().copied()))?;

        for r in records {
            let fixed = [
                r.seq_idx.to_string(),
                r.idx_in_seq.to_string(),
                r.doc_idx.to_string(),
                r.seq_len.to_string(),
                r.label.clone(),
                r.pred.clone(),
                r.pred_proba.to_string(),
                r.correct.to_string(),
            ];
            let features = feature_columns
                .iter()
                .map(|name| r.features.get(*name).cloned().unwrap_or_default());
            wtr.write_record(fixed.into_iter().chain(features))?;
        }
        wtr.flush()?;

        tracing::info!("Wrote {} records to '{}'", records.len(), path.display());
        Ok(path)
    }

    pub fn write_scores(&self, file_name: &str, scores: &[RunScores]) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let mut wtr = csv::Writer::from_path(&path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        wtr.write_record(["run", "f1", "recall", "precision"])?;
        for (run, s) in scores.iter().enumerate() {
            wtr.write_record([run.to_string(), s.f1.to_string(), s.recall.to_string(), s.precision.to_string()])?;
        }
        wtr.flush()?;
        tracing::info!("Wrote {} run scores to '{}'", scores.len(), path.display());
        Ok(path)
    }

    pub fn write_report(&self, file_name: &str, report: &ClassificationReport) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write report to '{}'", path.display()))?;
        Ok(path)
    }
}
