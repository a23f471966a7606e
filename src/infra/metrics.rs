// ============================================================
// Layer 6 — Metrics Loggers
// ============================================================
// Two append-only CSV logs:
//
//   epoch_metrics.csv   one row per transformer epoch
//     epoch,train_loss,val_loss,val_accuracy
//     1,0.693100,0.688200,0.540000
//
//   validation_runs.csv one row per repeated-validation run
//     timestamp,estimator,run,f1,recall,precision
//
// Files are created with a header on first use and appended to
// afterwards, so several invocations accumulate in one log.
//
// Reading the epoch log:
//   - val_loss rising while train_loss falls → overfitting
//   - the best checkpoint is the epoch with the lowest val_loss

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::ml::metrics::RunScores;

/// One row of metrics for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Mean class-weighted NLL over the training batches
    pub train_loss: f64,

    /// Mean class-weighted NLL on the validation split
    pub val_loss: f64,

    /// Fraction of validation sentences classified correctly
    pub val_accuracy: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, val_loss: f64, val_accuracy: f64) -> Self {
        Self { epoch, train_loss, val_loss, val_accuracy }
    }

    /// True if this epoch improved over the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

/// Create `path` with `header` unless it already exists.
fn ensure_csv(path: &Path, header: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create '{}'", parent.display()))?;
    }
    if !path.exists() {
        let mut f = fs::File::create(path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        writeln!(f, "{header}")?;
        tracing::debug!("Created metrics CSV: '{}'", path.display());
    }
    Ok(())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot append to '{}'", path.display()))?;
    writeln!(f, "{line}")?;
    Ok(())
}

/// Logs epoch metrics to `{dir}/epoch_metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = dir.into().join("epoch_metrics.csv");
        ensure_csv(&csv_path, "epoch,train_loss,val_loss,val_accuracy")?;
        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        append_line(
            &self.csv_path,
            &format!("{},{:.6},{:.6},{:.6}", m.epoch, m.train_loss, m.val_loss, m.val_accuracy),
        )?;
        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

/// Logs one row per validation run to `{dir}/validation_runs.csv`.
pub struct RunLogger {
    csv_path: PathBuf,
}

impl RunLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = dir.into().join("validation_runs.csv");
        ensure_csv(&csv_path, "timestamp,estimator,run,f1,recall,precision")?;
        Ok(Self { csv_path })
    }

    pub fn log(&self, estimator: &str, run: usize, scores: &RunScores) -> Result<()> {
        append_line(
            &self.csv_path,
            &format!(
                "{},{},{},{:.6},{:.6},{:.6}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                estimator,
                run,
                scores.f1,
                scores.recall,
                scores.precision,
            ),
        )
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_improvement() {
        let m = EpochMetrics::new(2, 2.5, 2.3, 0.6);
        assert!(m.is_improvement(3.0));
        assert!(!m.is_improvement(2.0));
        assert!(m.is_improvement(f64::INFINITY));
    }

    #[test]
    fn test_epoch_log_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&EpochMetrics::new(1, 0.7, 0.69, 0.5)).unwrap();
        logger.log(&EpochMetrics::new(2, 0.6, 0.65, 0.55)).unwrap();

        // A second logger on the same dir keeps the existing rows
        let again = MetricsLogger::new(dir.path()).unwrap();
        again.log(&EpochMetrics::new(3, 0.5, 0.6, 0.6)).unwrap();

        let text = std::fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "epoch,train_loss,val_loss,val_accuracy");
        assert_eq!(lines[1], "1,0.700000,0.690000,0.500000");
    }

    #[test]
    fn test_run_logger_row() {
        let dir = tempfile::tempdir().unwrap();
        let logger = RunLogger::new(dir.path()).unwrap();
        logger
            .log("CrfEstimator", 0, &RunScores { f1: 0.5, recall: 0.25, precision: 0.75 })
            .unwrap();
        let text = std::fs::read_to_string(logger.csv_path()).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.ends_with(",CrfEstimator,0,0.500000,0.250000,0.750000"));
    }
}
