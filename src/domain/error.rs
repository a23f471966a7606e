// ============================================================
// Layer 3 — Pipeline Error Taxonomy
// ============================================================
// Every failure the core can produce falls into one of a few
// kinds. Callers match on the kind; the message carries the
// document / sequence context that triggered it.
//
//   InvalidInput    → malformed features, length mismatches
//   NotFitted       → prediction requested before training
//   AmbiguousMatch  → feature re-alignment found 0 or >1 rows
//   EmptySplit      → a split left the train or test side empty
//
// The application and CLI layers wrap these in anyhow errors
// with extra context; the core itself never retries.

use thiserror::Error;

use crate::domain::document::DocId;

/// Result alias used by the core layers.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{estimator} is not fitted yet; call fit() before {operation}()")]
    NotFitted {
        estimator: &'static str,
        operation: &'static str,
    },

    #[error(
        "document {doc_idx}: {matches} sentences match \
         (par_idx_in_doc={par_idx}, sent_idx_in_par={sent_idx}) for seq {seq_idx}/{idx_in_seq}"
    )]
    AmbiguousMatch {
        doc_idx: DocId,
        seq_idx: usize,
        idx_in_seq: usize,
        par_idx: i64,
        sent_idx: i64,
        matches: usize,
    },

    #[error("empty split: {0}")]
    EmptySplit(String),

    #[error("tensor error: {0}")]
    Tensor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PipelineError::InvalidInput(msg.into())
    }

    pub fn empty_split(msg: impl Into<String>) -> Self {
        PipelineError::EmptySplit(msg.into())
    }

    pub fn not_fitted(estimator: &'static str, operation: &'static str) -> Self {
        PipelineError::NotFitted { estimator, operation }
    }

    /// Short machine-readable name of the error kind, used in run logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_)      => "InvalidInputError",
            PipelineError::NotFitted { .. }     => "NotFittedError",
            PipelineError::AmbiguousMatch { .. } => "AmbiguousMatchError",
            PipelineError::EmptySplit(_)        => "EmptySplitError",
            PipelineError::Tensor(_)            => "TensorError",
            PipelineError::Io(_)                => "IoError",
            PipelineError::Json(_)              => "JsonError",
            PipelineError::Csv(_)               => "CsvError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(PipelineError::invalid_input("x").kind(), "InvalidInputError");
        assert_eq!(PipelineError::not_fitted("CrfEstimator", "predict").kind(), "NotFittedError");
        assert_eq!(PipelineError::empty_split("no test docs").kind(), "EmptySplitError");
    }

    #[test]
    fn test_not_fitted_message_names_operation() {
        let err = PipelineError::not_fitted("TransformerEstimator", "predict_proba");
        let msg = err.to_string();
        assert!(msg.contains("TransformerEstimator"));
        assert!(msg.contains("predict_proba()"));
    }
}
