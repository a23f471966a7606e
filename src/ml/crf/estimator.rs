use tracing::debug;

use crate::domain::error::{PipelineError, Result};
use crate::domain::features::SentenceFeatures;
use crate::domain::params::{parse_value, unknown_param, ParamSet};
use crate::domain::traits::{Estimator, LabelProbabilities};
use crate::ml::crf::model::CrfModel;
use crate::ml::crf::trainer::{train, CrfConfig};
use crate::ml::metrics::flat_scores;

const NAME: &str = "CrfEstimator";

/// Linear-chain CRF over windows of sentence feature records.
#[derive(Debug, Clone, Default)]
pub struct CrfEstimator {
    config: CrfConfig,
    model:  Option<CrfModel>,
}

impl CrfEstimator {
    pub fn new(config: CrfConfig) -> Self {
        Self { config, model: None }
    }

    pub fn config(&self) -> &CrfConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&CrfModel> {
        self.model.as_ref()
    }

    fn fitted(&self, operation: &'static str) -> Result<&CrfModel> {
        self.model
            .as_ref()
            .ok_or_else(|| PipelineError::not_fitted(NAME, operation))
    }
}

/// Reject mismatched lengths and non-finite feature values before training.
fn validate(x: &[Vec<SentenceFeatures>], y: &[Vec<String>]) -> Result<()> {
    if x.len() != y.len() {
        return Err(PipelineError::invalid_input(format!(
            "{} sequences but {} label sequences",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(PipelineError::empty_split("no training sequences"));
    }
    for (seq_idx, (items, labels)) in x.iter().zip(y).enumerate() {
        if items.len() != labels.len() {
            return Err(PipelineError::invalid_input(format!(
                "sequence {seq_idx}: {} items but {} labels",
                items.len(),
                labels.len()
            )));
        }
        for (idx_in_seq, item) in items.iter().enumerate() {
            if let Some((name, _)) = item
                .iter()
                .find(|(_, v)| v.as_f64().is_some_and(|n| !n.is_finite()))
            {
                return Err(PipelineError::invalid_input(format!(
                    "sequence {seq_idx}, position {idx_in_seq}: feature '{name}' is not finite"
                )));
            }
        }
    }
    Ok(())
}

impl Estimator for CrfEstimator {
    type Sample = Vec<SentenceFeatures>;
    type Target = Vec<String>;
    type Proba  = Vec<LabelProbabilities>;

    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&mut self, x: &[Self::Sample], y: &[Self::Target]) -> Result<()> {
        validate(x, y)?;
        self.model = Some(train(x, y, &self.config));
        Ok(())
    }

    fn predict(&self, x: &[Self::Sample]) -> Result<Vec<Self::Target>> {
        let model = self.fitted("predict")?;
        let labels = model.labels();
        Ok(x.iter()
            .map(|items| {
                let encoded = model.index().encode_items(items);
                model.tag(&encoded).into_iter().map(|t| labels[t].clone()).collect()
            })
            .collect())
    }

    fn predict_proba(&self, x: &[Self::Sample]) -> Result<Vec<Self::Proba>> {
        let model = self.fitted("predict_proba")?;
        let labels = model.labels();
        Ok(x.iter()
            .map(|items| {
                let encoded = model.index().encode_items(items);
                model
                    .marginals(&encoded)
                    .into_iter()
                    .map(|row| labels.iter().cloned().zip(row).collect())
                    .collect()
            })
            .collect())
    }

    fn score(&self, x: &[Self::Sample], y: &[Self::Target]) -> Result<f64> {
        let model = self.fitted("score")?;
        let predicted = self.predict(x)?;
        Ok(flat_scores(y, &predicted, model.labels())?.f1)
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        for (key, value) in params.iter() {
            match key {
                "c1" => self.config.c1 = parse_value(key, value)?,
                "c2" => self.config.c2 = parse_value(key, value)?,
                "min_freq" => self.config.min_freq = parse_value(key, value)?,
                "max_iterations" => self.config.max_iterations = parse_value(key, value)?,
                "all_possible_transitions" => {
                    self.config.all_possible_transitions = parse_value(key, value)?
                }
                "epsilon" => self.config.epsilon = parse_value(key, value)?,
                "history" => self.config.history = parse_value(key, value)?,
                other => return Err(unknown_param(NAME, other)),
            }
            debug!(key, value, "CRF parameter set");
        }
        Ok(())
    }

    fn classes(&self) -> Option<&[String]> {
        self.model.as_ref().map(|m| m.labels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::FeatureValue;

    fn sent(token: &str) -> SentenceFeatures {
        let mut f = SentenceFeatures::default();
        f.set("TOKEN", FeatureValue::Text(token.into())).unwrap();
        f
    }

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn fitted() -> CrfEstimator {
        let mut crf = CrfEstimator::new(CrfConfig { min_freq: 0.0, c1: 0.0, ..CrfConfig::default() });
        let x = vec![
            vec![sent("hi"), sent("once"), sent("upon")],
            vec![sent("once"), sent("upon"), sent("bye")],
        ];
        let y = vec![labels(&["not_nar", "is_nar", "is_nar"]), labels(&["is_nar", "is_nar", "not_nar"])];
        crf.fit(&x, &y).unwrap();
        crf
    }

    #[test]
    fn test_predict_before_fit_is_not_fitted() {
        let crf = CrfEstimator::default();
        let err = crf.predict(&[vec![sent("x")]]).unwrap_err();
        assert_eq!(err.kind(), "NotFittedError");
        assert_eq!(crf.predict_proba(&[]).unwrap_err().kind(), "NotFittedError");
        assert_eq!(crf.score(&[], &[]).unwrap_err().kind(), "NotFittedError");
    }

    #[test]
    fn test_fit_rejects_length_mismatch() {
        let mut crf = CrfEstimator::default();
        let err = crf.fit(&[vec![sent("a"), sent("b")]], &[labels(&["is_nar"])]).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
        assert!(err.to_string().contains("sequence 0"));

        let err = crf.fit(&[vec![sent("a")]], &[]).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
    }

    #[test]
    fn test_fit_rejects_non_finite_values() {
        let mut f = sent("a");
        f.set("ratio", FeatureValue::Number(f64::NAN)).unwrap();
        let err = CrfEstimator::default().fit(&[vec![f]], &[labels(&["is_nar"])]).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
        assert!(err.to_string().contains("ratio"));
    }

    #[test]
    fn test_predict_shapes_follow_input() {
        let crf = fitted();
        // Scenario C: test sequences of lengths [3, 2]
        let x = vec![vec![sent("hi"), sent("once"), sent("bye")], vec![sent("upon"), sent("hi")]];
        let pred = crf.predict(&x).unwrap();
        assert_eq!(pred.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 2]);

        let proba = crf.predict_proba(&x).unwrap();
        assert_eq!(proba[1].len(), 2);
        for position in proba.iter().flatten() {
            let total: f64 = position.values().sum();
            assert!((total - 1.0).abs() < 1e-9);
            assert_eq!(position.len(), 2);
        }
    }

    #[test]
    fn test_score_on_training_data() {
        let crf = fitted();
        let x = vec![vec![sent("hi"), sent("once")]];
        let y = vec![labels(&["not_nar", "is_nar"])];
        assert!((crf.score(&x, &y).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(crf.classes().unwrap(), &["not_nar".to_string(), "is_nar".to_string()]);
    }

    #[test]
    fn test_set_params() {
        let mut crf = CrfEstimator::default();
        crf.set_params(&ParamSet::new().with("c1", 0.5).with("all_possible_transitions", false))
            .unwrap();
        assert_eq!(crf.config().c1, 0.5);
        assert!(!crf.config().all_possible_transitions);

        let err = crf.set_params(&ParamSet::new().with("gamma", 1)).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
        let err = crf.set_params(&ParamSet::new().with("c2", "lots")).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
    }
}
