// ============================================================
// Layer 5 — Transformer Estimator
// ============================================================
// Wraps the narrative classifier in the same fit / predict
// surface as the CRF so the validation harness can run either.
//
//   fit:  labels → {0, 1}, balanced class weights, sequential
//         batches, N epochs of (train pass + no-grad loss check
//         on the same data). A held-out validation split is the
//         caller's job (see train_validate).
//   predict:       argmax of the two log-probabilities
//   predict_proba: exp(log-probabilities), i.e. softmax of logits
//
// Every call to fit starts from the initial weights (fresh
// random init, or a copy of the pretrained model), never from
// a previous fit.

use burn::{module::AutodiffModule, prelude::*, tensor::backend::AutodiffBackend};
use tracing::{info, warn};

use crate::data::batcher::sequential_batches;
use crate::data::dataset::SentenceItem;
use crate::domain::error::{PipelineError, Result};
use crate::domain::label::NarrativeLabel;
use crate::domain::params::{parse_value, unknown_param, ParamSet};
use crate::domain::traits::{Estimator, LabelProbabilities};
use crate::infra::tokenizer_store::SentenceEncoder;
use crate::ml::bert::model::NarrativeClassifier;
use crate::ml::bert::trainer::{argmax, class_probabilities, evaluate, train_epoch, weight_tensor, BertConfig};
use crate::ml::metrics::{class_weights, flat_scores};

const NAME: &str = "TransformerEstimator";

pub struct TransformerEstimator<B: AutodiffBackend> {
    config:  BertConfig,
    encoder: SentenceEncoder,
    device:  B::Device,
    initial: Option<NarrativeClassifier<B>>,
    model:   Option<NarrativeClassifier<B::InnerBackend>>,
    classes: Vec<String>,
}

impl<B: AutodiffBackend> TransformerEstimator<B> {
    pub fn new(config: BertConfig, encoder: SentenceEncoder, device: B::Device) -> Result<Self> {
        let encoder = encoder.with_max_len(config.max_len)?;
        Ok(Self { config, encoder, device, initial: None, model: None, classes: Vec::new() })
    }

    /// Start every fit from these weights (e.g. a pretrained encoder).
    pub fn with_initial_model(mut self, model: NarrativeClassifier<B>) -> Self {
        self.initial = Some(model);
        self
    }

    pub fn config(&self) -> &BertConfig {
        &self.config
    }

    /// Trained model on the inference backend.
    pub fn model(&self) -> Option<&NarrativeClassifier<B::InnerBackend>> {
        self.model.as_ref()
    }

    fn fresh_model(&self) -> NarrativeClassifier<B> {
        match &self.initial {
            Some(model) => model.clone(),
            None => self
                .config
                .model_config(self.encoder.vocab_size())
                .init(&self.device),
        }
    }

    fn items(&self, x: &[String], labels: &[usize]) -> Result<Vec<SentenceItem>> {
        x.iter()
            .zip(labels)
            .map(|(text, &label)| {
                let (input_ids, attention_mask) = self.encoder.encode(text)?;
                Ok(SentenceItem { input_ids, attention_mask, label })
            })
            .collect()
    }

    /// Class probabilities as rows of [p(not_nar), p(is_nar)].
    fn probabilities(&self, x: &[String], operation: &'static str) -> Result<Vec<Vec<f64>>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::not_fitted(NAME, operation))?;
        if x.is_empty() {
            return Ok(Vec::new());
        }
        let items = self.items(x, &vec![0; x.len()])?;
        class_probabilities(model, &items, self.config.batch_size, &self.device)
    }
}

impl<B: AutodiffBackend> Estimator for TransformerEstimator<B> {
    type Sample = String;
    type Target = String;
    type Proba  = LabelProbabilities;

    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&mut self, x: &[String], y: &[String]) -> Result<()> {
        if x.len() != y.len() {
            return Err(PipelineError::invalid_input(format!(
                "{} sentences but {} labels",
                x.len(),
                y.len()
            )));
        }
        if x.is_empty() {
            return Err(PipelineError::empty_split("no training sentences"));
        }

        let n_classes = NarrativeLabel::ALL.len();
        let labels: Vec<usize> = y.iter().map(|l| NarrativeLabel::from_label(l).index()).collect();
        let weights = class_weights(&labels, n_classes)?;
        for label in NarrativeLabel::ALL {
            if !labels.contains(&label.index()) {
                warn!("No '{}' sentences in the training set; its class weight is 1.0", label.as_str());
            }
        }

        let items = self.items(x, &labels)?;
        let train_batches = sequential_batches::<B>(&items, self.config.batch_size, &self.device);
        let check_batches = sequential_batches::<B::InnerBackend>(&items, self.config.batch_size, &self.device);
        let train_weights = weight_tensor::<B>(&weights, &self.device);
        let check_weights = weight_tensor::<B::InnerBackend>(&weights, &self.device);

        let mut optim = self.config.optimizer().init();
        let mut model = self.fresh_model();
        if self.config.freeze_body {
            model = model.freeze_body();
        }

        info!(sentences = items.len(), epochs = self.config.epochs, "Fitting transformer");
        for epoch in 1..=self.config.epochs {
            let (trained, train_loss) =
                train_epoch(model, &mut optim, &train_batches, &train_weights, self.config.lr, self.config.max_grad_norm);
            model = trained;
            let check = evaluate(&model.valid(), &check_batches, &check_weights);
            info!(epoch, train_loss, check_loss = check.loss, "Epoch finished");
        }

        self.model = Some(model.valid());
        self.classes = NarrativeLabel::ALL.iter().map(|l| l.as_str().to_string()).collect();
        Ok(())
    }

    fn predict(&self, x: &[String]) -> Result<Vec<String>> {
        Ok(self
            .probabilities(x, "predict")?
            .into_iter()
            .map(|row| NarrativeLabel::from_index(argmax(&row)).as_str().to_string())
            .collect())
    }

    fn predict_proba(&self, x: &[String]) -> Result<Vec<LabelProbabilities>> {
        Ok(self
            .probabilities(x, "predict_proba")?
            .into_iter()
            .map(|row| {
                NarrativeLabel::ALL
                    .iter()
                    .zip(row)
                    .map(|(label, p)| (label.as_str().to_string(), p))
                    .collect()
            })
            .collect())
    }

    fn score(&self, x: &[String], y: &[String]) -> Result<f64> {
        let predicted = self.predict(x)?;
        let y: Vec<String> = y
            .iter()
            .map(|l| NarrativeLabel::from_label(l).as_str().to_string())
            .collect();
        Ok(flat_scores(&y, &predicted, &self.classes)?.f1)
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        for (key, value) in params.iter() {
            match key {
                "lr" => self.config.lr = parse_value(key, value)?,
                "epochs" => self.config.epochs = parse_value(key, value)?,
                "batch_size" => self.config.batch_size = parse_value(key, value)?,
                "dropout" => self.config.dropout = parse_value(key, value)?,
                "weight_decay" => self.config.weight_decay = parse_value(key, value)?,
                "max_grad_norm" => self.config.max_grad_norm = parse_value(key, value)?,
                "freeze_body" => self.config.freeze_body = parse_value(key, value)?,
                "max_len" => {
                    self.config.max_len = parse_value(key, value)?;
                    self.encoder = self.encoder.clone().with_max_len(self.config.max_len)?;
                }
                other => return Err(unknown_param(NAME, other)),
            }
        }
        Ok(())
    }

    fn classes(&self) -> Option<&[String]> {
        self.model.as_ref().map(|_| self.classes.as_slice())
    }
}
