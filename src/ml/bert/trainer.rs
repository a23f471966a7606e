// ============================================================
// Layer 5 — Transformer Training Loop
// ============================================================
// Class-weighted NLL on the head's log-probabilities:
//
//   loss = - Σ_i w[y_i] · log p(y_i | x_i)  /  Σ_i w[y_i]
//
// with w from inverse-frequency balancing of the training labels.
//
// Key Burn 0.20 points:
//   - training runs on B (Autodiff<…>) for gradients
//   - model.valid() returns the model on B::InnerBackend, so
//     evaluation batches are built for the inner backend
//   - argmax(1) returns [batch, 1]; flatten before .equal()
//   - gradients are clipped to a global L2 norm over all
//     parameters before every optimiser step
//
// Reference: Loshchilov & Hutter (2019) AdamW

use anyhow::{Context, Result};
use burn::{
    module::{AutodiffModule, ModuleVisitor, Param},
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::batcher::{sequential_batches, SentenceBatch};
use crate::data::dataset::SentenceItem;
use crate::domain::error::PipelineError;
use crate::domain::label::NarrativeLabel;
use crate::infra::checkpoint::{CheckpointManager, BEST_MODEL};
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::bert::model::{NarrativeClassifier, NarrativeClassifierConfig};
use crate::ml::metrics::class_weights;

// ─── BertConfig ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertConfig {
    /// Tokens per sentence including [CLS] and [SEP]
    pub max_len:           usize,
    pub batch_size:        usize,
    pub epochs:            usize,
    pub lr:                f64,
    pub weight_decay:      f32,
    pub hidden_size:       usize,
    pub num_heads:         usize,
    pub num_layers:        usize,
    pub intermediate_size: usize,
    pub head_hidden:       usize,
    pub dropout:           f64,
    /// Train only the classification head
    pub freeze_body:       bool,
    pub max_grad_norm:     f32,
    /// Seed for batch order in train_validate; None draws from entropy
    pub seed:              Option<u64>,
}

impl Default for BertConfig {
    fn default() -> Self {
        Self {
            max_len:           30,
            batch_size:        32,
            epochs:            10,
            lr:                1e-5,
            weight_decay:      0.01,
            hidden_size:       768,
            num_heads:         12,
            num_layers:        12,
            intermediate_size: 3072,
            head_hidden:       512,
            dropout:           0.1,
            freeze_body:       true,
            max_grad_norm:     1.0,
            seed:              None,
        }
    }
}

impl BertConfig {
    pub fn model_config(&self, vocab_size: usize) -> NarrativeClassifierConfig {
        NarrativeClassifierConfig::new(vocab_size)
            .with_max_position(self.max_len.max(512))
            .with_hidden_size(self.hidden_size)
            .with_num_heads(self.num_heads)
            .with_num_layers(self.num_layers)
            .with_intermediate_size(self.intermediate_size)
            .with_head_hidden(self.head_hidden)
            .with_n_classes(NarrativeLabel::ALL.len())
            .with_dropout(self.dropout)
    }

    pub fn optimizer(&self) -> AdamWConfig {
        AdamWConfig::new().with_weight_decay(self.weight_decay)
    }
}

/// Loss and accuracy of one no-gradient pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalSummary {
    pub loss:     f64,
    pub accuracy: f64,
}

pub fn weight_tensor<B: Backend>(weights: &[f64], device: &B::Device) -> Tensor<B, 1> {
    let w: Vec<f32> = weights.iter().map(|&v| v as f32).collect();
    Tensor::<B, 1>::from_floats(w.as_slice(), device)
}

/// Class-weighted negative log-likelihood, normalised by the summed weights.
pub fn weighted_nll<B: Backend>(
    log_probs: Tensor<B, 2>,
    targets:   Tensor<B, 1, Int>,
    weights:   Tensor<B, 1>,
) -> Tensor<B, 1> {
    let [n, _] = log_probs.dims();
    let picked = log_probs.gather(1, targets.clone().reshape([n, 1])).reshape([n]);
    let w = weights.select(0, targets);
    (picked * w.clone()).sum().neg() / w.sum()
}

/// Batches over a random permutation of the items.
pub fn shuffled_batches<B: Backend>(
    items:      &[SentenceItem],
    batch_size: usize,
    rng:        &mut StdRng,
    device:     &B::Device,
) -> Vec<SentenceBatch<B>> {
    let mut order: Vec<SentenceItem> = items.to_vec();
    order.shuffle(rng);
    sequential_batches::<B>(&order, batch_size, device)
}

// ─── Global-norm gradient clipping ───────────────────────────────────────────

/// Sums the squared gradient entries of every float parameter.
struct GradSquares<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    sum:   f64,
    _b:    std::marker::PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradSquares<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(g) = self.grads.get::<B::InnerBackend, D>(param.id) {
            self.sum += (g.clone() * g).sum().into_scalar().elem::<f64>();
        }
    }
}

/// Multiplies every float parameter's gradient by `factor`.
struct GradScale<'a, B: AutodiffBackend> {
    grads:  &'a mut GradientsParams,
    factor: f64,
    _b:     std::marker::PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradScale<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(g) = self.grads.remove::<B::InnerBackend, D>(param.id) {
            self.grads.register::<B::InnerBackend, D>(param.id, g.mul_scalar(self.factor));
        }
    }
}

/// L2 norm of all gradients of `module`, taken together.
pub fn global_grad_norm<B, M>(module: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut squares = GradSquares::<B> { grads, sum: 0.0, _b: std::marker::PhantomData };
    module.visit(&mut squares);
    squares.sum.sqrt()
}

/// Rescale all gradients so their global norm is at most `max_norm`.
///
/// Returns the gradients and the norm measured before clipping.
pub fn clip_grad_norm<B, M>(module: &M, mut grads: GradientsParams, max_norm: f64) -> (GradientsParams, f64)
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let norm = global_grad_norm::<B, M>(module, &grads);
    let factor = max_norm / (norm + 1e-6);
    if factor < 1.0 {
        let mut scale = GradScale::<B> { grads: &mut grads, factor, _b: std::marker::PhantomData };
        module.visit(&mut scale);
    }
    (grads, norm)
}

/// One optimisation pass over all batches; returns the model and mean loss.
///
/// Gradients are clipped to `max_grad_norm` (global L2) before each step.
pub fn train_epoch<B, O>(
    mut model: NarrativeClassifier<B>,
    optim:     &mut O,
    batches:   &[SentenceBatch<B>],
    weights:   &Tensor<B, 1>,
    lr:        f64,
    max_grad_norm: f32,
) -> (NarrativeClassifier<B>, f64)
where
    B: AutodiffBackend,
    O: Optimizer<NarrativeClassifier<B>, B>,
{
    let mut loss_sum = 0.0f64;
    for batch in batches {
        let log_probs = model.forward(batch.input_ids.clone(), batch.attention_mask.clone());
        let loss = weighted_nll(log_probs, batch.labels.clone(), weights.clone());
        loss_sum += loss.clone().into_scalar().elem::<f64>();

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        let (grads, _) = clip_grad_norm::<B, _>(&model, grads, f64::from(max_grad_norm));
        model = optim.step(lr, model, grads);
    }
    let avg = if batches.is_empty() { f64::NAN } else { loss_sum / batches.len() as f64 };
    (model, avg)
}

/// Forward-only pass: mean weighted loss and accuracy.
pub fn evaluate<B: Backend>(
    model:   &NarrativeClassifier<B>,
    batches: &[SentenceBatch<B>],
    weights: &Tensor<B, 1>,
) -> EvalSummary {
    let mut loss_sum = 0.0f64;
    let mut correct = 0i64;
    let mut total = 0usize;

    for batch in batches {
        let log_probs = model.forward(batch.input_ids.clone(), batch.attention_mask.clone());
        let loss = weighted_nll(log_probs.clone(), batch.labels.clone(), weights.clone());
        loss_sum += loss.into_scalar().elem::<f64>();

        let predicted = log_probs.argmax(1).flatten::<1>(0, 1);
        total += batch.labels.dims()[0];
        correct += predicted
            .equal(batch.labels.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();
    }

    EvalSummary {
        loss:     if batches.is_empty() { f64::NAN } else { loss_sum / batches.len() as f64 },
        accuracy: if total > 0 { correct as f64 / total as f64 } else { 0.0 },
    }
}

/// Class probabilities per item, rows of [p(not_nar), p(is_nar)].
pub fn class_probabilities<B: Backend>(
    model:      &NarrativeClassifier<B>,
    items:      &[SentenceItem],
    batch_size: usize,
    device:     &B::Device,
) -> crate::domain::error::Result<Vec<Vec<f64>>> {
    let n_classes = NarrativeLabel::ALL.len();
    let mut rows = Vec::with_capacity(items.len());
    for batch in sequential_batches::<B>(items, batch_size, device) {
        let probs = model.forward(batch.input_ids, batch.attention_mask).exp();
        let flat: Vec<f64> = probs
            .into_data()
            .convert::<f64>()
            .to_vec::<f64>()
            .map_err(|e| PipelineError::Tensor(format!("{e:?}")))?;
        rows.extend(flat.chunks(n_classes).map(<[f64]>::to_vec));
    }
    Ok(rows)
}

/// Index of the largest value; the first maximum wins ties.
pub fn argmax(row: &[f64]) -> usize {
    row.iter()
        .enumerate()
        .fold(0, |best, (i, p)| if *p > row[best] { i } else { best })
}

/// Per-epoch losses and where the best model was found.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub history:       Vec<EpochMetrics>,
    pub best_epoch:    usize,
    pub best_val_loss: f64,
}

/// Train with a held-out validation split, checkpointing the model
/// each time the validation loss improves.
pub fn train_validate<B: AutodiffBackend>(
    cfg:     &BertConfig,
    model:   NarrativeClassifier<B>,
    train:   &[SentenceItem],
    val:     &[SentenceItem],
    ckpt:    &CheckpointManager,
    logger:  &MetricsLogger,
    device:  &B::Device,
) -> Result<TrainOutcome> {
    if val.is_empty() {
        return Err(PipelineError::empty_split("validation split has no sentences").into());
    }
    let labels: Vec<usize> = train.iter().map(|i| i.label).collect();
    let weights = class_weights(&labels, NarrativeLabel::ALL.len())
        .context("Cannot derive class weights")?;
    tracing::info!("Class weights: {:?}", weights);

    let train_weights = weight_tensor::<B>(&weights, device);
    let val_weights   = weight_tensor::<B::InnerBackend>(&weights, device);
    let val_batches   = sequential_batches::<B::InnerBackend>(val, cfg.batch_size, device);

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut optim = cfg.optimizer().init();
    let mut model = if cfg.freeze_body { model.freeze_body() } else { model };

    let mut outcome = TrainOutcome { history: Vec::new(), best_epoch: 0, best_val_loss: f64::INFINITY };

    for epoch in 1..=cfg.epochs {
        let batches = shuffled_batches::<B>(train, cfg.batch_size, &mut rng, device);
        let (trained, train_loss) = train_epoch(model, &mut optim, &batches, &train_weights, cfg.lr, cfg.max_grad_norm);
        model = trained;

        let eval = evaluate(&model.valid(), &val_batches, &val_weights);
        let metrics = EpochMetrics::new(epoch, train_loss, eval.loss, eval.accuracy);
        logger.log(&metrics)?;

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | val_acc={:.1}%",
            epoch, cfg.epochs, train_loss, eval.loss, eval.accuracy * 100.0,
        );

        if metrics.is_improvement(outcome.best_val_loss) {
            ckpt.save_model(&model, BEST_MODEL)?;
            outcome.best_epoch = epoch;
            outcome.best_val_loss = eval.loss;
            tracing::info!("New best model at epoch {} (val_loss={:.4})", epoch, eval.loss);
        }
        outcome.history.push(metrics);
    }

    tracing::info!(
        "Training complete: best epoch {} with val_loss={:.4}",
        outcome.best_epoch,
        outcome.best_val_loss
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;

    #[test]
    fn test_weighted_nll_by_hand() {
        let device = Default::default();
        // p = [[0.5, 0.5], [0.25, 0.75]], targets [0, 1], weights [1, 3]
        let log_probs = Tensor::<TestBackend, 2>::from_floats(
            [[0.5f32.ln(), 0.5f32.ln()], [0.25f32.ln(), 0.75f32.ln()]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);
        let weights = weight_tensor::<TestBackend>(&[1.0, 3.0], &device);

        let loss: f64 = weighted_nll(log_probs, targets, weights).into_scalar().elem::<f64>();
        let expected = -(0.5f64.ln() + 3.0 * 0.75f64.ln()) / 4.0;
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");
    }

    #[test]
    fn test_uniform_weights_reduce_to_mean_nll() {
        let device = Default::default();
        let log_probs = Tensor::<TestBackend, 2>::from_floats([[0.2f32.ln(), 0.8f32.ln()]], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1], &device);
        let weights = weight_tensor::<TestBackend>(&[1.0, 1.0], &device);
        let loss: f64 = weighted_nll(log_probs, targets, weights).into_scalar().elem::<f64>();
        assert!((loss + 0.8f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_argmax_first_maximum_wins() {
        assert_eq!(argmax(&[0.3, 0.7]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    fn tiny() -> BertConfig {
        BertConfig {
            max_len: 4,
            batch_size: 2,
            epochs: 2,
            lr: 1e-2,
            hidden_size: 8,
            num_heads: 2,
            num_layers: 1,
            intermediate_size: 16,
            head_hidden: 4,
            freeze_body: false,
            seed: Some(7),
            ..BertConfig::default()
        }
    }

    fn items() -> Vec<SentenceItem> {
        (0..6)
            .map(|i| SentenceItem {
                input_ids:      vec![101, 104 + (i % 3) as u32, 102, 0],
                attention_mask: vec![1, 1, 1, 0],
                label:          i % 2,
            })
            .collect()
    }

    #[test]
    fn test_train_validate_checkpoints_best_model() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();

        let cfg = tiny();
        let model: NarrativeClassifier<B> = cfg.model_config(110).init(&device);
        let outcome = train_validate(&cfg, model, &items(), &items()[..2], &ckpt, &logger, &device).unwrap();

        assert_eq!(outcome.history.len(), 2);
        assert!(outcome.best_epoch >= 1);
        assert!(ckpt.has_model(BEST_MODEL));
    }

    #[test]
    fn test_train_validate_rejects_empty_validation() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();

        let cfg = tiny();
        let model: NarrativeClassifier<B> = cfg.model_config(110).init(&device);
        assert!(train_validate(&cfg, model, &items(), &[], &ckpt, &logger, &device).is_err());
    }

    // ─── Gradient clipping ───────────────────────────────────────────────

    #[derive(Module, Debug)]
    struct TwoParams<B: Backend> {
        a: Param<Tensor<B, 1>>,
        b: Param<Tensor<B, 1>>,
    }

    fn two_params(ga: [f32; 2], gb: [f32; 2]) -> (TwoParams<Autodiff<NdArray>>, GradientsParams) {
        let device = Default::default();
        let module = TwoParams {
            a: Param::from_tensor(Tensor::zeros([2], &device)),
            b: Param::from_tensor(Tensor::zeros([2], &device)),
        };
        let mut grads = GradientsParams::new();
        grads.register::<NdArray, 1>(module.a.id, Tensor::from_floats(ga, &device));
        grads.register::<NdArray, 1>(module.b.id, Tensor::from_floats(gb, &device));
        (module, grads)
    }

    fn grad_of(grads: &GradientsParams, param: &Param<Tensor<Autodiff<NdArray>, 1>>) -> Vec<f32> {
        grads.get::<NdArray, 1>(param.id).unwrap().into_data().convert::<f32>().to_vec().unwrap()
    }

    #[test]
    fn test_clipping_bounds_the_combined_norm() {
        // each tensor has norm 0.8, together 0.8·√2 ≈ 1.131
        let (module, grads) = two_params([0.8, 0.0], [0.0, 0.8]);
        let max_norm = f64::from(BertConfig::default().max_grad_norm);
        let (clipped, before) = clip_grad_norm::<Autodiff<NdArray>, _>(&module, grads, max_norm);

        assert!((before - 0.8 * 2f64.sqrt()).abs() < 1e-5);
        let after = global_grad_norm::<Autodiff<NdArray>, _>(&module, &clipped);
        assert!(after <= max_norm + 1e-5, "global norm {after} exceeds {max_norm}");
        // direction is kept
        let a = grad_of(&clipped, &module.a);
        assert!((a[0] - 0.5f32.sqrt()).abs() < 1e-4 && a[1] == 0.0);
    }

    #[test]
    fn test_small_gradients_are_untouched() {
        let (module, grads) = two_params([0.3, 0.0], [0.0, 0.4]);
        let (clipped, before) = clip_grad_norm::<Autodiff<NdArray>, _>(&module, grads, 1.0);
        assert!((before - 0.5).abs() < 1e-6);
        assert_eq!(grad_of(&clipped, &module.a), vec![0.3, 0.0]);
        assert_eq!(grad_of(&clipped, &module.b), vec![0.0, 0.4]);
    }

    /// Every float parameter value, in visiting order.
    struct Values(Vec<f32>);

    impl<B: Backend> ModuleVisitor<B> for Values {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            self.0.extend(param.val().into_data().convert::<f32>().to_vec::<f32>().unwrap());
        }
    }

    fn values<B: Backend, M: Module<B>>(module: &M) -> Vec<f32> {
        let mut v = Values(Vec::new());
        module.visit(&mut v);
        v.0
    }

    #[test]
    fn test_epoch_steps_with_clipped_gradients() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let model: NarrativeClassifier<B> = tiny().model_config(110).init(&device);
        let before = values(&model.valid());

        // one batch, plain SGD with lr 1: the update equals the clipped gradient
        let batches = sequential_batches::<B>(&items(), 6, &device);
        let weights = weight_tensor::<B>(&[1.0, 1.0], &device);
        let mut optim = burn::optim::SgdConfig::new().init();
        let (model, _) = train_epoch(model, &mut optim, &batches, &weights, 1.0, 1e-3);
        let after = values(&model.valid());

        let step: f64 = before
            .iter()
            .zip(&after)
            .map(|(x, y)| f64::from(x - y).powi(2))
            .sum::<f64>()
            .sqrt();
        assert!(step > 0.0);
        assert!(step <= 1e-3 * 1.01, "update norm {step}");
    }
}
