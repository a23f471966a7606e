// ============================================================
// Layer 2 — BertUseCase
// ============================================================
// Orchestrates one transformer experiment:
//
//   Step 1: Load the document map            (Layer 4 - data)
//   Step 2: Three-way split by document      (Layer 4 - data)
//   Step 3: Sentence texts per split         (Layer 4 - data)
//   Step 4: Load / build tokenizer           (Layer 6 - infra)
//   Step 5: Encode sentences                 (Layer 6 - infra)
//   Step 6: Build the model, optionally on a
//           pretrained encoder               (Layer 5 - ml)
//   Step 7: Save config                      (Layer 6 - infra)
//   Step 8: Train + validate, checkpointing
//           the best epoch                   (Layer 5 - ml)
//   Step 9: Reload the best model, score the
//           test split                       (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::assembler::{assemble, SentenceView};
use crate::data::dataset::SentenceItem;
use crate::data::loader::DocumentMapLoader;
use crate::data::splitter::split_train_val_test;
use crate::domain::document::DocumentMap;
use crate::domain::error::PipelineError;
use crate::domain::label::NarrativeLabel;
use crate::infra::checkpoint::{CheckpointManager, BEST_MODEL, CONFIG_FILE};
use crate::infra::metrics::MetricsLogger;
use crate::infra::report::ReportWriter;
use crate::infra::tokenizer_store::{SentenceEncoder, TokenizerStore};
use crate::ml::bert::model::NarrativeClassifier;
use crate::ml::bert::trainer::{argmax, class_probabilities, train_validate, BertConfig, TrainOutcome};
use crate::ml::metrics::{classification_report, ClassificationReport};

/// Backend used for real runs
pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

// ─── Configuration ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BertRunConfig {
    pub docs_map:          PathBuf,
    /// Tokenizer, checkpoints, configs and logs
    pub checkpoint_dir:    PathBuf,
    /// Encoder record to start from; None trains the body from scratch
    pub pretrained:        Option<PathBuf>,
    pub test_fraction:     f64,
    /// Fraction of the held-out documents that become test (rest: validation)
    pub val_test_fraction: f64,
    pub seed:              Option<u64>,
    /// Vocabulary budget when a word-level tokenizer has to be built
    pub vocab_size:        usize,
    pub bert:              BertConfig,
}

impl Default for BertRunConfig {
    fn default() -> Self {
        Self {
            docs_map:          PathBuf::from("data/docs_map.json"),
            checkpoint_dir:    PathBuf::from("checkpoints"),
            pretrained:        None,
            test_fraction:     0.3,
            val_test_fraction: 0.5,
            seed:              Some(2018),
            vocab_size:        30522,
            bert:              BertConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BertOutcome {
    pub training: TrainOutcome,
    pub report:   ClassificationReport,
}

// ─── Shared helpers ──────────────────────────────────────────────────────────
/// Every sentence text of the map, document order.
pub(crate) fn corpus_texts(map: &DocumentMap) -> Vec<String> {
    map.iter().flat_map(|(_, r)| r.texts().0.iter().cloned()).collect()
}

pub(crate) fn sentence_encoder(
    store_dir:  &Path,
    texts:      &[String],
    vocab_size: usize,
    max_len:    usize,
) -> Result<SentenceEncoder> {
    let tokenizer = TokenizerStore::new(store_dir).load_or_build(texts, vocab_size)?;
    Ok(SentenceEncoder::new(tokenizer, max_len)?)
}

/// Fresh classifier, with the encoder weights loaded from `pretrained` if given.
pub(crate) fn initial_model<B: AutodiffBackend>(
    bert:       &BertConfig,
    vocab_size: usize,
    pretrained: Option<&PathBuf>,
    device:     &B::Device,
) -> Result<NarrativeClassifier<B>> {
    let model: NarrativeClassifier<B> = bert.model_config(vocab_size).init(device);
    match pretrained {
        Some(path) => {
            let encoder = CheckpointManager::load_encoder(path, model.encoder, device)?;
            Ok(NarrativeClassifier { encoder, head: model.head })
        }
        None => {
            if bert.freeze_body {
                tracing::warn!("No pretrained encoder given; the frozen body keeps its random initialisation");
            } else {
                tracing::warn!("No pretrained encoder given; training the body from scratch");
            }
            Ok(model)
        }
    }
}

fn encode_all(encoder: &SentenceEncoder, texts: &[String], labels: &[String]) -> Result<Vec<SentenceItem>> {
    texts
        .iter()
        .zip(labels)
        .map(|(text, label)| {
            let (input_ids, attention_mask) = encoder.encode(text)?;
            Ok(SentenceItem { input_ids, attention_mask, label: NarrativeLabel::from_label(label).index() })
        })
        .collect()
}

// ─── BertUseCase ─────────────────────────────────────────────────────────────
pub struct BertUseCase {
    config: BertRunConfig,
}

impl BertUseCase {
    pub fn new(config: BertRunConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<BertOutcome> {
        let device = burn::backend::wgpu::WgpuDevice::default();
        self.execute_on::<TrainBackend>(&device)
    }

    pub fn execute_on<B: AutodiffBackend>(&self, device: &B::Device) -> Result<BertOutcome> {
        let cfg = &self.config;

        // ── Step 1: Load documents ───────────────────────────────────────────
        let map = DocumentMapLoader::new(&cfg.docs_map).load()?;

        // ── Step 2: Split by document ────────────────────────────────────────
        let split = split_train_val_test(&map.ids(), cfg.test_fraction, cfg.val_test_fraction, cfg.seed)?;
        tracing::info!(
            "Split: {} train, {} validation, {} test documents",
            split.train.len(),
            split.val.len(),
            split.test.len()
        );
        if split.test.is_empty() {
            return Err(PipelineError::empty_split("no test documents").into());
        }

        // ── Step 3: Sentence texts ───────────────────────────────────────────
        let train = assemble(&map, &split.train, &SentenceView).context("Cannot assemble training sentences")?;
        let val = assemble(&map, &split.val, &SentenceView).context("Cannot assemble validation sentences")?;
        let test = assemble(&map, &split.test, &SentenceView).context("Cannot assemble test sentences")?;

        // ── Step 4 + 5: Tokenizer and encoding ───────────────────────────────
        let encoder = sentence_encoder(&cfg.checkpoint_dir, &train.x, cfg.vocab_size, cfg.bert.max_len)?;
        let train_items = encode_all(&encoder, &train.x, &train.y)?;
        let val_items = encode_all(&encoder, &val.x, &val.y)?;
        let test_items = encode_all(&encoder, &test.x, &test.y)?;

        // ── Step 6: Model ────────────────────────────────────────────────────
        let vocab_size = encoder.vocab_size();
        let model = initial_model::<B>(&cfg.bert, vocab_size, cfg.pretrained.as_ref(), device)?;

        // ── Step 7: Persist config ───────────────────────────────────────────
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir)?;
        ckpt.save_config(CONFIG_FILE, &cfg.bert)?;
        let logger = MetricsLogger::new(&cfg.checkpoint_dir)?;

        // ── Step 8: Train + validate ─────────────────────────────────────────
        let training = train_validate(&cfg.bert, model, &train_items, &val_items, &ckpt, &logger, device)?;

        // ── Step 9: Best model on the test split ─────────────────────────────
        let fresh = cfg.bert.model_config(vocab_size).init::<B::InnerBackend>(device);
        let best = ckpt.load_model(fresh, BEST_MODEL, device)?;
        let predicted: Vec<String> = class_probabilities(&best, &test_items, cfg.bert.batch_size, device)?
            .iter()
            .map(|row| NarrativeLabel::from_index(argmax(row)).as_str().to_string())
            .collect();
        let truth: Vec<String> =
            test.y.iter().map(|l| NarrativeLabel::from_label(l).as_str().to_string()).collect();
        let labels: Vec<String> = NarrativeLabel::ALL.iter().map(|l| l.as_str().to_string()).collect();
        let report = classification_report(&truth, &predicted, &labels)?;

        ReportWriter::new(&cfg.checkpoint_dir)?.write_report("test_report.json", &report)?;
        tracing::info!(
            "Test: f1={:.3} recall={:.3} precision={:.3} over {} sentences",
            report.weighted_avg.f1,
            report.weighted_avg.recall,
            report.weighted_avg.precision,
            truth.len()
        );

        Ok(BertOutcome { training, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use serde_json::json;

    type TestBackend = Autodiff<NdArray>;

    fn write_corpus(dir: &std::path::Path) -> PathBuf {
        let mut docs = serde_json::Map::new();
        for doc in 0..6 {
            docs.insert(
                doc.to_string(),
                json!({
                    "X_bert": ["I remember the winter", "okay thanks", "we moved away back then", "see you"],
                    "y_bert": [1, 0, 1, 0]
                }),
            );
        }
        let path = dir.join("docs_map.json");
        std::fs::write(&path, serde_json::Value::Object(docs).to_string()).unwrap();
        path
    }

    fn tiny_run(dir: &std::path::Path) -> BertRunConfig {
        BertRunConfig {
            docs_map: write_corpus(dir),
            checkpoint_dir: dir.join("ckpt"),
            pretrained: None,
            test_fraction: 0.5,
            val_test_fraction: 0.5,
            seed: Some(5),
            vocab_size: 100,
            bert: BertConfig {
                max_len: 8,
                batch_size: 4,
                epochs: 2,
                lr: 1e-3,
                hidden_size: 8,
                num_heads: 2,
                num_layers: 1,
                intermediate_size: 16,
                head_hidden: 4,
                freeze_body: false,
                seed: Some(1),
                ..BertConfig::default()
            },
        }
    }

    #[test]
    fn test_end_to_end_on_cpu() {
        let dir = tempfile::tempdir().unwrap();
        let run = tiny_run(dir.path());
        let outcome = BertUseCase::new(run.clone()).execute_on::<TestBackend>(&Default::default()).unwrap();

        assert_eq!(outcome.training.history.len(), 2);
        assert!(outcome.training.best_epoch >= 1);
        // 6 docs → 3 train, 3 held out → 2 val + 1 test; 4 sentences each
        assert_eq!(outcome.report.weighted_avg.support, 4);

        let ckpt = CheckpointManager::new(&run.checkpoint_dir).unwrap();
        assert!(ckpt.has_model(BEST_MODEL));
        let saved: BertConfig = ckpt.load_config(CONFIG_FILE).unwrap();
        assert_eq!(saved, run.bert);
        assert!(run.checkpoint_dir.join("test_report.json").exists());
        assert!(run.checkpoint_dir.join("epoch_metrics.csv").exists());
    }

    #[test]
    fn test_too_few_documents_is_empty_split() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = tiny_run(dir.path());
        run.test_fraction = 0.1;
        let err = BertUseCase::new(run).execute_on::<TestBackend>(&Default::default()).unwrap_err();
        assert_eq!(err.downcast_ref::<PipelineError>().unwrap().kind(), "EmptySplitError");
    }

    #[test]
    fn test_pretrained_encoder_is_loaded() {
        use burn::prelude::*;
        use burn::record::CompactRecorder;

        let dir = tempfile::tempdir().unwrap();
        let run = tiny_run(dir.path());
        let device = Default::default();
        let source = initial_model::<TestBackend>(&run.bert, 110, None, &device).unwrap();
        let path = dir.path().join("encoder");
        source.encoder.clone().save_file(&path, &CompactRecorder::new()).unwrap();

        let loaded = initial_model::<TestBackend>(&run.bert, 110, Some(&path), &device).unwrap();
        let a = source.encoder.token_embedding.weight.val();
        let b = loaded.encoder.token_embedding.weight.val();
        // CompactRecorder stores half precision
        assert!(a.sub(b).abs().max().into_scalar().elem::<f32>() < 1e-2);
    }
}
