// ============================================================
// Layer 2 — ValidateUseCase
// ============================================================
// Repeated document-grouped validation of one estimator kind:
//
//   Step 1: Load the document map              (Layer 4 - data)
//   Step 2: Resolve hyperparameter overrides   (--param / JSON)
//   Step 3: CRF: make sure the windows exist   (Layer 4 - data)
//           Transformer: tokenizer + encoder   (Layer 6 - infra)
//   Step 4: Run the harness with a factory that
//           builds a fresh estimator per run   (Layer 5 - eval)
//   Step 5: Export scores (and retained runs)  (Layer 6 - infra)

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::bert_use_case::{corpus_texts, initial_model, sentence_encoder, TrainBackend};
use crate::data::assembler::{SentenceView, SequenceView};
use crate::data::loader::DocumentMapLoader;
use crate::data::sequencer::ensure_sequences;
use crate::domain::document::{DocumentMap, SeqConfig};
use crate::domain::params::ParamSet;
use crate::domain::traits::Estimator;
use crate::eval::harness::{validate, RetainArtifacts, ValidationConfig, ValidationOutcome};
use crate::infra::metrics::RunLogger;
use crate::infra::report::ReportWriter;
use crate::ml::bert::estimator::TransformerEstimator;
use crate::ml::bert::trainer::BertConfig;
use crate::ml::crf::{CrfConfig, CrfEstimator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorKind {
    Crf,
    Transformer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfig {
    pub docs_map:    PathBuf,
    /// Run log, score table and retained predictions
    pub output_dir:  PathBuf,
    pub estimator:   EstimatorKind,
    pub seq:         SeqConfig,
    pub validation:  ValidationConfig,
    /// Overrides applied through set_params
    pub params:      ParamSet,
    /// Best-params JSON record; `params` win on conflicts
    pub params_file: Option<PathBuf>,
    /// Transformer only: tokenizer location and pretrained encoder
    pub checkpoint_dir: PathBuf,
    pub pretrained:     Option<PathBuf>,
    pub vocab_size:     usize,
    pub bert:           BertConfig,
    /// Write scores.csv (and per-run predictions when retained)
    pub export:         bool,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            docs_map:       PathBuf::from("data/docs_map.json"),
            output_dir:     PathBuf::from("results"),
            estimator:      EstimatorKind::Crf,
            seq:            SeqConfig::default(),
            validation:     ValidationConfig::default(),
            params:         ParamSet::new(),
            params_file:    None,
            checkpoint_dir: PathBuf::from("checkpoints"),
            pretrained:     None,
            vocab_size:     30522,
            bert:           BertConfig::default(),
            export:         false,
        }
    }
}

/// Merge a best-params record (if any) under the explicit overrides.
pub(crate) fn resolve_params(params: &ParamSet, params_file: Option<&Path>) -> Result<ParamSet> {
    let Some(path) = params_file else {
        return Ok(params.clone());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read parameter record '{}'", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("'{}' is not valid JSON", path.display()))?;
    let from_file = ParamSet::from_json(&value)
        .with_context(|| format!("Invalid parameter record '{}'", path.display()))?;
    Ok(from_file.merged(params))
}

/// A CRF with the default config plus `params`.
pub(crate) fn new_crf(params: &ParamSet) -> crate::domain::error::Result<CrfEstimator> {
    let mut crf = CrfEstimator::new(CrfConfig::default());
    crf.set_params(params)?;
    Ok(crf)
}

/// Load the map and build the CRF windows `seq` needs.
pub(crate) fn load_crf_corpus(docs_map: &Path, seq: SeqConfig) -> Result<DocumentMap> {
    let mut map = DocumentMapLoader::new(docs_map).load()?;
    ensure_sequences(&mut map, seq).with_context(|| format!("Cannot build '{}' windows", seq.x_key()))?;
    Ok(map)
}

pub struct ValidateUseCase {
    config: ValidateConfig,
}

impl ValidateUseCase {
    pub fn new(config: ValidateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<ValidationOutcome> {
        match self.config.estimator {
            EstimatorKind::Crf => self.run_crf(),
            EstimatorKind::Transformer => {
                let device = burn::backend::wgpu::WgpuDevice::default();
                self.run_transformer::<TrainBackend>(&device)
            }
        }
    }

    fn run_crf(&self) -> Result<ValidationOutcome> {
        let cfg = &self.config;
        let params = resolve_params(&cfg.params, cfg.params_file.as_deref())?;
        let map = load_crf_corpus(&cfg.docs_map, cfg.seq)?;
        tracing::info!(
            "CRF validation: {} runs over {} documents, windows {}",
            cfg.validation.num_runs,
            map.len(),
            cfg.seq
        );

        let logger = RunLogger::new(&cfg.output_dir)?;
        let outcome = validate(&map, &SequenceView::new(cfg.seq), &cfg.validation, || new_crf(&params), Some(&logger))?;
        self.export(&outcome)?;
        Ok(outcome)
    }

    pub fn run_transformer<B: AutodiffBackend>(&self, device: &B::Device) -> Result<ValidationOutcome> {
        let cfg = &self.config;
        let params = resolve_params(&cfg.params, cfg.params_file.as_deref())?;
        let map = DocumentMapLoader::new(&cfg.docs_map).load()?;

        // The split changes every run, so the vocabulary covers the whole corpus
        let encoder = sentence_encoder(&cfg.checkpoint_dir, &corpus_texts(&map), cfg.vocab_size, cfg.bert.max_len)?;
        let initial = match &cfg.pretrained {
            Some(path) => Some(initial_model::<B>(&cfg.bert, encoder.vocab_size(), Some(path), device)?),
            None => None,
        };
        tracing::info!(
            "Transformer validation: {} runs over {} documents",
            cfg.validation.num_runs,
            map.len()
        );

        let new_estimator = || -> crate::domain::error::Result<TransformerEstimator<B>> {
            let mut est = TransformerEstimator::<B>::new(cfg.bert.clone(), encoder.clone(), device.clone())?;
            if let Some(model) = &initial {
                est = est.with_initial_model(model.clone());
            }
            est.set_params(&params)?;
            Ok(est)
        };

        let logger = RunLogger::new(&cfg.output_dir)?;
        let outcome = validate(&map, &SentenceView, &cfg.validation, new_estimator, Some(&logger))?;
        self.export(&outcome)?;
        Ok(outcome)
    }

    fn export(&self, outcome: &ValidationOutcome) -> Result<()> {
        if !self.config.export {
            return Ok(());
        }
        let writer = ReportWriter::new(&self.config.output_dir)?;
        writer.write_scores("scores.csv", &outcome.scores)?;
        if self.config.validation.retain == RetainArtifacts::Yes {
            for run in &outcome.artifacts {
                writer.write_records(&format!("run_{}_predictions.csv", run.run), &run.records)?;
            }
        }
        Ok(())
    }
}
