// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores transformer weights with Burn's
// CompactRecorder, plus the JSON side files a run needs.
//
//   checkpoints/
//     best_model.mpk             ← weights with the lowest val loss
//     bert_config.json           ← architecture + training config
//     .853_17.10_14:05_best_params.json
//                                ← best hyperparameters of a search
//
// The best-params file name starts with the score to three
// decimals without the leading zero, then the local time as
// dd.mm_HH:MM, so a directory listing sorts by score.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use chrono::{DateTime, Local};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::params::ParamSet;
use crate::ml::bert::model::{BertEncoder, NarrativeClassifier};

/// File stem of the best transformer checkpoint
pub const BEST_MODEL: &str = "best_model";
/// File name of the persisted BertConfig
pub const CONFIG_FILE: &str = "bert_config.json";

/// Extension CompactRecorder (named MessagePack) appends to a record path
const RECORD_EXTENSION: &str = "mpk";

/// Saves and loads model checkpoints and config files in one directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory (and parents) when missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.dir.join(format!("{name}.{RECORD_EXTENSION}")).exists()
    }

    /// Write model weights to `{dir}/{name}.mpk`.
    pub fn save_model<B: Backend>(&self, model: &NarrativeClassifier<B>, name: &str) -> Result<()> {
        let path = self.dir.join(name);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        tracing::debug!("Saved checkpoint '{}'", path.display());
        Ok(())
    }

    /// Restore weights into a model of the same architecture.
    pub fn load_model<B: Backend>(
        &self,
        model:  NarrativeClassifier<B>,
        name:   &str,
        device: &B::Device,
    ) -> Result<NarrativeClassifier<B>> {
        let path = self.dir.join(name);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;
        tracing::info!("Loaded checkpoint '{}'", path.display());
        Ok(model.load_record(record))
    }

    /// Load pretrained encoder weights recorded from a `BertEncoder`.
    pub fn load_encoder<B: Backend>(
        path:    impl AsRef<Path>,
        encoder: BertEncoder<B>,
        device:  &B::Device,
    ) -> Result<BertEncoder<B>> {
        let path = path.as_ref().to_path_buf();
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load pretrained encoder '{}'", path.display()))?;
        tracing::info!("Loaded pretrained encoder from '{}'", path.display());
        Ok(encoder.load_record(record))
    }

    pub fn save_config<T: Serialize>(&self, file_name: &str, cfg: &T) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved config to '{}'", path.display());
        Ok(path)
    }

    pub fn load_config<T: DeserializeOwned>(&self, file_name: &str) -> Result<T> {
        let path = self.dir.join(file_name);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }

    /// Persist the winning hyperparameters of a search.
    pub fn save_best_params(&self, score: f64, params: &ParamSet, at: DateTime<Local>) -> Result<PathBuf> {
        self.save_config(&best_params_file_name(score, at), params)
    }
}

/// `{score:.3 without leading 0}_{dd.mm_HH:MM}_best_params.json`
pub fn best_params_file_name(score: f64, at: DateTime<Local>) -> String {
    let score = format!("{score:.3}");
    let score = score.strip_prefix('0').unwrap_or(&score);
    format!("{score}_{}_best_params.json", at.format("%d.%m_%H:%M"))
}
