// ============================================================
// Layer 2 — SearchUseCase
// ============================================================
// Grid search over the CRF regularisation strengths:
//
//   for (c1, c2) in c1_grid × c2_grid:
//       params = base ⊕ {c1, c2}
//       score  = mean f1 of a short repeated validation
//
// The best candidate is written as a best-params record through
// the CheckpointManager, ready for `--params-file`.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::validate_use_case::{load_crf_corpus, new_crf, resolve_params};
use crate::data::assembler::SequenceView;
use crate::domain::document::SeqConfig;
use crate::domain::error::PipelineError;
use crate::domain::params::ParamSet;
use crate::eval::harness::{validate, ValidationConfig};
use crate::infra::checkpoint::CheckpointManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub docs_map:       PathBuf,
    /// Where the best-params record is written
    pub checkpoint_dir: PathBuf,
    pub seq:            SeqConfig,
    pub validation:     ValidationConfig,
    pub c1_grid:        Vec<f64>,
    pub c2_grid:        Vec<f64>,
    /// Fixed parameters shared by every candidate
    pub params:         ParamSet,
    pub params_file:    Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            docs_map:       PathBuf::from("data/docs_map.json"),
            checkpoint_dir: PathBuf::from("checkpoints"),
            seq:            SeqConfig::default(),
            validation:     ValidationConfig { num_runs: 3, ..ValidationConfig::default() },
            c1_grid:        vec![0.01, 0.05, 0.1, 0.5],
            c2_grid:        vec![0.01, 0.05, 0.1, 0.5],
            params:         ParamSet::new(),
            params_file:    None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub params: ParamSet,
    pub score:  f64,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Grid order: c1 outer, c2 inner
    pub candidates: Vec<Candidate>,
    pub best:       Candidate,
    pub path:       PathBuf,
}

pub struct SearchUseCase {
    config: SearchConfig,
}

impl SearchUseCase {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<SearchOutcome> {
        let cfg = &self.config;
        if cfg.c1_grid.is_empty() || cfg.c2_grid.is_empty() {
            return Err(PipelineError::invalid_input("search needs at least one c1 and one c2 value").into());
        }

        // ── Step 1: Shared inputs ────────────────────────────────────────────
        let base = resolve_params(&cfg.params, cfg.params_file.as_deref())?;
        let map = load_crf_corpus(&cfg.docs_map, cfg.seq)?;
        let view = SequenceView::new(cfg.seq);
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir)?;

        // ── Step 2: Score every grid point ───────────────────────────────────
        let mut candidates = Vec::with_capacity(cfg.c1_grid.len() * cfg.c2_grid.len());
        for &c1 in &cfg.c1_grid {
            for &c2 in &cfg.c2_grid {
                let params = base.merged(&ParamSet::new().with("c1", c1).with("c2", c2));
                let outcome = validate(&map, &view, &cfg.validation, || new_crf(&params), None)
                    .with_context(|| format!("Validation failed for c1={c1}, c2={c2}"))?;
                let score = outcome.summary().map(|(mean, _)| mean.f1).unwrap_or(0.0);
                tracing::info!("c1={c1} c2={c2}: mean f1 {score:.4}");
                candidates.push(Candidate { params, score });
            }
        }

        // ── Step 3: Keep the best ────────────────────────────────────────────
        let best = best_candidate(&candidates)
            .cloned()
            .ok_or_else(|| PipelineError::invalid_input("no grid point produced a finite score"))?;
        let path = ckpt.save_best_params(best.score, &best.params, Local::now())?;
        tracing::info!("Best parameters ({:.4}) saved to {}", best.score, path.display());

        Ok(SearchOutcome { candidates, best, path })
    }
}

/// Highest finite score; the first one wins on ties.
fn best_candidate(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| c.score.is_finite())
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.score >= c.score => Some(b),
            _ => Some(c),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::harness::RetainArtifacts;
    use serde_json::{json, Value};
    use std::path::Path;

    fn write_corpus(dir: &Path) -> PathBuf {
        let mut docs = serde_json::Map::new();
        for doc in 0..4 {
            let x: Vec<Value> = (0..6)
                .map(|i| {
                    let token = if i % 2 == 0 { "okay" } else { "remember" };
                    json!({"par_idx_in_doc": i, "sent_idx_in_par": 0, "TOKEN": token})
                })
                .collect();
            let y: Vec<&str> = (0..6).map(|i| if i % 2 == 0 { "not_nar" } else { "is_nar" }).collect();
            docs.insert(doc.to_string(), json!({"X": x, "y": y}));
        }
        let path = dir.join("docs_map.json");
        std::fs::write(&path, Value::Object(docs).to_string()).unwrap();
        path
    }

    fn config(dir: &Path) -> SearchConfig {
        SearchConfig {
            docs_map: write_corpus(dir),
            checkpoint_dir: dir.join("ckpt"),
            validation: ValidationConfig { test_fraction: 0.5, num_runs: 2, seed: Some(3), retain: RetainArtifacts::No },
            c1_grid: vec![0.0, 0.1],
            c2_grid: vec![0.01],
            params: ParamSet::new().with("min_freq", 0).with("max_iterations", 30),
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_search_writes_best_record() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = SearchUseCase::new(config(dir.path())).execute().unwrap();

        assert_eq!(outcome.candidates.len(), 2);
        let top = outcome.candidates.iter().map(|c| c.score).fold(f64::MIN, f64::max);
        assert_eq!(outcome.best.score, top);
        assert!(outcome.path.exists());
        assert!(outcome.path.to_string_lossy().ends_with("_best_params.json"));

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&outcome.path).unwrap()).unwrap();
        let saved = ParamSet::from_json(&saved).unwrap();
        assert_eq!(saved, outcome.best.params);
        assert!(saved.iter().any(|(k, v)| k == "min_freq" && v == "0"));
    }

    fn scored(scores: &[f64]) -> Vec<Candidate> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| Candidate { params: ParamSet::new().with("c1", i), score })
            .collect()
    }

    #[test]
    fn test_nan_score_never_wins() {
        let cands = scored(&[f64::NAN, 0.4, 0.7, f64::NAN]);
        assert_eq!(best_candidate(&cands).unwrap().score, 0.7);
    }

    #[test]
    fn test_ties_keep_the_first_candidate() {
        let cands = scored(&[0.2, 0.6, 0.6]);
        let best = best_candidate(&cands).unwrap();
        assert_eq!(best.params, cands[1].params);
    }

    #[test]
    fn test_no_finite_score_has_no_best() {
        assert!(best_candidate(&scored(&[f64::NAN, f64::INFINITY])).is_none());
    }

    #[test]
    fn test_empty_grid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.c2_grid.clear();
        let err = SearchUseCase::new(cfg).execute().unwrap_err();
        assert_eq!(err.downcast_ref::<PipelineError>().map(|e| e.kind()), Some("InvalidInputError"));
    }
}
