// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the five subcommands and all their configurable flags:
//
//   validate       — repeated CRF validation
//   evaluate       — one CRF split with error analysis tables
//   search         — c1 × c2 grid search for the CRF
//   bert           — transformer train / validate / test
//   bert-validate  — repeated transformer validation
//
// Flag groups shared by several commands (windows, parameter
// overrides, transformer hyperparameters) are flattened structs.
//
// clap's derive macros generate help text, error messages for
// missing args and type conversion.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::bert_use_case::BertRunConfig;
use crate::application::evaluate_use_case::EvaluateConfig;
use crate::application::search_use_case::SearchConfig;
use crate::application::validate_use_case::{EstimatorKind, ValidateConfig};
use crate::domain::document::SeqConfig;
use crate::domain::error::PipelineError;
use crate::domain::params::ParamSet;
use crate::eval::harness::{RetainArtifacts, ValidationConfig};
use crate::ml::bert::trainer::BertConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Repeated document-grouped validation of the CRF
    Validate(ValidateArgs),

    /// Fit the CRF on one split and export prediction tables
    Evaluate(EvaluateArgs),

    /// Grid search over c1 × c2, saving the best parameters
    Search(SearchArgs),

    /// Train the transformer with a validation split, then test it
    Bert(BertArgs),

    /// Repeated document-grouped validation of the transformer
    BertValidate(BertValidateArgs),
}

// ─── Shared flag groups ──────────────────────────────────────────────────────

/// Sliding-window shape of the CRF sequences
#[derive(Args, Debug, Clone)]
pub struct SeqArgs {
    /// Sentences per sequence
    #[arg(long, default_value_t = 3)]
    pub seq_len: usize,

    /// Sentences between the starts of consecutive sequences
    #[arg(long, default_value_t = 3)]
    pub step: usize,
}

impl From<SeqArgs> for SeqConfig {
    fn from(a: SeqArgs) -> Self {
        SeqConfig::new(a.seq_len, a.step)
    }
}

/// Estimator hyperparameter overrides
#[derive(Args, Debug, Clone)]
pub struct ParamArgs {
    /// Override one hyperparameter, e.g. `--param c1=0.05` (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Best-params JSON record; --param values win on conflicts
    #[arg(long)]
    pub params_file: Option<PathBuf>,
}

impl ParamArgs {
    fn param_set(&self) -> Result<ParamSet, PipelineError> {
        ParamSet::from_pairs(self.params.iter().map(String::as_str))
    }
}

/// Repetition settings of the validation harness
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Fraction of documents held out for testing in each run
    #[arg(long, default_value_t = 0.3)]
    pub test_fraction: f64,

    /// Number of randomized document splits
    #[arg(long, default_value_t = 10)]
    pub num_runs: usize,

    /// Base seed; run r uses seed + r
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunArgs {
    fn validation(&self, retain: bool) -> ValidationConfig {
        ValidationConfig {
            test_fraction: self.test_fraction,
            num_runs:      self.num_runs,
            seed:          self.seed,
            retain:        if retain { RetainArtifacts::Yes } else { RetainArtifacts::No },
        }
    }
}

/// Transformer model and optimiser settings
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Tokens per sentence including [CLS] and [SEP]
    #[arg(long, default_value_t = 30)]
    pub max_len: usize,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// AdamW learning rate
    #[arg(long, default_value_t = 1e-5)]
    pub lr: f64,

    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f32,

    /// Hidden dimension of the encoder
    #[arg(long, default_value_t = 768)]
    pub hidden_size: usize,

    /// hidden_size must be divisible by num_heads
    #[arg(long, default_value_t = 12)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 12)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 3072)]
    pub intermediate_size: usize,

    /// Width of the classification head's hidden layer
    #[arg(long, default_value_t = 512)]
    pub head_hidden: usize,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Also train the encoder body instead of only the head
    #[arg(long)]
    pub unfreeze_body: bool,

    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f32,

    /// Vocabulary budget when a word-level tokenizer has to be built
    #[arg(long, default_value_t = 30522)]
    pub vocab_size: usize,

    /// Directory for tokenizer, checkpoints, configs and logs
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Encoder record to start from
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
}

impl ModelArgs {
    fn bert_config(&self, seed: Option<u64>) -> BertConfig {
        BertConfig {
            max_len:           self.max_len,
            batch_size:        self.batch_size,
            epochs:            self.epochs,
            lr:                self.lr,
            weight_decay:      self.weight_decay,
            hidden_size:       self.hidden_size,
            num_heads:         self.num_heads,
            num_layers:        self.num_layers,
            intermediate_size: self.intermediate_size,
            head_hidden:       self.head_hidden,
            dropout:           self.dropout,
            freeze_body:       !self.unfreeze_body,
            max_grad_norm:     self.max_grad_norm,
            seed,
        }
    }
}

// ─── validate ────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// JSON document map (document id → features, labels, texts)
    #[arg(long, default_value = "data/docs_map.json")]
    pub docs_map: PathBuf,

    /// Run log, score table and retained predictions
    #[arg(long, default_value = "results")]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub seq: SeqArgs,

    #[command(flatten)]
    pub runs: RunArgs,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Write scores.csv into the output directory
    #[arg(long)]
    pub export: bool,

    /// Keep per-run test ids and predictions (exported with --export)
    #[arg(long)]
    pub retain: bool,
}

impl TryFrom<ValidateArgs> for ValidateConfig {
    type Error = PipelineError;

    fn try_from(a: ValidateArgs) -> Result<Self, Self::Error> {
        Ok(ValidateConfig {
            params:      a.params.param_set()?,
            docs_map:    a.docs_map,
            output_dir:  a.output_dir,
            estimator:   EstimatorKind::Crf,
            seq:         a.seq.into(),
            validation:  a.runs.validation(a.retain),
            params_file: a.params.params_file,
            export:      a.export,
            ..ValidateConfig::default()
        })
    }
}

// ─── evaluate ────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[arg(long, default_value = "data/docs_map.json")]
    pub docs_map: PathBuf,

    /// Directory of `{doc:02}_sent_db.csv` sentence tables
    #[arg(long)]
    pub sent_db_dir: Option<PathBuf>,

    #[arg(long, default_value = "results")]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub seq: SeqArgs,

    #[arg(long, default_value_t = 0.3)]
    pub test_fraction: f64,

    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub params: ParamArgs,
}

impl TryFrom<EvaluateArgs> for EvaluateConfig {
    type Error = PipelineError;

    fn try_from(a: EvaluateArgs) -> Result<Self, Self::Error> {
        Ok(EvaluateConfig {
            params:        a.params.param_set()?,
            docs_map:      a.docs_map,
            sent_db_dir:   a.sent_db_dir,
            output_dir:    a.output_dir,
            seq:           a.seq.into(),
            test_fraction: a.test_fraction,
            seed:          a.seed,
            params_file:   a.params.params_file,
        })
    }
}

// ─── search ──────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct SearchArgs {
    #[arg(long, default_value = "data/docs_map.json")]
    pub docs_map: PathBuf,

    /// Where the best-params record is written
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    #[command(flatten)]
    pub seq: SeqArgs,

    #[arg(long, default_value_t = 0.3)]
    pub test_fraction: f64,

    /// Validation runs per candidate
    #[arg(long, default_value_t = 3)]
    pub num_runs: usize,

    #[arg(long)]
    pub seed: Option<u64>,

    /// L1 strengths to try
    #[arg(long, value_delimiter = ',', default_values_t = [0.01, 0.05, 0.1, 0.5])]
    pub c1: Vec<f64>,

    /// L2 strengths to try
    #[arg(long, value_delimiter = ',', default_values_t = [0.01, 0.05, 0.1, 0.5])]
    pub c2: Vec<f64>,

    /// Parameters fixed across all candidates
    #[command(flatten)]
    pub params: ParamArgs,
}

impl TryFrom<SearchArgs> for SearchConfig {
    type Error = PipelineError;

    fn try_from(a: SearchArgs) -> Result<Self, Self::Error> {
        Ok(SearchConfig {
            params:         a.params.param_set()?,
            docs_map:       a.docs_map,
            checkpoint_dir: a.checkpoint_dir,
            seq:            a.seq.into(),
            validation:     ValidationConfig {
                test_fraction: a.test_fraction,
                num_runs:      a.num_runs,
                seed:          a.seed,
                retain:        RetainArtifacts::No,
            },
            c1_grid:        a.c1,
            c2_grid:        a.c2,
            params_file:    a.params.params_file,
        })
    }
}

// ─── bert ────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct BertArgs {
    #[arg(long, default_value = "data/docs_map.json")]
    pub docs_map: PathBuf,

    /// Fraction of documents held out from training
    #[arg(long, default_value_t = 0.3)]
    pub test_fraction: f64,

    /// Share of the held-out documents used for testing (rest: validation)
    #[arg(long, default_value_t = 0.5)]
    pub val_test_fraction: f64,

    /// Seed of the document split and batch order
    #[arg(long, default_value_t = 2018)]
    pub seed: u64,

    #[command(flatten)]
    pub model: ModelArgs,
}

impl From<BertArgs> for BertRunConfig {
    fn from(a: BertArgs) -> Self {
        BertRunConfig {
            docs_map:          a.docs_map,
            checkpoint_dir:    a.model.checkpoint_dir.clone(),
            pretrained:        a.model.pretrained.clone(),
            test_fraction:     a.test_fraction,
            val_test_fraction: a.val_test_fraction,
            seed:              Some(a.seed),
            vocab_size:        a.model.vocab_size,
            bert:              a.model.bert_config(Some(a.seed)),
        }
    }
}

// ─── bert-validate ───────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct BertValidateArgs {
    #[arg(long, default_value = "data/docs_map.json")]
    pub docs_map: PathBuf,

    #[arg(long, default_value = "results")]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub runs: RunArgs,

    #[command(flatten)]
    pub params: ParamArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long)]
    pub export: bool,

    #[arg(long)]
    pub retain: bool,
}

impl TryFrom<BertValidateArgs> for ValidateConfig {
    type Error = PipelineError;

    fn try_from(a: BertValidateArgs) -> Result<Self, Self::Error> {
        Ok(ValidateConfig {
            params:         a.params.param_set()?,
            docs_map:       a.docs_map,
            output_dir:     a.output_dir,
            estimator:      EstimatorKind::Transformer,
            seq:            SeqConfig::default(),
            validation:     a.runs.validation(a.retain),
            params_file:    a.params.params_file,
            checkpoint_dir: a.model.checkpoint_dir.clone(),
            pretrained:     a.model.pretrained.clone(),
            vocab_size:     a.model.vocab_size,
            bert:           a.model.bert_config(a.runs.seed),
            export:         a.export,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("narrative-crf").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_validate_args_to_config() {
        let Commands::Validate(args) = parse(&[
            "validate", "--seq-len", "5", "--step", "2", "--param", "c1=0.05", "--param", "c2=0.2",
            "--num-runs", "4", "--seed", "7", "--retain",
        ]) else {
            panic!("expected validate");
        };
        let cfg = ValidateConfig::try_from(args).unwrap();
        assert_eq!(cfg.seq, SeqConfig::new(5, 2));
        assert_eq!(cfg.validation.num_runs, 4);
        assert_eq!(cfg.validation.seed, Some(7));
        assert_eq!(cfg.validation.retain, RetainArtifacts::Yes);
        assert_eq!(cfg.params, ParamSet::new().with("c1", "0.05").with("c2", "0.2"));
        assert_eq!(cfg.estimator, EstimatorKind::Crf);
    }

    #[test]
    fn test_malformed_param_is_rejected() {
        let Commands::Evaluate(args) = parse(&["evaluate", "--param", "c1"]) else {
            panic!("expected evaluate");
        };
        let err = EvaluateConfig::try_from(args).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
    }

    #[test]
    fn test_search_grid_is_comma_separated() {
        let Commands::Search(args) = parse(&["search", "--c1", "0.1,0.2", "--c2", "0.3"]) else {
            panic!("expected search");
        };
        let cfg = SearchConfig::try_from(args).unwrap();
        assert_eq!(cfg.c1_grid, vec![0.1, 0.2]);
        assert_eq!(cfg.c2_grid, vec![0.3]);
        assert_eq!(cfg.validation.num_runs, 3);
    }

    #[test]
    fn test_bert_defaults_match_config() {
        let Commands::Bert(args) = parse(&["bert"]) else {
            panic!("expected bert");
        };
        let cfg = BertRunConfig::from(args);
        assert_eq!(cfg.bert, BertConfig { seed: Some(2018), ..BertConfig::default() });
        assert_eq!(cfg.seed, Some(2018));
    }

    #[test]
    fn test_bert_validate_uses_transformer() {
        let Commands::BertValidate(args) = parse(&["bert-validate", "--unfreeze-body", "--max-len", "16"]) else {
            panic!("expected bert-validate");
        };
        let cfg = ValidateConfig::try_from(args).unwrap();
        assert_eq!(cfg.estimator, EstimatorKind::Transformer);
        assert!(!cfg.bert.freeze_body);
        assert_eq!(cfg.bert.max_len, 16);
    }
}
