// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All experiment logic is delegated to Layer 2 (application);
// this layer only converts arguments and prints results.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{BertArgs, BertValidateArgs, Commands, EvaluateArgs, SearchArgs, ValidateArgs};

use crate::eval::harness::ValidationOutcome;
use crate::ml::metrics::ClassificationReport;

#[derive(Parser, Debug)]
#[command(
    name = "narrative-crf",
    version,
    about = "Detect narrative passages in session transcripts with a CRF or a transformer."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Validate(args)     => run_validate(args),
            Commands::Evaluate(args)     => run_evaluate(args),
            Commands::Search(args)       => run_search(args),
            Commands::Bert(args)         => run_bert(args),
            Commands::BertValidate(args) => run_bert_validate(args),
        }
    }
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    use crate::application::validate_use_case::ValidateUseCase;

    let outcome = ValidateUseCase::new(args.try_into()?).execute()?;
    print_scores(&outcome);
    Ok(())
}

fn run_bert_validate(args: BertValidateArgs) -> Result<()> {
    use crate::application::validate_use_case::ValidateUseCase;

    let outcome = ValidateUseCase::new(args.try_into()?).execute()?;
    print_scores(&outcome);
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let cfg: crate::application::evaluate_use_case::EvaluateConfig = args.try_into()?;
    let output_dir = cfg.output_dir.clone();
    let outcome = EvaluateUseCase::new(cfg).execute()?;

    println!("Test documents: {:?}", outcome.test_ids);
    print_report(&outcome.report);
    println!(
        "\n{} sentences, {} errors, {} without a unique sentence row",
        outcome.predictions.all.len(),
        outcome.predictions.errors.len(),
        outcome.unaligned
    );
    println!("Tables written to {}", output_dir.display());
    Ok(())
}

fn run_search(args: SearchArgs) -> Result<()> {
    use crate::application::search_use_case::SearchUseCase;

    let outcome = SearchUseCase::new(args.try_into()?).execute()?;
    println!("{:<40} {:>8}", "params", "mean f1");
    for cand in &outcome.candidates {
        let params: Vec<String> = cand.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!("{:<40} {:>8.4}", params.join(" "), cand.score);
    }
    println!("\nBest ({:.4}) saved to {}", outcome.best.score, outcome.path.display());
    Ok(())
}

fn run_bert(args: BertArgs) -> Result<()> {
    use crate::application::bert_use_case::BertUseCase;

    let outcome = BertUseCase::new(args.into()).execute()?;
    println!("{:>5} {:>10} {:>10}", "epoch", "train", "val");
    for m in &outcome.training.history {
        println!("{:>5} {:>10.4} {:>10.4}", m.epoch, m.train_loss, m.val_loss);
    }
    println!(
        "\nBest epoch {} (val loss {:.4})",
        outcome.training.best_epoch, outcome.training.best_val_loss
    );
    print_report(&outcome.report);
    Ok(())
}

// ─── Output ──────────────────────────────────────────────────────────────────

fn print_scores(outcome: &ValidationOutcome) {
    println!("{:>4} {:>9} {:>9} {:>9}", "run", "f1", "recall", "precision");
    for (run, [f1, recall, precision]) in outcome.score_matrix().into_iter().enumerate() {
        println!("{run:>4} {f1:>9.4} {recall:>9.4} {precision:>9.4}");
    }
    if let Some((mean, std)) = outcome.summary() {
        println!("{:>4} {:>9.4} {:>9.4} {:>9.4}", "mean", mean.f1, mean.recall, mean.precision);
        println!("{:>4} {:>9.4} {:>9.4} {:>9.4}", "std", std.f1, std.recall, std.precision);
    }
}

fn print_report(report: &ClassificationReport) {
    println!("\n{:>12} {:>9} {:>9} {:>9} {:>8}", "", "precision", "recall", "f1", "support");
    for l in &report.labels {
        println!("{:>12} {:>9.3} {:>9.3} {:>9.3} {:>8}", l.label, l.precision, l.recall, l.f1, l.support);
    }
    println!("\n{:>12} {:>9} {:>9} {:>9.3}", "accuracy", "", "", report.accuracy);
    for (name, avg) in [("macro avg", &report.macro_avg), ("weighted avg", &report.weighted_avg)] {
        println!(
            "{:>12} {:>9.3} {:>9.3} {:>9.3} {:>8}",
            name, avg.precision, avg.recall, avg.f1, avg.support
        );
    }
}
