// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train` — trains a classifier with a UDA / MixMatch loss
//   2. `eval`  — loads a checkpoint and reports accuracy
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvalArgs, TrainArgs};

use crate::application::train_use_case::RunConfig;

#[derive(Parser, Debug)]
#[command(
    name = "uda-mixmatch",
    version = "0.1.0",
    about = "Semi-supervised transformer text classification with UDA and MixMatch losses."
)]
pub struct Cli {
    /// The subcommand to run (train or eval)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Eval(args)  => run_eval(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let cfg = RunConfig::try_from(args)?;
    tracing::info!("Starting training on '{}'", cfg.sup_data.display());

    let summary = TrainUseCase::new(cfg).execute()?;

    match summary.eval_acc {
        Some(acc) => println!("Training complete after {} steps. Eval accuracy: {:.2}%", summary.steps, acc * 100.0),
        None      => println!("Training complete after {} steps. Checkpoint saved.", summary.steps),
    }
    Ok(())
}

fn run_eval(args: EvalArgs) -> Result<()> {
    use crate::application::eval_use_case::EvalUseCase;

    let use_case = EvalUseCase::new(args.checkpoint_dir, args.eval_data, args.use_ema);
    let accuracy = use_case.execute()?;
    println!("Accuracy: {:.2}%", accuracy * 100.0);
    Ok(())
}
