// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`      — trains the recognizer, exits non-zero when
//                     the final training loss misses the threshold
//   2. `transcribe` — loads a checkpoint and decodes WAV files
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, TrainArgs, TranscribeArgs};

use crate::domain::traits::Transcriber;

/// The main CLI struct — clap reads the fields and generates
/// argument parsing code automatically via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "rnnt-minimal",
    version = "0.1.0",
    about = "Train a tiny RNN-Transducer phoneme recognizer, then transcribe WAV files."
)]
pub struct Cli {
    /// The subcommand to run (train or transcribe)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)      => run_train(args),
            Commands::Transcribe(args) => run_transcribe(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let hparams = args.hyperparams()?;
    tracing::info!(
        "Training for {} epochs on '{}'",
        hparams.n_epochs,
        args.data_folder.display()
    );

    let report = TrainUseCase::new(args.data_folder, hparams, args.output_folder).execute()?;
    println!(
        "Training complete after {} epochs: train loss {:.4}, test loss {:.4}, test PER {:.2}",
        report.epochs, report.train_loss, report.test_loss, report.test_per,
    );
    Ok(())
}

fn run_transcribe(args: TranscribeArgs) -> Result<()> {
    use crate::application::transcribe_use_case::TranscribeUseCase;

    let recognizer = TranscribeUseCase::new(&args.checkpoint_dir)?;
    for wav in &args.wavs {
        let labels = recognizer.transcribe(wav)?;
        println!("{wav}: {}", labels.join(" "));
    }
    Ok(())
}
