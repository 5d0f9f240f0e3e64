// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `transcribe`
// and all their configurable flags.
//
// Flags only override a few hyperparameters; everything else
// comes from the JSON file given with --hparams (or defaults).
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::hparams::Hyperparams;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the recognizer on a folder with train.json / dev.json
    Train(TrainArgs),

    /// Decode WAV files with a trained checkpoint
    Transcribe(TranscribeArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Folder holding train.json, dev.json and the audio they refer to
    /// (substituted for $data_root in the manifests)
    #[arg(long)]
    pub data_folder: PathBuf,

    /// JSON hyperparameter file; defaults are used when omitted
    #[arg(long)]
    pub hparams: Option<PathBuf>,

    /// Override the number of epochs
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Where to save the checkpoint and metrics.csv
    #[arg(long)]
    pub output_folder: Option<PathBuf>,

    /// Override the loss the final training epoch must stay below
    #[arg(long)]
    pub loss_threshold: Option<f64>,
}

impl TrainArgs {
    /// Hyperparameters from the file, with the flag overrides applied.
    pub fn hyperparams(&self) -> anyhow::Result<Hyperparams> {
        let mut hp = Hyperparams::load_or_default(self.hparams.as_deref())?;
        if let Some(epochs) = self.epochs {
            hp.n_epochs = epochs;
        }
        if let Some(threshold) = self.loss_threshold {
            hp.loss_threshold = Some(threshold);
        }
        hp.validate()?;
        Ok(hp)
    }
}

/// All arguments for the `transcribe` command
#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// Folder written by `train --output-folder`
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// WAV files to decode
    #[arg(required = true)]
    pub wavs: Vec<String>,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_train_flags_override_the_file() {
        let cli = Cli::try_parse_from([
            "rnnt-minimal", "train", "--data-folder", "data", "--epochs", "3", "--loss-threshold", "0.5",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let hp = args.hyperparams().unwrap();
        assert_eq!(hp.n_epochs, 3);
        assert_eq!(hp.loss_threshold, Some(0.5));
        assert_eq!(hp.seed, Hyperparams::default().seed);
    }

    #[test]
    fn test_infinite_threshold_is_rejected() {
        let cli = Cli::try_parse_from([
            "rnnt-minimal", "train", "--data-folder", "data", "--loss-threshold", "inf",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert!(args.hyperparams().is_err());
    }

    #[test]
    fn test_transcribe_needs_a_wav() {
        assert!(Cli::try_parse_from(["rnnt-minimal", "transcribe"]).is_err());
        let cli = Cli::try_parse_from(["rnnt-minimal", "transcribe", "a.wav", "b.wav"]).unwrap();
        let Commands::Transcribe(args) = cli.command else { panic!("expected transcribe") };
        assert_eq!(args.wavs, vec!["a.wav", "b.wav"]);
    }
}
