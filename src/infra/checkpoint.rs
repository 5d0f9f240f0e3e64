// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores everything `transcribe` needs to rebuild
// a trained recognizer:
//
//   <output_folder>/
//     model.mpk.gz            ← weights (CompactRecorder)
//     model_config.json       ← TransducerConfig, incl. vocab size
//     hparams.json            ← features, normalization, searcher
//     label_encoder.json      ← phoneme ↔ id mapping
//     normalization.json      ← global feature statistics
//
// Weights alone are not enough: the architecture must be
// rebuilt from model_config.json before the record is loaded,
// the same fbank settings and normalization statistics must be
// applied to new audio, and decoded ids only mean something
// through the encoder that produced them.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::application::hparams::Hyperparams;
use crate::data::encoder::LabelEncoder;
use crate::data::features::GlobalStats;
use crate::ml::model::{TransducerConfig, TransducerModel};

const MODEL_FILE:    &str = "model";
const CONFIG_FILE:   &str = "model_config.json";
const HPARAMS_FILE:  &str = "hparams.json";
const ENCODER_FILE:  &str = "label_encoder.json";
const NORM_FILE:     &str = "normalization.json";

/// Manages saving and loading of a trained recognizer.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create checkpoint folder '{}'", dir.display()))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    /// Open an existing checkpoint folder.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            anyhow::bail!("Checkpoint folder '{}' does not exist. Have you run 'train' with --output-folder?", dir.display());
        }
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ─── Weights ─────────────────────────────────────────────────────────────

    pub fn save_model<B: Backend>(&self, model: &TransducerModel<B>) -> Result<()> {
        let path = self.dir.join(MODEL_FILE);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save model to '{}'", path.display()))?;
        tracing::debug!("Saved model weights to '{}'", path.display());
        Ok(())
    }

    /// Load saved weights into a model of the same architecture.
    pub fn load_model<B: Backend>(
        &self,
        model:  TransducerModel<B>,
        device: &B::Device,
    ) -> Result<TransducerModel<B>> {
        let path = self.dir.join(MODEL_FILE);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load model weights from '{}'", path.display()))?;
        Ok(model.load_record(record))
    }

    // ─── Configuration ───────────────────────────────────────────────────────

    pub fn save_model_config(&self, config: &TransducerConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        config
            .save(&path)
            .with_context(|| format!("Cannot write model config to '{}'", path.display()))
    }

    pub fn load_model_config(&self) -> Result<TransducerConfig> {
        let path = self.dir.join(CONFIG_FILE);
        TransducerConfig::load(&path)
            .with_context(|| format!("Cannot read model config from '{}'", path.display()))
    }

    pub fn save_hparams(&self, hparams: &Hyperparams) -> Result<()> {
        hparams.save(&self.dir.join(HPARAMS_FILE))
    }

    pub fn load_hparams(&self) -> Result<Hyperparams> {
        Hyperparams::load(&self.dir.join(HPARAMS_FILE))
    }

    // ─── Labels and normalization ────────────────────────────────────────────

    pub fn save_encoder(&self, encoder: &LabelEncoder) -> Result<()> {
        Ok(encoder.save(&self.dir.join(ENCODER_FILE))?)
    }

    pub fn load_encoder(&self) -> Result<LabelEncoder> {
        Ok(LabelEncoder::load(&self.dir.join(ENCODER_FILE))?)
    }

    pub fn save_norm_stats(&self, stats: &GlobalStats) -> Result<()> {
        let path = self.dir.join(NORM_FILE);
        fs::write(&path, serde_json::to_string(stats)?)
            .with_context(|| format!("Cannot write normalization stats to '{}'", path.display()))
    }

    pub fn load_norm_stats(&self) -> Result<GlobalStats> {
        let path = self.dir.join(NORM_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read normalization stats from '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}
