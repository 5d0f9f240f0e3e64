// ============================================================
// Layer 2 — Hyperparameters
// ============================================================
// Everything a training run needs to know, in one serialisable
// struct. Read from a JSON file (hparams/transducer.json), every
// section and field has a default so a partial file — or no
// file at all — still yields a complete configuration:
//
//   {
//     "n_epochs": 30,
//     "features":   { "n_mels": 40 },
//     "model":      { "joint_dim": 64 },
//     "optimizer":  { "lr": 0.002 },
//     "searcher":   { "beam_size": 4 }
//   }
//
// The same struct is written next to the checkpoint so that
// `transcribe` rebuilds the exact model that was trained.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::features::{FbankConfig, GlobalStats, NormConfig};
use crate::ml::frontend::Frontend;
use crate::ml::loss::{Reduction, TransducerLoss};
use crate::ml::model::TransducerConfig;
use crate::ml::search::TransducerBeamSearcher;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparams {
    pub seed:           u64,
    pub n_epochs:       usize,
    /// Training must end below this loss for the run to count as a
    /// success; `null` skips the check
    pub loss_threshold: Option<f64>,
    pub blank_index:    usize,
    pub bos_index:      usize,
    pub features:       FbankConfig,
    pub normalize:      NormConfig,
    pub model:          ModelParams,
    pub optimizer:      OptimizerParams,
    pub loss:           LossParams,
    pub searcher:       SearcherParams,
    pub dataloader:     DataloaderParams,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            seed:           1986,
            n_epochs:       30,
            loss_threshold: Some(1.0),
            blank_index:    0,
            bos_index:      1,
            features:       FbankConfig::default(),
            normalize:      NormConfig::default(),
            model:          ModelParams::default(),
            optimizer:      OptimizerParams::default(),
            loss:           LossParams::default(),
            searcher:       SearcherParams::default(),
            dataloader:     DataloaderParams::default(),
        }
    }
}

/// Sizes of the CRDNN encoder, prediction network and joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub cnn_blocks:   usize,
    pub cnn_channels: usize,
    pub cnn_kernel:   usize,
    pub rnn_layers:   usize,
    pub rnn_neurons:  usize,
    pub dnn_neurons:  usize,
    pub emb_dim:      usize,
    pub dec_neurons:  usize,
    pub joint_dim:    usize,
    pub dropout:      f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            cnn_blocks:   1,
            cnn_channels: 16,
            cnn_kernel:   3,
            rnn_layers:   1,
            rnn_neurons:  64,
            dnn_neurons:  64,
            emb_dim:      32,
            dec_neurons:  64,
            joint_dim:    64,
            dropout:      0.15,
        }
    }
}

/// Adam settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    pub lr:            f64,
    pub epsilon:       f32,
    pub weight_decay:  Option<f32>,
    /// Global gradient-norm clip, disabled when `None`
    pub grad_clip:     Option<f32>,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            lr:           2e-3,
            epsilon:      1e-8,
            weight_decay: None,
            grad_clip:    Some(5.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossParams {
    pub reduction: Reduction,
}

impl Default for LossParams {
    fn default() -> Self {
        Self { reduction: Reduction::LabelMean }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearcherParams {
    /// 1 selects greedy decoding
    pub beam_size:            usize,
    pub nbest:                usize,
    pub state_beam:           f32,
    pub expand_beam:          f32,
    pub max_symbols_per_step: usize,
}

impl Default for SearcherParams {
    fn default() -> Self {
        Self {
            beam_size:            4,
            nbest:                1,
            state_beam:           2.3,
            expand_beam:          2.3,
            max_symbols_per_step: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataloaderParams {
    pub batch_size:  usize,
    pub shuffle:     bool,
    pub num_workers: usize,
}

impl Default for DataloaderParams {
    fn default() -> Self {
        Self {
            batch_size:  1,
            shuffle:     true,
            num_workers: 1,
        }
    }
}

impl Hyperparams {
    /// Read hyperparameters from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read hyperparameters from '{}'", path.display()))?;
        let hparams: Self = serde_json::from_str(&json)
            .with_context(|| format!("Malformed hyperparameters in '{}'", path.display()))?;
        hparams
            .validate()
            .with_context(|| format!("Invalid hyperparameters in '{}'", path.display()))?;
        tracing::debug!("Loaded hyperparameters from '{}'", path.display());
        Ok(hparams)
    }

    /// Read `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Cannot write hyperparameters to '{}'", path.display()))?;
        Ok(())
    }

    /// JSON has no infinities, so every float must be finite to survive
    /// a save / load round trip.
    pub fn validate(&self) -> Result<()> {
        if let Some(threshold) = self.loss_threshold {
            if !threshold.is_finite() {
                anyhow::bail!("loss_threshold must be finite, got {threshold}");
            }
        }
        if !(self.optimizer.lr.is_finite() && self.optimizer.lr > 0.0) {
            anyhow::bail!("optimizer.lr must be positive, got {}", self.optimizer.lr);
        }
        Ok(())
    }

    // ─── Builders ────────────────────────────────────────────────────────────

    /// Architecture for `vocab_size` labels over the configured features.
    pub fn model_config(&self, vocab_size: usize) -> TransducerConfig {
        let m = &self.model;
        TransducerConfig::new(self.features.n_mels, vocab_size)
            .with_cnn_blocks(m.cnn_blocks)
            .with_cnn_channels(m.cnn_channels)
            .with_cnn_kernel(m.cnn_kernel)
            .with_rnn_layers(m.rnn_layers)
            .with_rnn_neurons(m.rnn_neurons)
            .with_dnn_neurons(m.dnn_neurons)
            .with_emb_dim(m.emb_dim)
            .with_dec_neurons(m.dec_neurons)
            .with_joint_dim(m.joint_dim)
            .with_dropout(m.dropout)
    }

    pub fn searcher(&self) -> TransducerBeamSearcher {
        let s = &self.searcher;
        TransducerBeamSearcher {
            blank_index:          self.blank_index,
            start_index:          self.bos_index,
            beam_size:            s.beam_size,
            nbest:                s.nbest,
            state_beam:           s.state_beam,
            expand_beam:          s.expand_beam,
            max_symbols_per_step: s.max_symbols_per_step,
        }
    }

    pub fn loss(&self) -> TransducerLoss {
        TransducerLoss::new(self.blank_index, self.loss.reduction)
    }

    /// Feature front-end, optionally restoring saved statistics.
    pub fn frontend(&self, stats: Option<GlobalStats>) -> Frontend {
        match stats {
            Some(stats) => Frontend::with_stats(self.features.clone(), self.normalize.clone(), stats),
            None => Frontend::new(self.features.clone(), self.normalize.clone()),
        }
    }
}
