// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a full training run in order:
//
//   Step 1: Seed the backend                 (Layer 5 - ml)
//   Step 2: Prepare train / valid datasets   (Layer 4 - data)
//   Step 3: Materialize + build dataloaders  (Layer 4 - data)
//   Step 4: Build model + Adam               (Layer 5 - ml)
//   Step 5: Build the Brain                  (Layer 5 - ml)
//   Step 6: fit, then evaluate on valid      (Layer 5 - ml)
//   Step 7: Save the checkpoint              (Layer 6 - infra)
//   Step 8: Check the final training loss
//
// The run only succeeds when the last training-stage loss is
// below `loss_threshold`: on the tiny corpus this recipe is
// meant to overfit.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    grad_clipping::GradientClippingConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, Optimizer},
    prelude::*,
};

use crate::application::hparams::Hyperparams;
use crate::data::{
    batcher::{TransducerBatch, TransducerBatcher},
    dataset::TransducerDataset,
    prep::data_prep,
};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::{
    brain::Brain,
    model::{TransducerConfig, TransducerModel},
    transducer_brain::TransducerBrain,
    TrainBackend,
};

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Average loss of the last training epoch
    pub train_loss: f64,
    /// Average loss of the final evaluation on the valid set
    pub test_loss:  f64,
    pub test_per:   f64,
    pub vocab_size: usize,
    pub epochs:     usize,
}

impl TrainReport {
    pub fn passed(&self, threshold: f64) -> bool {
        self.train_loss < threshold
    }
}

pub struct TrainUseCase {
    data_folder:   PathBuf,
    hparams:       Hyperparams,
    output_folder: Option<PathBuf>,
}

impl TrainUseCase {
    pub fn new(data_folder: impl Into<PathBuf>, hparams: Hyperparams, output_folder: Option<PathBuf>) -> Self {
        Self { data_folder: data_folder.into(), hparams, output_folder }
    }

    /// Run the whole recipe. Errors when the final training loss is
    /// not below the threshold.
    pub fn execute(&self) -> Result<TrainReport> {
        self.hparams.validate()?;
        let report = self.run()?;
        if let Some(threshold) = self.hparams.loss_threshold {
            if !report.passed(threshold) {
                anyhow::bail!(
                    "Final training loss {:.4} is not below the threshold {}",
                    report.train_loss,
                    threshold,
                );
            }
        }
        Ok(report)
    }

    fn run(&self) -> Result<TrainReport> {
        let hp = &self.hparams;
        let device: <TrainBackend as Backend>::Device = Default::default();

        // ── Step 1: Seed ─────────────────────────────────────────────────────
        TrainBackend::seed(hp.seed);

        // ── Step 2: Datasets and label encoder ───────────────────────────────
        let (train, valid, encoder) = data_prep(&self.data_folder, hp)
            .with_context(|| format!("Cannot prepare data from '{}'", self.data_folder.display()))?;
        let vocab_size = encoder.len();
        tracing::info!("Vocabulary: {} labels", vocab_size);

        // ── Step 3: Dataloaders ──────────────────────────────────────────────
        let train_set = TransducerDataset::from_dynamic(&train)?;
        let valid_set = TransducerDataset::from_dynamic(&valid)?;
        tracing::info!("Split: {} train, {} valid", train_set.samples().len(), valid_set.samples().len());

        let train_loader = self.loader(train_set, &device, hp.dataloader.shuffle);
        let valid_loader = self.loader(valid_set, &device, false);

        // ── Step 4: Model and optimizer ──────────────────────────────────────
        let model_config = hp.model_config(vocab_size);
        let model: TransducerModel<TrainBackend> = model_config.init(&device);

        let mut optim_cfg = AdamConfig::new().with_epsilon(hp.optimizer.epsilon);
        if let Some(clip) = hp.optimizer.grad_clip {
            optim_cfg = optim_cfg.with_grad_clipping(Some(GradientClippingConfig::Norm(clip)));
        }
        if let Some(penalty) = hp.optimizer.weight_decay {
            optim_cfg = optim_cfg.with_weight_decay(Some(WeightDecayConfig::new(penalty)));
        }
        let optim = optim_cfg.init::<TrainBackend, TransducerModel<TrainBackend>>();

        // ── Step 5: Brain ────────────────────────────────────────────────────
        let mut brain = TransducerBrain::new(
            model,
            optim,
            hp.optimizer.lr,
            hp.frontend(None),
            hp.loss(),
            hp.searcher(),
            encoder.clone(),
        );
        if let Some(dir) = &self.output_folder {
            brain = brain.with_logger(MetricsLogger::new(dir)?);
        }

        // ── Step 6: Fit and evaluate ─────────────────────────────────────────
        brain.fit(1..=hp.n_epochs, train_loader, Some(valid_loader.clone()))?;
        let test_loss = brain.evaluate(valid_loader)?;
        let train_loss = brain.train_loss().unwrap_or(f64::NAN);

        // ── Step 7: Checkpoint ───────────────────────────────────────────────
        if let Some(dir) = &self.output_folder {
            save_checkpoint(dir, &brain, hp, &model_config)?;
        }

        Ok(TrainReport {
            train_loss,
            test_loss,
            test_per: brain.per_summary().error_rate,
            vocab_size,
            epochs: hp.n_epochs,
        })
    }

    fn loader(
        &self,
        dataset: TransducerDataset,
        device:  &<TrainBackend as Backend>::Device,
        shuffle: bool,
    ) -> Arc<dyn DataLoader<TransducerBatch<TrainBackend>>> {
        let dl = &self.hparams.dataloader;
        let mut builder = DataLoaderBuilder::new(TransducerBatcher::<TrainBackend>::new(device.clone()))
            .batch_size(dl.batch_size.max(1))
            .num_workers(dl.num_workers);
        if shuffle {
            builder = builder.shuffle(self.hparams.seed);
        }
        builder.build(dataset)
    }
}

fn save_checkpoint<O>(
    dir:          &Path,
    brain:        &TransducerBrain<TrainBackend, O>,
    hp:           &Hyperparams,
    model_config: &TransducerConfig,
) -> Result<()>
where
    O: Optimizer<TransducerModel<TrainBackend>, TrainBackend>,
{
    let ckpt = CheckpointManager::new(dir)?;
    ckpt.save_model(brain.modules())?;
    ckpt.save_model_config(model_config)?;
    ckpt.save_hparams(hp)?;
    ckpt.save_encoder(brain.encoder())?;
    ckpt.save_norm_stats(brain.normalization_stats())?;
    tracing::info!("Checkpoint saved to '{}'", ckpt.dir().display());
    Ok(())
}
