// ============================================================
// Layer 5 — TransducerBrain
// ============================================================
// The Brain for the RNN-Transducer recognizer.
//
// compute_forward:
//   sig → fbank → normalization → TN (encoder + enc_lin)
//   [bos] + labels → PN (emb + LSTM + dec_lin)
//   joint(TN, PN) → log-probabilities [B, T, U+1, V]
//   valid/test also beam-search every utterance from TN
//
// compute_objectives:
//   transducer loss over each utterance's own lattice;
//   valid/test append hypotheses to the PER accumulator
//
// Evaluation stages run on a `valid()` copy of the modules
// (inner backend: no autodiff graph, dropout disabled). The
// copy is taken once per stage in on_stage_start.
//
// Stage reports go to stdout:
//
//   Epoch 3 complete
//   Train loss: 1.27
//   VALID loss: 1.84
//   VALID PER: 33.33

use std::sync::Arc;

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::TransducerBatch;
use crate::data::encoder::LabelEncoder;
use crate::data::features::GlobalStats;
use crate::domain::stage::Stage;
use crate::infra::metrics::{EpochMetrics, ErrorRateStats, ErrorRateSummary, MetricsLogger};
use crate::ml::brain::Brain;
use crate::ml::frontend::Frontend;
use crate::ml::loss::TransducerLoss;
use crate::ml::model::{TransducerModel, UtteranceDecoder};
use crate::ml::search::TransducerBeamSearcher;

/// Output of compute_forward.
pub struct TransducerPredictions<B: Backend> {
    /// [B, T, U+1, V]
    pub log_probs:  Tensor<B, 4>,
    pub frame_lens: Vec<usize>,
    /// Decoded label ids, valid/test only
    pub hyps:       Option<Vec<Vec<usize>>>,
}

pub struct TransducerBrain<B: AutodiffBackend, O: Optimizer<TransducerModel<B>, B>> {
    modules:     TransducerModel<B>,
    optimizer:   O,
    lr:          f64,
    frontend:    Frontend,
    loss:        TransducerLoss,
    searcher:    TransducerBeamSearcher,
    encoder:     Arc<LabelEncoder>,
    per_metrics: ErrorRateStats,
    /// Average loss of the last training stage
    train_loss:  Option<f64>,
    epoch:       Option<usize>,
    eval_model:  Option<TransducerModel<B::InnerBackend>>,
    logger:      Option<MetricsLogger>,
    history:     Vec<EpochMetrics>,
}

impl<B, O> TransducerBrain<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<TransducerModel<B>, B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        modules:   TransducerModel<B>,
        optimizer: O,
        lr:        f64,
        frontend:  Frontend,
        loss:      TransducerLoss,
        searcher:  TransducerBeamSearcher,
        encoder:   Arc<LabelEncoder>,
    ) -> Self {
        Self {
            modules,
            optimizer,
            lr,
            frontend,
            loss,
            searcher,
            encoder,
            per_metrics: ErrorRateStats::new(),
            train_loss:  None,
            epoch:       None,
            eval_model:  None,
            logger:      None,
            history:     Vec::new(),
        }
    }

    /// Also append one CSV row per validated epoch.
    pub fn with_logger(mut self, logger: MetricsLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn train_loss(&self) -> Option<f64> {
        self.train_loss
    }

    pub fn history(&self) -> &[EpochMetrics] {
        &self.history
    }

    pub fn per_summary(&self) -> ErrorRateSummary {
        self.per_metrics.summarize()
    }

    pub fn modules(&self) -> &TransducerModel<B> {
        &self.modules
    }

    pub fn normalization_stats(&self) -> &GlobalStats {
        self.frontend.stats()
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    fn decode_batch(
        &self,
        model:      &TransducerModel<B::InnerBackend>,
        encoded:    Tensor<B::InnerBackend, 3>,
        frame_lens: &[usize],
    ) -> Result<Vec<Vec<usize>>> {
        let [batch, frames, joint_dim] = encoded.dims();
        (0..batch)
            .map(|b| {
                let utterance = encoded
                    .clone()
                    .slice([b..b + 1, 0..frames, 0..joint_dim])
                    .reshape([frames, joint_dim]);
                let decoder = UtteranceDecoder::new(model, utterance, frame_lens[b]);
                Ok(self.searcher.decode(&decoder)?.tokens)
            })
            .collect()
    }
}

impl<B, O> Brain for TransducerBrain<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<TransducerModel<B>, B>,
{
    type Backend = B;
    type Batch = TransducerBatch<B>;
    type Predictions = TransducerPredictions<B>;

    fn compute_forward(&mut self, batch: &TransducerBatch<B>, stage: Stage) -> Result<TransducerPredictions<B>> {
        if stage == Stage::Train {
            let update = self.frontend.should_update(self.epoch);
            let (feats, frame_lens) = self.frontend.forward(&batch.sig, &batch.sig_lens, update)?;
            let out = self.modules.forward(feats, batch.phn_encoded_bos.clone());
            return Ok(TransducerPredictions { log_probs: out.log_probs, frame_lens, hyps: None });
        }

        let model = match self.eval_model.take() {
            Some(model) => model,
            None => self.modules.valid(),
        };
        let sig = batch.sig.clone().inner();
        let (feats, frame_lens) = self.frontend.forward(&sig, &batch.sig_lens, false)?;
        let out = model.forward(feats, batch.phn_encoded_bos.clone().inner());
        let hyps = self.decode_batch(&model, out.encoded, &frame_lens);
        self.eval_model = Some(model);

        Ok(TransducerPredictions {
            log_probs: Tensor::from_inner(out.log_probs),
            frame_lens,
            hyps: Some(hyps?),
        })
    }

    fn compute_objectives(
        &mut self,
        predictions: TransducerPredictions<B>,
        batch:       &TransducerBatch<B>,
        stage:       Stage,
    ) -> Result<Tensor<B, 1>> {
        let targets = batch.targets()?;
        if stage.is_eval() {
            if let Some(hyps) = &predictions.hyps {
                self.per_metrics.append(&batch.ids, hyps, &targets);
            }
        }
        self.loss.forward(predictions.log_probs, &targets, &predictions.frame_lens)
    }

    fn step(&mut self, loss: Tensor<B, 1>) -> Result<()> {
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.modules);
        self.modules = self.optimizer.step(self.lr, self.modules.clone(), grads);
        Ok(())
    }

    fn on_stage_start(&mut self, stage: Stage, epoch: Option<usize>) -> Result<()> {
        self.epoch = epoch;
        if stage.is_eval() {
            self.per_metrics = ErrorRateStats::new();
            self.eval_model = Some(self.modules.valid());
        }
        Ok(())
    }

    fn on_stage_end(&mut self, stage: Stage, stage_loss: f64, epoch: Option<usize>) -> Result<()> {
        if stage == Stage::Train {
            self.train_loss = Some(stage_loss);
            match epoch {
                Some(epoch) => tracing::info!("Epoch {}: train loss {:.4}", epoch, stage_loss),
                None => tracing::info!("Train loss {:.4}", stage_loss),
            }
        }

        if stage == Stage::Valid {
            if let Some(epoch) = epoch {
                let train_loss = self.train_loss.unwrap_or(f64::NAN);
                println!("Epoch {epoch} complete");
                println!("Train loss: {train_loss:.2}");

                let row = EpochMetrics::new(epoch, train_loss, stage_loss, self.per_metrics.summarize().error_rate);
                let best = self.history.iter().map(|m| m.valid_loss).fold(f64::INFINITY, f64::min);
                if row.is_improvement(best) {
                    tracing::info!("Epoch {}: best valid loss so far ({:.4})", epoch, stage_loss);
                }
                if let Some(logger) = &self.logger {
                    logger.log(&row)?;
                }
                self.history.push(row);
            }
        }

        if stage.is_eval() {
            let summary = self.per_metrics.summarize();
            println!("{stage} loss: {stage_loss:.2}");
            println!("{stage} PER: {:.2}", summary.error_rate);
            tracing::debug!(
                "{} PER details: {} ins, {} del, {} sub over {} labels",
                stage,
                summary.insertions,
                summary.deletions,
                summary.substitutions,
                summary.num_ref,
            );
            if let Some(worst) = self.per_metrics.scores().first() {
                tracing::debug!("worst utterance {}: {:.2}", worst.id, worst.error_rate());
            }
            self.eval_model = None;
        }
        Ok(())
    }
}
