// ============================================================
// Layer 5 — Brain (generic training loop)
// ============================================================
// A Brain is anything that can
//
//   1. compute_forward      batch → predictions
//   2. compute_objectives   predictions + batch → loss
//   3. step                 loss → backward + optimiser update
//
// and optionally react to stage boundaries. The provided
// methods drive those hooks in a fixed order:
//
//   fit(epochs, train, valid):
//     for epoch in epochs:
//       on_stage_start(Train, epoch)
//       for batch in train: fit_batch      (forward → loss → step)
//       on_stage_end(Train, avg_loss, epoch)
//       on_stage_start(Valid, epoch)
//       for batch in valid: evaluate_batch (forward → loss)
//       on_stage_end(Valid, avg_loss, epoch)
//
//   evaluate(test):
//     on_stage_start(Test, None) → batches → on_stage_end(Test, avg, None)
//
// The stage loss handed to on_stage_end is the running
// average of the per-batch losses.
//
// Any error from a hook aborts the loop and propagates.

use std::{ops::RangeInclusive, sync::Arc};

use anyhow::Result;
use burn::{
    data::dataloader::DataLoader,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::domain::stage::Stage;

/// Incremental mean, so a long stage never sums huge values.
pub fn update_average(avg: f64, value: f64, step: usize) -> f64 {
    avg + (value - avg) / step as f64
}

pub trait Brain {
    type Backend: AutodiffBackend;
    type Batch: Send + 'static;
    type Predictions;

    fn compute_forward(&mut self, batch: &Self::Batch, stage: Stage) -> Result<Self::Predictions>;

    fn compute_objectives(
        &mut self,
        predictions: Self::Predictions,
        batch:       &Self::Batch,
        stage:       Stage,
    ) -> Result<Tensor<Self::Backend, 1>>;

    /// Backward pass and parameter update.
    fn step(&mut self, loss: Tensor<Self::Backend, 1>) -> Result<()>;

    fn on_stage_start(&mut self, _stage: Stage, _epoch: Option<usize>) -> Result<()> {
        Ok(())
    }

    fn on_stage_end(&mut self, _stage: Stage, _stage_loss: f64, _epoch: Option<usize>) -> Result<()> {
        Ok(())
    }

    // ─── Provided ────────────────────────────────────────────────────────────

    fn fit_batch(&mut self, batch: &Self::Batch) -> Result<f64> {
        let predictions = self.compute_forward(batch, Stage::Train)?;
        let loss = self.compute_objectives(predictions, batch, Stage::Train)?;
        let value = loss.clone().into_scalar().elem::<f64>();
        self.step(loss)?;
        Ok(value)
    }

    fn evaluate_batch(&mut self, batch: &Self::Batch, stage: Stage) -> Result<f64> {
        let predictions = self.compute_forward(batch, stage)?;
        let loss = self.compute_objectives(predictions, batch, stage)?;
        Ok(loss.into_scalar().elem::<f64>())
    }

    /// Train for every epoch in `epochs`, validating after each one.
    fn fit(
        &mut self,
        epochs: RangeInclusive<usize>,
        train:  Arc<dyn DataLoader<Self::Batch>>,
        valid:  Option<Arc<dyn DataLoader<Self::Batch>>>,
    ) -> Result<()> {
        for epoch in epochs {
            self.on_stage_start(Stage::Train, Some(epoch))?;
            let mut avg = 0.0;
            let mut step = 0;
            for batch in train.iter() {
                step += 1;
                let loss = self.fit_batch(&batch)?;
                avg = update_average(avg, loss, step);
                tracing::debug!("epoch {} batch {}: loss {:.4}", epoch, step, loss);
            }
            self.on_stage_end(Stage::Train, avg, Some(epoch))?;

            if let Some(valid) = &valid {
                self.run_eval_stage(valid.as_ref(), Stage::Valid, Some(epoch))?;
            }
        }
        Ok(())
    }

    /// One pass over `test` without gradients. Returns the average loss.
    fn evaluate(&mut self, test: Arc<dyn DataLoader<Self::Batch>>) -> Result<f64> {
        self.run_eval_stage(test.as_ref(), Stage::Test, None)
    }

    fn run_eval_stage(
        &mut self,
        loader: &dyn DataLoader<Self::Batch>,
        stage:  Stage,
        epoch:  Option<usize>,
    ) -> Result<f64> {
        self.on_stage_start(stage, epoch)?;
        let mut avg = 0.0;
        let mut step = 0;
        for batch in loader.iter() {
            step += 1;
            let loss = self.evaluate_batch(&batch, stage)?;
            avg = update_average(avg, loss, step);
        }
        self.on_stage_end(stage, avg, epoch)?;
        Ok(avg)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        data::{
            dataloader::{batcher::Batcher, DataLoaderBuilder},
            dataset::InMemDataset,
        },
    };

    type TestBackend = Autodiff<NdArray>;

    #[derive(Clone)]
    struct SumBatcher;

    impl Batcher<f32, f32> for SumBatcher {
        fn batch(&self, items: Vec<f32>) -> f32 {
            items.iter().sum()
        }
    }

    /// Loss of a batch is the batch value itself.
    #[derive(Default)]
    struct RecordingBrain {
        events: Vec<String>,
        steps:  usize,
    }

    impl Brain for RecordingBrain {
        type Backend = TestBackend;
        type Batch = f32;
        type Predictions = f32;

        fn compute_forward(&mut self, batch: &f32, stage: Stage) -> Result<f32> {
            self.events.push(format!("forward {stage}"));
            Ok(*batch)
        }

        fn compute_objectives(&mut self, p: f32, _batch: &f32, _stage: Stage) -> Result<Tensor<TestBackend, 1>> {
            Ok(Tensor::from_floats([p], &Default::default()))
        }

        fn step(&mut self, _loss: Tensor<TestBackend, 1>) -> Result<()> {
            self.steps += 1;
            Ok(())
        }

        fn on_stage_start(&mut self, stage: Stage, epoch: Option<usize>) -> Result<()> {
            self.events.push(format!("start {stage} {epoch:?}"));
            Ok(())
        }

        fn on_stage_end(&mut self, stage: Stage, loss: f64, epoch: Option<usize>) -> Result<()> {
            self.events.push(format!("end {stage} {loss:.1} {epoch:?}"));
            Ok(())
        }
    }

    fn loader(values: Vec<f32>) -> Arc<dyn DataLoader<f32>> {
        DataLoaderBuilder::new(SumBatcher)
            .batch_size(1)
            .build(InMemDataset::new(values))
    }

    #[test]
    fn test_hook_order_and_average() {
        let mut brain = RecordingBrain::default();
        brain.fit(1..=2, loader(vec![1.0, 3.0]), Some(loader(vec![5.0]))).unwrap();

        assert_eq!(brain.steps, 4);
        let starts_and_ends: Vec<&String> = brain
            .events
            .iter()
            .filter(|e| !e.starts_with("forward"))
            .collect();
        assert_eq!(
            starts_and_ends,
            vec![
                "start TRAIN Some(1)",
                "end TRAIN 2.0 Some(1)",
                "start VALID Some(1)",
                "end VALID 5.0 Some(1)",
                "start TRAIN Some(2)",
                "end TRAIN 2.0 Some(2)",
                "start VALID Some(2)",
                "end VALID 5.0 Some(2)",
            ]
        );
    }

    #[test]
    fn test_evaluate_runs_test_stage_without_steps() {
        let mut brain = RecordingBrain::default();
        let avg = brain.evaluate(loader(vec![2.0, 4.0, 6.0])).unwrap();
        assert!((avg - 4.0).abs() < 1e-9);
        assert_eq!(brain.steps, 0);
        assert_eq!(brain.events.first().unwrap(), "start TEST None");
        assert_eq!(brain.events.last().unwrap(), "end TEST 4.0 None");
    }

    #[test]
    fn test_update_average() {
        let mut avg = 0.0;
        for (i, v) in [2.0, 4.0, 9.0].iter().enumerate() {
            avg = update_average(avg, *v, i + 1);
        }
        assert!((avg - 5.0).abs() < 1e-12);
    }
}
