// ============================================================
// Layer 5 — Feature Front-End
// ============================================================
// Turns a batch of padded waveforms into a normalized feature
// tensor:
//
//   sig [B, max_samples] + sig_lens
//     │  host copy, cut each row at its own length
//     ▼
//   Fbank            → [frames_i][n_mels] per utterance
//     ▼
//   InputNormalization (sentence / global)
//     ▼
//   pad to the longest → feats [B, max_frames, n_mels] + frame_lens
//
// Features are not learned, so the whole front-end runs on the
// host and only the finished tensor enters the graph.

use anyhow::{anyhow, Result};
use burn::prelude::*;

use crate::data::features::{Fbank, FbankConfig, GlobalStats, InputNormalization, NormConfig};

pub struct Frontend {
    fbank: Fbank,
    norm:  InputNormalization,
}

impl Frontend {
    pub fn new(fbank: FbankConfig, norm: NormConfig) -> Self {
        Self { fbank: Fbank::new(fbank), norm: InputNormalization::new(norm) }
    }

    /// Restore normalization statistics saved with a checkpoint.
    pub fn with_stats(fbank: FbankConfig, norm: NormConfig, stats: GlobalStats) -> Self {
        Self { fbank: Fbank::new(fbank), norm: InputNormalization::with_stats(norm, stats) }
    }

    pub fn n_mels(&self) -> usize {
        self.fbank.n_mels()
    }

    pub fn stats(&self) -> &GlobalStats {
        self.norm.stats()
    }

    pub fn should_update(&self, epoch: Option<usize>) -> bool {
        self.norm.should_update(epoch)
    }

    /// Feature frames of an utterance of `n_samples`.
    pub fn num_frames(&self, n_samples: usize) -> usize {
        self.fbank.num_frames(n_samples)
    }

    /// Features for a padded waveform batch.
    pub fn forward<B: Backend>(
        &mut self,
        sig:      &Tensor<B, 2>,
        sig_lens: &[usize],
        update:   bool,
    ) -> Result<(Tensor<B, 3>, Vec<usize>)> {
        let [batch, width] = sig.dims();
        let host: Vec<f32> = sig
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| anyhow!("cannot read waveforms: {e:?}"))?;

        let signals: Vec<&[f32]> = sig_lens
            .iter()
            .take(batch)
            .enumerate()
            .map(|(row, &len)| &host[row * width..row * width + len.min(width)])
            .collect();
        Ok(self.features(&signals, update, &sig.device()))
    }

    /// Features for unpadded host signals.
    pub fn features<B: Backend>(
        &mut self,
        signals: &[&[f32]],
        update:  bool,
        device:  &B::Device,
    ) -> (Tensor<B, 3>, Vec<usize>) {
        let mut feats = self.extract(signals);
        self.norm.normalize(&mut feats, update);
        self.to_tensor(feats, device)
    }

    /// Features with the normalization statistics frozen.
    pub fn features_frozen<B: Backend>(
        &self,
        signals: &[&[f32]],
        device:  &B::Device,
    ) -> (Tensor<B, 3>, Vec<usize>) {
        let mut feats = self.extract(signals);
        self.norm.apply(&mut feats);
        self.to_tensor(feats, device)
    }

    fn extract(&self, signals: &[&[f32]]) -> Vec<Vec<Vec<f32>>> {
        signals.iter().map(|s| self.fbank.compute(s)).collect()
    }

    fn to_tensor<B: Backend>(
        &self,
        feats:  Vec<Vec<Vec<f32>>>,
        device: &B::Device,
    ) -> (Tensor<B, 3>, Vec<usize>) {
        let n_mels = self.fbank.n_mels();
        let frame_lens: Vec<usize> = feats.iter().map(Vec::len).collect();
        let max_frames = frame_lens.iter().copied().max().unwrap_or(0).max(1);

        let mut flat = vec![0.0f32; feats.len() * max_frames * n_mels];
        for (b, utt) in feats.iter().enumerate() {
            for (t, frame) in utt.iter().enumerate() {
                let start = (b * max_frames + t) * n_mels;
                flat[start..start + n_mels].copy_from_slice(frame);
            }
        }

        let tensor = Tensor::<B, 3>::from_data(
            TensorData::new(flat, [feats.len(), max_frames, n_mels]),
            device,
        );
        (tensor, frame_lens)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::data::features::NormType;

    type TestBackend = NdArray;

    #[test]
    fn test_padded_batch_to_features() {
        let device = Default::default();
        let mut frontend = Frontend::new(FbankConfig::default(), NormConfig::default());

        let mut rows = vec![0.1f32; 3200];
        rows.extend(vec![0.2f32; 1600]);
        rows.extend(vec![0.0f32; 1600]);
        let sig = Tensor::<TestBackend, 1>::from_floats(rows.as_slice(), &device).reshape([2, 3200]);

        let (feats, lens) = frontend.forward(&sig, &[3200, 1600], true).unwrap();
        assert_eq!(lens, vec![21, 11]);
        assert_eq!(feats.dims(), [2, 21, 40]);
        assert_eq!(frontend.stats().count, 32);
    }

    #[test]
    fn test_eval_does_not_touch_stats() {
        let device = Default::default();
        let mut frontend = Frontend::new(
            FbankConfig::default(),
            NormConfig { norm_type: NormType::Global, ..NormConfig::default() },
        );
        let signal = vec![0.3f32; 800];
        let _ = frontend.features::<TestBackend>(&[&signal], false, &device);
        assert_eq!(frontend.stats().count, 0);
        assert_eq!(frontend.num_frames(800), 6);
    }

    #[test]
    fn test_frozen_features_use_saved_stats() {
        let device = Default::default();
        let norm = NormConfig { norm_type: NormType::Global, ..NormConfig::default() };
        let mut trained = Frontend::new(FbankConfig::default(), norm.clone());
        let signal = vec![0.3f32; 1600];
        let (a, _) = trained.features::<TestBackend>(&[&signal], true, &device);

        let restored = Frontend::with_stats(FbankConfig::default(), norm, trained.stats().clone());
        let (b, lens) = restored.features_frozen::<TestBackend>(&[&signal], &device);
        assert_eq!(lens, vec![11]);
        let a: Vec<f32> = a.into_data().convert::<f32>().to_vec().unwrap();
        let b: Vec<f32> = b.into_data().convert::<f32>().to_vec().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-4);
        }
    }
}
