// ============================================================
// Layer 4 — Transducer Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<TransducerSample>
// into padded tensors.
//
// Utterances differ in length (both audio and transcript), so
// every field is right-padded to the longest item in the batch
// and the true lengths travel alongside:
//
//   sig              [N, max_samples]        padded with 0.0
//   phn_encoded      [N, max_labels]         padded with 0 (blank)
//   phn_encoded_bos  [N, max_labels + 1]     padded with 0 (blank)
//
// Padding values never reach the loss: the transducer lattice
// of each utterance is cut at its own (frames, labels) lengths.
//
// Reference: Burn Book §4 (Batcher)

use anyhow::{anyhow, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::TransducerSample;

// ─── TransducerBatch ──────────────────────────────────────────────────────────
/// A padded batch of utterances.
#[derive(Debug, Clone)]
pub struct TransducerBatch<B: Backend> {
    /// Utterance ids, in batch order
    pub ids: Vec<String>,

    /// Waveforms — shape: [batch_size, max_samples]
    pub sig: Tensor<B, 2>,

    /// Number of real samples per row of `sig`
    pub sig_lens: Vec<usize>,

    /// Target label ids — shape: [batch_size, max_labels]
    pub phn_encoded: Tensor<B, 2, Int>,

    /// Number of real labels per row of `phn_encoded`
    pub phn_lens: Vec<usize>,

    /// Prediction network input `[bos] + labels` — shape: [batch_size, max_labels + 1]
    pub phn_encoded_bos: Tensor<B, 2, Int>,
}

impl<B: Backend> TransducerBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.ids.len()
    }

    /// The unpadded target sequences, as plain ids.
    pub fn targets(&self) -> Result<Vec<Vec<usize>>> {
        let [_, width] = self.phn_encoded.dims();
        let flat: Vec<i64> = self
            .phn_encoded
            .clone()
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| anyhow!("Cannot read label tensor: {e:?}"))?;
        self.phn_lens
            .iter()
            .enumerate()
            .map(|(row, &len)| {
                if len > width {
                    anyhow::bail!("Label length {} of row {} exceeds the padded width {}", len, row, width);
                }
                let start = row * width;
                let labels = flat
                    .get(start..start + len)
                    .ok_or_else(|| anyhow!("Label tensor has no row {}", row))?;
                Ok(labels.iter().map(|&x| x as usize).collect::<Vec<_>>())
            })
            .collect()
    }
}

// ─── TransducerBatcher ────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct TransducerBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> TransducerBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// Right-pad `rows` to a common width and flatten them row-major.
fn pad_rows<T: Copy>(rows: &[&[T]], pad: T) -> (Vec<T>, usize) {
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0).max(1);
    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in rows {
        flat.extend_from_slice(row);
        flat.extend(std::iter::repeat(pad).take(width - row.len()));
    }
    (flat, width)
}

impl<B: Backend> Batcher<TransducerSample, TransducerBatch<B>> for TransducerBatcher<B> {
    fn batch(&self, items: Vec<TransducerSample>) -> TransducerBatch<B> {
        let batch_size = items.len();

        // ── Waveforms ─────────────────────────────────────────────────────────
        let sig_rows: Vec<&[f32]> = items.iter().map(|s| s.sig.as_slice()).collect();
        let (sig_flat, max_samples) = pad_rows(&sig_rows, 0.0f32);
        let sig = Tensor::<B, 1>::from_floats(sig_flat.as_slice(), &self.device)
            .reshape([batch_size, max_samples]);

        // ── Labels ────────────────────────────────────────────────────────────
        // Burn Int tensors are built from i32 slices
        let phn: Vec<Vec<i32>> = items
            .iter()
            .map(|s| s.phn_encoded.iter().map(|&x| x as i32).collect())
            .collect();
        let phn_rows: Vec<&[i32]> = phn.iter().map(Vec::as_slice).collect();
        let (phn_flat, max_labels) = pad_rows(&phn_rows, 0);
        let phn_encoded = Tensor::<B, 1, Int>::from_ints(phn_flat.as_slice(), &self.device)
            .reshape([batch_size, max_labels]);

        let bos: Vec<Vec<i32>> = items
            .iter()
            .map(|s| s.phn_encoded_bos.iter().map(|&x| x as i32).collect())
            .collect();
        let bos_rows: Vec<&[i32]> = bos.iter().map(Vec::as_slice).collect();
        let (bos_flat, max_bos) = pad_rows(&bos_rows, 0);
        let phn_encoded_bos = Tensor::<B, 1, Int>::from_ints(bos_flat.as_slice(), &self.device)
            .reshape([batch_size, max_bos]);

        TransducerBatch {
            ids: items.iter().map(|s| s.id.clone()).collect(),
            sig,
            sig_lens: items.iter().map(|s| s.sig.len()).collect(),
            phn_encoded,
            phn_lens: items.iter().map(|s| s.phn_encoded.len()).collect(),
            phn_encoded_bos,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn sample(id: &str, n: usize, phn: &[usize]) -> TransducerSample {
        let mut bos = vec![1];
        bos.extend_from_slice(phn);
        TransducerSample {
            id:              id.to_string(),
            sig:             Arc::new(vec![0.5; n]),
            phn_encoded:     phn.to_vec(),
            phn_encoded_bos: bos,
        }
    }

    #[test]
    fn test_pads_to_longest_item() {
        let batcher = TransducerBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![sample("a", 4, &[3, 4, 5]), sample("b", 2, &[6])]);

        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.sig.dims(), [2, 4]);
        assert_eq!(batch.phn_encoded.dims(), [2, 3]);
        assert_eq!(batch.phn_encoded_bos.dims(), [2, 4]);
        assert_eq!(batch.sig_lens, vec![4, 2]);
        assert_eq!(batch.phn_lens, vec![3, 1]);

        let sig: Vec<f32> = batch.sig.into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(&sig[4..], &[0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_targets_drop_padding() {
        let batcher = TransducerBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![sample("a", 1, &[3, 4]), sample("b", 1, &[5])]);
        assert_eq!(batch.targets().unwrap(), vec![vec![3, 4], vec![5]]);
    }

    #[test]
    fn test_targets_reject_lengths_past_the_padding() {
        let batcher = TransducerBatcher::<TestBackend>::new(Default::default());
        let mut batch = batcher.batch(vec![sample("a", 1, &[3, 4]), sample("b", 1, &[5])]);
        batch.phn_lens = vec![2, 3];
        assert!(batch.targets().is_err());
        batch.phn_lens.push(1);
        assert!(batch.targets().is_err());
    }

    #[test]
    fn test_empty_transcript_keeps_a_column() {
        let batcher = TransducerBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![sample("a", 3, &[])]);
        assert_eq!(batch.phn_encoded.dims(), [1, 1]);
        assert_eq!(batch.phn_lens, vec![0]);
        assert_eq!(batch.targets().unwrap(), vec![Vec::<usize>::new()]);
    }
}
