// ============================================================
// Layer 2 — Transcribe Use Case
// ============================================================
// Rebuilds a trained recognizer from a checkpoint folder and
// decodes WAV files into phoneme sequences:
//
//   wav → fbank → normalization (saved stats, frozen)
//       → encoder → beam search → ids → phonemes
//
// Special labels (blank / bos / eos) are never reported.

use std::path::Path;

use anyhow::{Context, Result};
use burn::prelude::*;

use crate::data::{audio::read_audio, encoder::LabelEncoder};
use crate::domain::{traits::Transcriber, value::AudioSource};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    frontend::Frontend,
    model::{TransducerModel, UtteranceDecoder},
    search::TransducerBeamSearcher,
    InferBackend,
};

pub struct TranscribeUseCase {
    model:       TransducerModel<InferBackend>,
    frontend:    Frontend,
    searcher:    TransducerBeamSearcher,
    encoder:     LabelEncoder,
    sample_rate: u32,
    device:      <InferBackend as Backend>::Device,
}

impl TranscribeUseCase {
    pub fn new(checkpoint_dir: &Path) -> Result<Self> {
        let ckpt = CheckpointManager::open(checkpoint_dir)?;
        let device: <InferBackend as Backend>::Device = Default::default();

        let hparams = ckpt.load_hparams()?;
        let config = ckpt.load_model_config()?;
        let encoder = ckpt.load_encoder()?;
        if encoder.is_empty() {
            anyhow::bail!("Label encoder in '{}' has no labels", checkpoint_dir.display());
        }
        if encoder.len() != config.vocab_size {
            anyhow::bail!(
                "Label encoder has {} labels but the model was built for {}",
                encoder.len(),
                config.vocab_size,
            );
        }

        let model = ckpt.load_model(config.init::<InferBackend>(&device), &device)?;
        let stats = ckpt.load_norm_stats()?;
        tracing::info!("Loaded recognizer from '{}' ({} labels)", checkpoint_dir.display(), encoder.len());

        Ok(Self {
            model,
            frontend:    hparams.frontend(Some(stats)),
            searcher:    hparams.searcher(),
            encoder,
            sample_rate: hparams.features.sample_rate,
            device,
        })
    }
}

impl Transcriber for TranscribeUseCase {
    fn transcribe(&self, wav_path: &str) -> Result<Vec<String>> {
        let audio = read_audio(&AudioSource::whole(wav_path))
            .with_context(|| format!("Cannot read '{wav_path}'"))?;
        if audio.sample_rate != self.sample_rate {
            anyhow::bail!(
                "'{}' is sampled at {} Hz, the model expects {} Hz",
                wav_path,
                audio.sample_rate,
                self.sample_rate,
            );
        }
        if audio.samples.is_empty() {
            return Ok(Vec::new());
        }

        let (feats, frame_lens) = self
            .frontend
            .features_frozen::<InferBackend>(&[audio.samples.as_slice()], &self.device);
        let encoded = self.model.encode(feats);
        let [_, frames, joint_dim] = encoded.dims();
        let decoder = UtteranceDecoder::new(&self.model, encoded.reshape([frames, joint_dim]), frame_lens[0]);

        let best = self.searcher.decode(&decoder)?;
        tracing::debug!("'{}': score {:.3}, {} labels", wav_path, best.score, best.tokens.len());

        let ids: Vec<usize> = best
            .tokens
            .into_iter()
            .filter(|&id| !self.encoder.is_special(id))
            .collect();
        Ok(self.encoder.decode_sequence(&ids)?)
    }
}
