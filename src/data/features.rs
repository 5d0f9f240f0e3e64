//! Filterbank features and input normalization.
//!
//! The front-end follows the usual ASR recipe:
//! - Sample rate: 16000 Hz
//! - FFT size: 400 (25 ms), Hann window of the same length
//! - Hop length: 160 (10 ms)
//! - Mel bins: 40, HTK mel scale, 0–8000 Hz
//! - Centered frames with reflection padding, so an utterance of
//!   `n` samples yields `1 + n / hop` frames
//! - Log compression: `ln(max(power, 1e-10))`
//!
//! Normalization runs after feature extraction, either per sentence or
//! with global statistics accumulated over the training set.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Configuration for the filterbank front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FbankConfig {
    pub sample_rate: u32,
    pub n_fft:       usize,
    pub win_length:  usize,
    pub hop_length:  usize,
    pub n_mels:      usize,
    pub f_min:       f64,
    pub f_max:       f64,
}

impl Default for FbankConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft:       400,
            win_length:  400,
            hop_length:  160,
            n_mels:      40,
            f_min:       0.0,
            f_max:       8000.0,
        }
    }
}

/// Log-mel filterbank extractor.
///
/// Pre-computes the window, FFT plan and mel filterbank on construction.
pub struct Fbank {
    config:     FbankConfig,
    window:     Vec<f64>,
    filterbank: Vec<Vec<f64>>,
    fft:        Arc<dyn rustfft::Fft<f64>>,
}

impl Fbank {
    pub fn new(config: FbankConfig) -> Self {
        let window = padded_hann_window(config.win_length, config.n_fft);
        let filterbank = mel_filterbank(
            config.n_fft,
            config.n_mels,
            config.sample_rate,
            config.f_min,
            config.f_max,
        );
        let fft = FftPlanner::new().plan_fft_forward(config.n_fft);
        Self { config, window, filterbank, fft }
    }

    pub fn n_mels(&self) -> usize {
        self.config.n_mels
    }

    /// Frames produced for `n_samples` samples.
    pub fn num_frames(&self, n_samples: usize) -> usize {
        if n_samples == 0 {
            0
        } else {
            1 + n_samples / self.config.hop_length
        }
    }

    /// Compute `[num_frames][n_mels]` log-mel features.
    pub fn compute(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let num_bins = n_fft / 2 + 1;
        let pad = (n_fft / 2) as isize;
        let len = samples.len() as isize;

        let mut frames = Vec::with_capacity(self.num_frames(samples.len()));
        let mut buffer = vec![Complex::new(0.0f64, 0.0); n_fft];

        for frame_idx in 0..self.num_frames(samples.len()) {
            let start = (frame_idx * hop) as isize - pad;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let idx = reflect_index(start + i as isize, len);
                *slot = Complex::new(samples[idx] as f64 * self.window[i], 0.0);
            }

            self.fft.process(&mut buffer);

            let power: Vec<f64> = buffer[..num_bins].iter().map(|c| c.norm_sqr()).collect();
            let mels = self
                .filterbank
                .iter()
                .map(|filter| {
                    let energy: f64 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                    energy.max(1e-10).ln() as f32
                })
                .collect();
            frames.push(mels);
        }

        frames
    }
}

/// Mirror an out-of-range index back into `0..len` (no edge repeat).
fn reflect_index(idx: isize, len: isize) -> usize {
    if len <= 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let mut i = idx.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    i as usize
}

/// Periodic Hann window of `win_length`, centered inside `n_fft` zeros.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f64> {
    let win_length = win_length.min(n_fft);
    let offset = (n_fft - win_length) / 2;
    let mut window = vec![0.0; n_fft];
    for i in 0..win_length {
        window[offset + i] =
            0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / win_length as f64).cos();
    }
    window
}

pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters, `[n_mels][n_fft / 2 + 1]`.
fn mel_filterbank(
    n_fft: usize,
    n_mels: usize,
    sample_rate: u32,
    f_min: f64,
    f_max: f64,
) -> Vec<Vec<f64>> {
    let num_bins = n_fft / 2 + 1;
    let bin_hz: Vec<f64> = (0..num_bins)
        .map(|i| i as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_min = hz_to_mel(f_min);
    let mel_max = hz_to_mel(f_max);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            bin_hz
                .iter()
                .map(|&f| {
                    let up = (f - lo) / (center - lo);
                    let down = (hi - f) / (hi - center);
                    up.min(down).max(0.0)
                })
                .collect()
        })
        .collect()
}

// ─── Input normalization ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormType {
    /// Mean/std of each utterance on its own
    Sentence,
    /// Running mean/std over the training data
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormConfig {
    pub norm_type:          NormType,
    /// Global statistics stop changing after this epoch
    pub update_until_epoch: usize,
    pub std_floor:          f64,
}

impl Default for NormConfig {
    fn default() -> Self {
        Self {
            norm_type:          NormType::Global,
            update_until_epoch: 3,
            std_floor:          1e-5,
        }
    }
}

/// Accumulated first and second moments per feature dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub sum:    Vec<f64>,
    pub sum_sq: Vec<f64>,
    pub count:  u64,
}

impl GlobalStats {
    fn update(&mut self, frames: &[Vec<f32>]) {
        for frame in frames {
            if self.sum.len() != frame.len() {
                self.sum = vec![0.0; frame.len()];
                self.sum_sq = vec![0.0; frame.len()];
                self.count = 0;
            }
            for (d, &x) in frame.iter().enumerate() {
                self.sum[d] += x as f64;
                self.sum_sq[d] += (x as f64) * (x as f64);
            }
            self.count += 1;
        }
    }

    fn mean_std(&self, floor: f64) -> (Vec<f64>, Vec<f64>) {
        let n = self.count.max(1) as f64;
        let mean: Vec<f64> = self.sum.iter().map(|s| s / n).collect();
        let std = self
            .sum_sq
            .iter()
            .zip(&mean)
            .map(|(sq, m)| (sq / n - m * m).max(0.0).sqrt().max(floor))
            .collect();
        (mean, std)
    }
}

pub struct InputNormalization {
    config: NormConfig,
    stats:  GlobalStats,
}

impl InputNormalization {
    pub fn new(config: NormConfig) -> Self {
        Self { config, stats: GlobalStats::default() }
    }

    /// Restore previously accumulated global statistics.
    pub fn with_stats(config: NormConfig, stats: GlobalStats) -> Self {
        Self { config, stats }
    }

    pub fn stats(&self) -> &GlobalStats {
        &self.stats
    }

    /// Whether a training batch in `epoch` should move the statistics.
    pub fn should_update(&self, epoch: Option<usize>) -> bool {
        self.config.norm_type == NormType::Global
            && epoch.map_or(true, |e| e <= self.config.update_until_epoch)
    }

    /// Normalize a batch of utterances in place, first folding the
    /// batch into the global statistics when `update` is set.
    pub fn normalize(&mut self, batch: &mut [Vec<Vec<f32>>], update: bool) {
        if update && self.config.norm_type == NormType::Global {
            for utt in batch.iter() {
                self.stats.update(utt);
            }
        }
        self.apply(batch);
    }

    /// Normalize with the current statistics, leaving them untouched.
    pub fn apply(&self, batch: &mut [Vec<Vec<f32>>]) {
        let dim = batch.iter().flatten().next().map(Vec::len);
        let global_ready = self.config.norm_type == NormType::Global
            && self.stats.count > 0
            && dim.is_some_and(|d| d == self.stats.sum.len());

        if global_ready {
            let moments = self.stats.mean_std(self.config.std_floor);
            for utt in batch.iter_mut() {
                standardize(utt, &moments);
            }
            return;
        }

        if self.config.norm_type == NormType::Global {
            // nothing learned yet: fall back to per-sentence stats
            tracing::debug!("global normalization has no usable statistics");
        }
        for utt in batch.iter_mut() {
            let mut stats = GlobalStats::default();
            stats.update(utt);
            standardize(utt, &stats.mean_std(self.config.std_floor));
        }
    }
}

fn standardize(frames: &mut [Vec<f32>], (mean, std): &(Vec<f64>, Vec<f64>)) {
    for frame in frames.iter_mut() {
        for (d, x) in frame.iter_mut().enumerate() {
            *x = ((*x as f64 - mean[d]) / std[d]) as f32;
        }
    }
}
