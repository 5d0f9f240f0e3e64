//! Synthetic corpus for tests.
//!
//! Each phoneme is rendered as a 100 ms tone at its own frequency
//! ("sil" is silence with a little deterministic noise), so the
//! label sequence is recoverable from the spectrum and a small model
//! can overfit it within a few epochs.

use std::{fs, path::Path};

use crate::data::audio::write_wav;
use crate::data::error::{DataError, Result};

pub const SAMPLE_RATE: u32 = 16000;
const SEGMENT: usize = 1600;

pub const TRAIN: &[(&str, &str)] = &[
    ("spk1_snt1", "sil aa b sil"),
    ("spk1_snt2", "sil b iy aa sil"),
    ("spk2_snt1", "sil iy aa sil"),
    ("spk2_snt2", "sil aa b iy sil"),
];

pub const DEV: &[(&str, &str)] = &[
    ("spk3_snt1", "sil b aa sil"),
    ("spk3_snt2", "sil iy uw sil"),
];

fn frequency(phoneme: &str) -> Option<f32> {
    match phoneme {
        "aa" => Some(440.0),
        "b"  => Some(1200.0),
        "iy" => Some(2500.0),
        "uw" => Some(3600.0),
        _ => None,
    }
}

/// Render a phoneme string as audio.
pub fn synthesize(phn: &str) -> Vec<f32> {
    let mut samples = Vec::with_capacity(SEGMENT * 6);
    let mut noise: u32 = 12345;
    for phoneme in phn.split_whitespace() {
        for i in 0..SEGMENT {
            let sample = match frequency(phoneme) {
                Some(f) => {
                    0.5 * (2.0 * std::f32::consts::PI * f * i as f32 / SAMPLE_RATE as f32).sin()
                }
                None => {
                    noise = noise.wrapping_mul(1_103_515_245).wrapping_add(12345);
                    ((noise >> 16) as f32 / 32768.0 - 1.0) * 0.001
                }
            };
            samples.push(sample);
        }
    }
    samples
}

/// Write WAVs plus `train.json` and `dev.json` into `dir`.
/// Manifests refer to the audio through `$data_root`.
pub fn write_corpus(dir: &Path) -> Result<()> {
    for (name, entries) in [("train.json", TRAIN), ("dev.json", DEV)] {
        let mut manifest = serde_json::Map::new();
        for (id, phn) in entries {
            write_wav(&dir.join(format!("{id}.wav")), &synthesize(phn), SAMPLE_RATE)?;
            let length = (phn.split_whitespace().count() * SEGMENT) as f64 / SAMPLE_RATE as f64;
            manifest.insert(
                id.to_string(),
                serde_json::json!({
                    "wav": format!("$data_root/{id}.wav"),
                    "length": length,
                    "phn": phn,
                }),
            );
        }
        let path = dir.join(name);
        let json = serde_json::to_string_pretty(&manifest).map_err(|source| DataError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| DataError::Io {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
