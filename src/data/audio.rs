//! WAV reading for the audio pipeline.
//!
//! Integer and float WAVs are both accepted and scaled to `[-1, 1]`.
//! Multichannel files are averaged down to mono, and a manifest may
//! select a `[start, stop)` sample range instead of the whole file.

use std::path::Path;

use crate::data::error::{DataError, Result};
use crate::domain::value::AudioSource;

/// Mono samples and their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Audio {
    pub samples:     Vec<f32>,
    pub sample_rate: u32,
}

/// Read the audio described by `source`.
pub fn read_audio(source: &AudioSource) -> Result<Audio> {
    let audio_err = |reason: String| DataError::Audio { path: source.file.clone(), reason };

    let reader = hound::WavReader::open(Path::new(&source.file))
        .map_err(|e| audio_err(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| audio_err(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| audio_err(e.to_string()))?
        }
    };

    let mono: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    let start = source.start.unwrap_or(0);
    let stop  = source.stop.unwrap_or(mono.len());
    if start > stop || stop > mono.len() {
        return Err(audio_err(format!(
            "segment {start}..{stop} outside of {} samples",
            mono.len()
        )));
    }

    Ok(Audio {
        samples:     mono[start..stop].to_vec(),
        sample_rate: spec.sample_rate,
    })
}

/// Write mono f32 samples as a 16-bit PCM WAV (test fixtures).
#[cfg(test)]
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels:        1,
        sample_rate,
        bits_per_sample: 16,
        sample_format:   hound::SampleFormat::Int,
    };
    let err = |e: hound::Error| DataError::Audio {
        path:   path.display().to_string(),
        reason: e.to_string(),
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(err)?;
    for &s in samples {
        writer
            .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .map_err(err)?;
    }
    writer.finalize().map_err(err)
}
