// ============================================================
// Layer 6 — Audio Preparation
// ============================================================
// Turns an uploaded audio payload into the fixed-size clip the
// speech recogniser expects:
//
//   bytes → temp .wav file → decode (hound)
//         → down-mix to mono → resample to 16 kHz
//         → pad with silence / trim to 30 s (480 000 samples)
//
// Integer PCM is scaled into [-1, 1] by 2^(bits-1); float WAVs
// are taken as-is. Anything hound cannot parse is AudioDecode.
//
// The temp file lives only as long as the returned handle, so a
// request never leaves audio behind on disk.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::{io::Write, path::Path};
use tempfile::NamedTempFile;

use crate::domain::errors::ButlerError;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;
pub const CLIP_SECONDS: usize = 30;
pub const CLIP_SAMPLES: usize = TARGET_SAMPLE_RATE as usize * CLIP_SECONDS;

/// Mono samples at their original rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples:     Vec<f32>,
    pub sample_rate: u32,
    pub channels:    u16,
}

/// Write `bytes` to a temporary working file.
pub fn persist_payload(bytes: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("butler-upload-")
        .suffix(".wav")
        .tempfile()
        .context("Cannot create temporary audio file")?;
    file.write_all(bytes).context("Cannot write temporary audio file")?;
    file.flush()?;
    Ok(file)
}

/// Decode a WAV file and down-mix it to mono.
pub fn decode_wav(path: &Path) -> Result<DecodedAudio, ButlerError> {
    let mut reader = WavReader::open(path).map_err(|e| ButlerError::audio_decode(e.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(ButlerError::audio_decode("WAV header declares no channels or a zero sample rate"));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| ButlerError::audio_decode(e.to_string()))?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| ButlerError::audio_decode(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        samples:     downmix(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
        channels:    spec.channels,
    })
}

/// Average interleaved frames into one channel.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = ((samples.len() as u64 * to as u64) / from as u64).max(1) as usize;
    let step    = from as f64 / to as f64;
    let last    = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos  = i as f64 * step;
            let idx  = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[next] * frac
        })
        .collect()
}

/// Zero-pad or truncate to exactly `len` samples.
pub fn pad_or_trim(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}

/// Full upload pipeline: payload bytes → 30 s mono 16 kHz clip.
pub fn prepare_clip(bytes: &[u8]) -> Result<Vec<f32>> {
    let file    = persist_payload(bytes)?;
    let decoded = decode_wav(file.path())?;
    tracing::debug!(
        "Decoded {} samples at {} Hz from {} channel(s)",
        decoded.samples.len(), decoded.sample_rate, decoded.channels
    );
    let mono = resample_linear(&decoded.samples, decoded.sample_rate, TARGET_SAMPLE_RATE);
    Ok(pad_or_trim(mono, CLIP_SAMPLES))
}

/// Write mono samples as 16-bit PCM.
pub fn write_wav16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels:        1,
        sample_rate,
        bits_per_sample: 16,
        sample_format:   SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Cannot create '{}'", path.display()))?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A stereo 44.1 kHz WAV payload of `seconds` length.
    pub(crate) fn stereo_wav_bytes(seconds: f32) -> Vec<u8> {
        let spec = WavSpec {
            channels:        2,
            sample_rate:     44_100,
            bits_per_sample: 16,
            sample_format:   SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut w = WavWriter::new(&mut cursor, spec).unwrap();
            let frames = (44_100.0 * seconds) as usize;
            for i in 0..frames {
                let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
                w.write_sample(v).unwrap();
                w.write_sample(-v).unwrap();
            }
            w.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_prepare_clip_has_fixed_length() {
        let clip = prepare_clip(&stereo_wav_bytes(1.0)).unwrap();
        assert_eq!(clip.len(), CLIP_SAMPLES);
        // Opposite channels cancel out when down-mixed
        assert!(clip.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_long_audio_is_trimmed() {
        let clip = prepare_clip(&stereo_wav_bytes(31.0)).unwrap();
        assert_eq!(clip.len(), CLIP_SAMPLES);
    }

    #[test]
    fn test_garbage_payload_is_audio_decode_error() {
        let err = prepare_clip(b"definitely not a wav file").unwrap_err();
        assert!(matches!(err.downcast_ref::<ButlerError>(), Some(ButlerError::AudioDecode(_))));
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample_linear(&samples, 32_000, 16_000);
        assert_eq!(out.len(), 50);
        assert_eq!(out[10], 20.0);
    }

    #[test]
    fn test_downmix_averages_frames() {
        assert_eq!(downmix(&[1.0, 3.0, -1.0, 1.0], 2), vec![2.0, 0.0]);
    }

    #[test]
    fn test_wav16_round_trip() {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        write_wav16(file.path(), &[0.0, 0.5, -0.5], TARGET_SAMPLE_RATE).unwrap();
        let decoded = decode_wav(file.path()).unwrap();
        assert_eq!(decoded.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(decoded.samples.len(), 3);
        assert!((decoded.samples[1] - 0.5).abs() < 1e-3);
    }
}
