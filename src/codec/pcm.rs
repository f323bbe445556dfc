//! Float ↔ 16-bit little-endian PCM conversion

use crate::types::BYTES_PER_SAMPLE;
use crate::{LiveError, Result};

/// Full-scale divisor for 16-bit PCM.
pub const PCM16_SCALE: f32 = 32768.0;

/// Convert normalized float samples to little-endian 16-bit PCM bytes.
///
/// Each sample is multiplied by 32768 and truncated toward zero. Inputs are
/// expected in `[-1, 1]`; values outside saturate at the `i16` bounds.
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        let value = (sample * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert little-endian 16-bit PCM bytes to per-channel float samples.
///
/// Samples are de-interleaved in sample-major order: sample 0 of channel 0,
/// sample 0 of channel 1, …, sample 1 of channel 0, …
pub fn pcm16_le_to_f32(bytes: &[u8], channels: usize) -> Result<Vec<Vec<f32>>> {
    if channels == 0 {
        return Err(LiveError::decode("pcm16", "channel count must be non-zero"));
    }
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(LiveError::decode(
            "pcm16",
            format!("odd byte count {} for 16-bit samples", bytes.len()),
        ));
    }

    let total_samples = bytes.len() / BYTES_PER_SAMPLE;
    if total_samples % channels != 0 {
        return Err(LiveError::decode(
            "pcm16",
            format!("{} samples do not split evenly into {} channels", total_samples, channels),
        ));
    }

    let frames = total_samples / channels;
    let mut output = vec![Vec::with_capacity(frames); channels];
    for (i, pair) in bytes.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        output[i % channels].push(value as f32 / PCM16_SCALE);
    }

    Ok(output)
}
