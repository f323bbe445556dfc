//! Audio frame types for the capture and playback paths

use serde::{Deserialize, Serialize};

use crate::{LiveError, Result};

/// Sample rate of captured microphone audio sent upstream.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized speech received from the endpoint.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Number of samples per captured chunk.
pub const CAPTURE_CHUNK_SAMPLES: usize = 4096;

/// Bytes per 16-bit PCM sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// One slice of little-endian 16-bit linear PCM.
///
/// Immutable once built; it moves from producer to encoder or decoder and
/// is never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    bytes: Vec<u8>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Create a frame from raw PCM bytes.
    ///
    /// Fails when the byte count does not hold a whole number of
    /// interleaved 16-bit samples for every channel.
    pub fn new(bytes: Vec<u8>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(LiveError::decode(
                "audio frame",
                format!("invalid format: {} Hz, {} channels", sample_rate, channels),
            ));
        }

        let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
        if bytes.len() % frame_bytes != 0 {
            return Err(LiveError::decode(
                "audio frame",
                format!(
                    "{} bytes is not a multiple of {} ({} channels of 16-bit PCM)",
                    bytes.len(),
                    frame_bytes,
                    channels
                ),
            ));
        }

        Ok(Self { bytes, sample_rate, channels })
    }

    /// Raw little-endian PCM bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the frame and returns the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of samples per channel.
    pub fn samples_per_channel(&self) -> usize {
        self.bytes.len() / (BYTES_PER_SAMPLE * self.channels as usize)
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples_per_channel() as f64 / self.sample_rate as f64
    }

    /// Wire mime type for this frame, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        pcm_mime_type(self.sample_rate)
    }
}

/// Text-safe form of an [`AudioFrame`], ready to embed in a structured message.
///
/// Serializes with the wire field names `data` and `mimeType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub struct EncodedFrame {
    /// Base64 of the raw PCM bytes
    pub data: String,

    /// Mime type carrying the sample rate
    pub mime_type: String,
}

impl EncodedFrame {
    pub fn new(data: String, mime_type: impl Into<String>) -> Self {
        Self { data, mime_type: mime_type.into() }
    }

    /// Sample rate declared by the mime type, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        parse_pcm_rate(&self.mime_type)
    }
}

/// Decoded, de-interleaved float samples ready for the output context.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PcmBuffer {
    /// Build a buffer from per-channel samples.
    ///
    /// All channels must have the same length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() || sample_rate == 0 {
            return Err(LiveError::decode(
                "pcm buffer",
                format!("invalid format: {} Hz, {} channels", sample_rate, channels.len()),
            ));
        }

        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(LiveError::decode("pcm buffer", "channels have different lengths"));
        }

        Ok(Self { channels, sample_rate })
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

/// Mime type for raw 16-bit PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Whether a mime type names raw PCM, with or without parameters.
pub fn is_pcm_mime(mime_type: &str) -> bool {
    mime_type.split(';').next().is_some_and(|essence| essence.trim().eq_ignore_ascii_case("audio/pcm"))
}

/// Extract the `rate=` parameter from a PCM mime type.
///
/// Returns `None` for non-PCM types or a missing/invalid rate.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    if !is_pcm_mime(mime_type) {
        return None;
    }

    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .filter(|rate: &u32| *rate > 0)
}
