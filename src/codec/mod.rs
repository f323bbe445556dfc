//! PCM codec: float ↔ 16-bit PCM bytes ↔ base64 text.
//!
//! ```rust
//! use connect_live::codec;
//!
//! let samples = [0.0f32, 0.25, -0.25];
//! let text = codec::bytes_to_text(&codec::f32_to_pcm16_le(&samples));
//! let restored = codec::pcm16_le_to_f32(&codec::text_to_bytes(&text).unwrap(), 1).unwrap();
//! assert_eq!(restored[0], samples);
//! ```

mod pcm;
mod text;

pub use pcm::{PCM16_SCALE, f32_to_pcm16_le, pcm16_le_to_f32};
pub use text::{bytes_to_text, text_to_bytes};

use crate::Result;
use crate::types::{AudioFrame, EncodedFrame, PcmBuffer, pcm_mime_type};

/// Encode captured float samples as a mono [`AudioFrame`] at `sample_rate`.
pub fn capture_frame(samples: &[f32], sample_rate: u32) -> Result<AudioFrame> {
    AudioFrame::new(f32_to_pcm16_le(samples), sample_rate, 1)
}

/// Turn a frame into its text-safe wire form.
pub fn encode_frame(frame: AudioFrame) -> EncodedFrame {
    let mime_type = frame.mime_type();
    EncodedFrame::new(bytes_to_text(frame.bytes()), mime_type)
}

/// Decode base64 PCM text into a playable buffer.
pub fn decode_frame(text: &str, sample_rate: u32, channels: u16) -> Result<PcmBuffer> {
    let frame = AudioFrame::new(text_to_bytes(text)?, sample_rate, channels)?;
    let samples = pcm16_le_to_f32(frame.bytes(), frame.channels() as usize)?;
    PcmBuffer::new(samples, frame.sample_rate())
}

/// Encode a PCM buffer back into wire form. Mostly useful for tests and replays.
pub fn encode_buffer(buffer: &PcmBuffer) -> Result<EncodedFrame> {
    let channels = buffer.channel_count();
    let mut interleaved = Vec::with_capacity(buffer.frames() * channels);
    for i in 0..buffer.frames() {
        for c in 0..channels {
            interleaved.push(buffer.channel(c)[i]);
        }
    }

    let frame = AudioFrame::new(f32_to_pcm16_le(&interleaved), buffer.sample_rate(), channels as u16)?;
    Ok(EncodedFrame::new(bytes_to_text(frame.bytes()), pcm_mime_type(frame.sample_rate())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};

    #[test]
    fn capture_frame_to_wire() {
        let frame = capture_frame(&[0.0; 4096], CAPTURE_SAMPLE_RATE).unwrap();
        let encoded = encode_frame(frame);
        assert_eq!(encoded.mime_type, "audio/pcm;rate=16000");
        assert_eq!(text_to_bytes(&encoded.data).unwrap().len(), 4096 * 2);
    }

    #[test]
    fn decode_frame_reports_duration() {
        let encoded = bytes_to_text(&vec![0u8; 2400 * 2]);
        let buffer = decode_frame(&encoded, PLAYBACK_SAMPLE_RATE, 1).unwrap();
        assert!((buffer.duration() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn decode_frame_rejects_garbage() {
        assert!(decode_frame("not base64!", PLAYBACK_SAMPLE_RATE, 1).is_err());
        // Three bytes cannot hold whole 16-bit samples
        assert!(decode_frame(&bytes_to_text(&[1, 2, 3]), PLAYBACK_SAMPLE_RATE, 1).is_err());
    }

    #[test]
    fn stereo_buffer_round_trip() {
        let buffer = PcmBuffer::new(vec![vec![0.5, -0.5], vec![0.25, -0.25]], 24_000).unwrap();
        let encoded = encode_buffer(&buffer).unwrap();
        let decoded = decode_frame(&encoded.data, 24_000, 2).unwrap();
        assert_eq!(decoded, buffer);
    }
}
