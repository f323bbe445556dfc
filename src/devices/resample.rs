//! Band-limited sample-rate conversion for device audio

use rubato::{FftFixedIn, Resampler};

use crate::{LiveError, Result};

/// Input frames per resampler pass
const CHUNK_FRAMES: usize = 1024;

/// Streaming mono resampler backed by rubato's FFT resampler
///
/// Input is buffered until a full chunk is available, so output is produced
/// in bursts of one chunk. Equal rates pass samples through untouched.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(LiveError::config("sample rates must be non-zero"));
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler =
                FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_FRAMES, 2, 1)
                    .map_err(|e| {
                        LiveError::media_access_with_source(
                            format!("cannot resample {} Hz to {} Hz", from_rate, to_rate),
                            Box::new(e),
                        )
                    })?;
            Some(resampler)
        };

        Ok(Self { inner, pending: Vec::with_capacity(CHUNK_FRAMES * 2), from_rate, to_rate })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Frames of delay the filter adds at the start of the output
    pub fn output_delay(&self) -> usize {
        self.inner.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Resample one block of mono samples, appending whatever is ready to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }

            let chunk = &self.pending[consumed..consumed + needed];
            let resampled = resampler
                .process(&[chunk], None)
                .map_err(|e| LiveError::decode("resampler", e.to_string()))?;
            if let Some(channel) = resampled.first() {
                out.extend_from_slice(channel);
            }
            consumed += needed;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Resample a complete buffer, trimming the filter delay and tail
    ///
    /// The result holds `len * to_rate / from_rate` samples aligned with the
    /// input.
    pub fn convert(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
        let mut resampler = Self::new(from_rate, to_rate)?;
        if resampler.is_passthrough() {
            return Ok(samples.to_vec());
        }

        let expected =
            (samples.len() as u64 * resampler.to_rate as u64 / resampler.from_rate as u64) as usize;
        let delay = resampler.output_delay();

        let mut out = Vec::with_capacity(expected + delay + CHUNK_FRAMES);
        resampler.process(samples, &mut out)?;

        // Push silence through until the delayed tail has come out
        let silence = [0.0f32; CHUNK_FRAMES];
        while out.len() < delay + expected {
            resampler.process(&silence, &mut out)?;
        }

        out.drain(..delay);
        out.truncate(expected);
        Ok(out)
    }
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len).map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin()).collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    #[test]
    fn same_rate_passes_through() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(StreamResampler::convert(&input, 24_000, 24_000).unwrap(), input);

        let mut resampler = StreamResampler::new(16_000, 16_000).unwrap();
        let mut out = Vec::new();
        resampler.process(&input, &mut out).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn convert_produces_the_scaled_length() {
        let input = vec![0.0; 48_000];
        assert_eq!(StreamResampler::convert(&input, 48_000, 16_000).unwrap().len(), 16_000);

        let reply = vec![0.0; 2_400];
        assert_eq!(StreamResampler::convert(&reply, 24_000, 48_000).unwrap().len(), 4_800);
    }

    #[test]
    fn speech_band_survives_downsampling() {
        let input = sine(440.0, 48_000, 48_000);
        let out = StreamResampler::convert(&input, 48_000, 16_000).unwrap();

        let middle = &out[2_000..14_000];
        assert!((rms(middle) - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05, "rms {}", rms(middle));
    }

    #[test]
    fn tones_above_the_new_nyquist_are_filtered_out() {
        // 12 kHz would alias to 4 kHz at 16 kHz without a low-pass stage
        let input = sine(12_000.0, 48_000, 48_000);
        let out = StreamResampler::convert(&input, 48_000, 16_000).unwrap();

        let middle = &out[2_000..14_000];
        assert!(rms(middle) < 0.05, "aliased energy {}", rms(middle));
    }

    #[test]
    fn block_size_does_not_change_the_stream() {
        let input = sine(300.0, 44_100, 10_000);

        let mut whole = StreamResampler::new(44_100, 16_000).unwrap();
        let mut expected = Vec::new();
        whole.process(&input, &mut expected).unwrap();

        let mut blocked = StreamResampler::new(44_100, 16_000).unwrap();
        let mut actual = Vec::new();
        for block in input.chunks(333) {
            blocked.process(block, &mut actual).unwrap();
        }

        assert!(!expected.is_empty());
        assert_eq!(actual, expected);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(StreamResampler::new(0, 16_000), Err(LiveError::Config { .. })));
    }
}
