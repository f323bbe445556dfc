//! Native audio devices backed by cpal
//!
//! [`CpalDevices`] captures the default (or a named) microphone and
//! [`CpalOutput`] plays scheduled buffers on the default speaker. Device
//! formats rarely match the wire formats, so both sides downmix to mono and
//! resample with a band-limited FFT resampler. Audio crosses into and out of
//! the device callbacks through lock-free ring buffers.

mod native;
mod resample;

pub use native::{CpalDevices, CpalOutput};
pub use resample::StreamResampler;
