//! Core types for live media sessions.
//!
//! - [`AudioFrame`] is one slice of little-endian 16-bit PCM with a fixed format
//! - [`EncodedFrame`] is its base64 wire form (`{ data, mimeType }`)
//! - [`PcmBuffer`] holds decoded, de-interleaved float samples for playback
//! - [`ServerMessage`] / [`SessionSetup`] are the structured endpoint messages
//! - [`SessionState`] is the lifecycle state machine's state
//! - [`Transcript`] is the bounded rolling transcript
//!
//! ```rust
//! use connect_live::types::{AudioFrame, CAPTURE_SAMPLE_RATE};
//!
//! // 4096 samples of 16 kHz mono silence
//! let frame = AudioFrame::new(vec![0; 4096 * 2], CAPTURE_SAMPLE_RATE, 1).unwrap();
//! assert_eq!(frame.samples_per_channel(), 4096);
//! assert_eq!(frame.mime_type(), "audio/pcm;rate=16000");
//! ```

mod frame;
mod message;
mod state;
mod transcript;

pub use frame::*;
pub use message::*;
pub use state::*;
pub use transcript::*;
