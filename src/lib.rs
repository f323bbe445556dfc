//! Realtime media sessions for streaming AI voice endpoints.
//!
//! connect-live captures microphone audio, converts it to the 16-bit PCM +
//! base64 wire format streaming endpoints expect, plays back synthesized
//! speech with gapless timing and keeps a short rolling transcript, all
//! behind a small session state machine.
//!
//! # Features
//!
//! - **Capture**: device buffers regrouped into 4096-sample, 16 kHz frames, sent in order
//! - **Playback**: inbound 24 kHz audio scheduled back-to-back on an output clock
//! - **Lifecycle**: `Idle → Connecting → Active → Closing → Idle`, with `Error`
//! - **Pluggable seams**: transport, capture devices and audio output are traits
//! - **Gemini Live** (feature `gemini`, default) and **cpal** devices (feature `cpal`)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! # #[cfg(all(feature = "gemini", feature = "cpal"))]
//! # async fn run() -> connect_live::Result<()> {
//! use connect_live::devices::{CpalDevices, CpalOutput};
//! use connect_live::transports::GeminiTransport;
//! use connect_live::{LiveConfig, LiveSession, SessionState};
//! use std::sync::Arc;
//!
//! let mut session = LiveSession::new(
//!     Arc::new(GeminiTransport::from_env()?),
//!     Arc::new(CpalDevices::new()),
//!     Arc::new(CpalOutput::open_default()?),
//!     LiveConfig::default(),
//! )?;
//!
//! session.start().await?;
//! session.wait_for_state(SessionState::Active).await;
//! // ... talk ...
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

// Core types and error handling
pub mod codec;
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Media pipelines
pub mod capture;
pub mod playback;
pub mod stream;

// Session lifecycle
mod driver;
pub mod session;

// Adapter seams and implementations
pub mod device;
#[cfg(feature = "cpal")]
pub mod devices;
pub mod transport;
pub mod transports;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use config::LiveConfig;
pub use device::{CaptureConstraints, DeviceLease, MediaDevices, MediaStream, MediaTrack, TrackKind};
pub use playback::{ActiveSources, OutputContext, PlaybackScheduler, ScheduledSource, SourceId};
pub use session::LiveSession;
pub use transport::{Transport, TransportEvent, TransportEvents, TransportHandle, TransportSink};
