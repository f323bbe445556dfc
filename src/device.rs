//! Capture device seam and device lease

use futures::stream::BoxStream;
use tracing::{debug, info, warn};

use crate::Result;

/// What to request from the capture devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Microphone audio (always transmitted)
    pub audio: bool,
    /// Camera video for local self-view (never transmitted)
    pub video: bool,
    /// Requested capture sample rate in Hz
    pub sample_rate: u32,
}

/// Kind of a captured media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Description of one captured track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub kind: TrackKind,
    pub label: String,
}

/// Trait for capture device providers
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync + 'static {
    /// Acquire a combined capture stream
    ///
    /// Fails with [`LiveError::MediaAccess`](crate::LiveError::MediaAccess)
    /// when permission is denied or no device is available.
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn MediaStream>>;
}

/// A live capture stream holding device handles
pub trait MediaStream: Send + 'static {
    /// Tracks held by this stream
    fn tracks(&self) -> Vec<MediaTrack>;

    /// Start delivering microphone samples
    ///
    /// Yields mono float buffers in `[-1, 1]` of any length, in capture
    /// order. Returns `None` if audio was already taken or not captured.
    fn take_audio(&mut self) -> Option<BoxStream<'static, Vec<f32>>>;

    /// Stop every track and release the hardware
    fn stop_all_tracks(&mut self);
}

/// Owns a capture stream and releases it exactly once
///
/// Both explicit stops and transport-initiated endings go through
/// [`DeviceLease::release`]; later calls and the drop are no-ops.
pub struct DeviceLease {
    stream: Option<Box<dyn MediaStream>>,
}

impl DeviceLease {
    /// Acquire devices and wrap them in a lease
    pub async fn acquire(
        devices: &dyn MediaDevices,
        constraints: &CaptureConstraints,
    ) -> Result<Self> {
        let stream = devices.open(constraints).await?;

        let tracks = stream.tracks();
        info!(
            tracks = tracks.len(),
            audio = tracks.iter().any(|t| t.kind == TrackKind::Audio),
            video = tracks.iter().any(|t| t.kind == TrackKind::Video),
            "Capture devices acquired"
        );

        Ok(Self { stream: Some(stream) })
    }

    /// Take the microphone sample stream, if still held
    pub fn take_audio(&mut self) -> Option<BoxStream<'static, Vec<f32>>> {
        let audio = self.stream.as_mut()?.take_audio();
        if audio.is_none() {
            warn!("Capture stream has no audio to deliver");
        }
        audio
    }

    pub fn is_held(&self) -> bool {
        self.stream.is_some()
    }

    /// Stop all tracks. Returns `true` only for the call that released.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop_all_tracks();
                info!("Capture devices released");
                true
            }
            None => {
                debug!("Capture devices already released");
                false
            }
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DeviceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLease").field("held", &self.is_held()).finish()
    }
}
