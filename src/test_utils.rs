//! Test doubles for the session's collaborators
//!
//! In-memory stand-ins for capture devices, the audio output clock and the
//! streaming endpoint, so sessions can be driven deterministically without
//! hardware or network access.

#![cfg(any(test, feature = "benchmark"))]

use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::codec;
use crate::device::{CaptureConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
use crate::playback::{OutputContext, ScheduledSource, SourceId};
use crate::transport::{Transport, TransportEvent, TransportEvents, TransportHandle, TransportSink};
use crate::types::{EncodedFrame, PcmBuffer, ServerMessage, SessionSetup, pcm_mime_type};
use crate::{LiveError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Encoded frame of `seconds` of silence at `rate`, mono
pub fn silent_frame(rate: u32, seconds: f64) -> EncodedFrame {
    let samples = (rate as f64 * seconds).round() as usize;
    let bytes = vec![0u8; samples * 2];
    EncodedFrame::new(codec::bytes_to_text(&bytes), pcm_mime_type(rate))
}

/// Capture devices backed by a channel the test feeds
///
/// Each `open` creates a fresh microphone; [`FakeDevices::feed`] pushes
/// buffers into the most recently opened one.
#[derive(Debug, Clone, Default)]
pub struct FakeDevices {
    inner: Arc<FakeDevicesInner>,
}

#[derive(Debug, Default)]
struct FakeDevicesInner {
    denied: bool,
    open_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    microphone: Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>,
    streams: Mutex<Vec<Arc<AtomicBool>>>,
    last_constraints: Mutex<Option<CaptureConstraints>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices that refuse every request, like a denied permission prompt
    pub fn denied() -> Self {
        Self { inner: Arc::new(FakeDevicesInner { denied: true, ..Default::default() }) }
    }

    /// Push one microphone buffer. Returns `false` if no microphone is open.
    pub fn feed(&self, samples: Vec<f32>) -> bool {
        lock(&self.inner.microphone).as_ref().is_some_and(|tx| tx.send(samples).is_ok())
    }

    pub fn open_calls(&self) -> usize {
        self.inner.open_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.inner.stop_calls.load(Ordering::SeqCst)
    }

    /// Whether every stream handed out so far has been stopped
    pub fn all_tracks_stopped(&self) -> bool {
        lock(&self.inner.streams).iter().all(|stopped| stopped.load(Ordering::SeqCst))
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        *lock(&self.inner.last_constraints)
    }
}

#[async_trait::async_trait]
impl MediaDevices for FakeDevices {
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn MediaStream>> {
        self.inner.open_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.inner.last_constraints) = Some(*constraints);

        if self.inner.denied {
            return Err(LiveError::media_access("permission denied"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.inner.microphone) = Some(tx);

        let stopped = Arc::new(AtomicBool::new(false));
        lock(&self.inner.streams).push(Arc::clone(&stopped));

        let mut tracks = vec![MediaTrack { kind: TrackKind::Audio, label: "Fake microphone".into() }];
        if constraints.video {
            tracks.push(MediaTrack { kind: TrackKind::Video, label: "Fake camera".into() });
        }

        Ok(Box::new(FakeStream {
            devices: Arc::clone(&self.inner),
            tracks,
            audio: Some(UnboundedReceiverStream::new(rx).boxed()),
            stopped,
        }))
    }
}

struct FakeStream {
    devices: Arc<FakeDevicesInner>,
    tracks: Vec<MediaTrack>,
    audio: Option<BoxStream<'static, Vec<f32>>>,
    stopped: Arc<AtomicBool>,
}

impl MediaStream for FakeStream {
    fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.clone()
    }

    fn take_audio(&mut self) -> Option<BoxStream<'static, Vec<f32>>> {
        self.audio.take()
    }

    fn stop_all_tracks(&mut self) {
        self.devices.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        self.audio = None;
    }
}

/// Record of one buffer handed to [`VirtualOutput`]
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
    pub frames: usize,
}

/// Output context with a manually driven clock
///
/// Scheduled buffers never finish on their own; tests complete them with
/// [`VirtualOutput::finish`] or [`VirtualOutput::finish_all`].
#[derive(Debug, Default)]
pub struct VirtualOutput {
    state: Mutex<VirtualOutputState>,
}

#[derive(Debug, Default)]
struct VirtualOutputState {
    now: f64,
    next_id: u64,
    pending: HashMap<SourceId, oneshot::Sender<()>>,
    scheduled: Vec<ScheduledBuffer>,
}

impl VirtualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_now(&self, now: f64) {
        let mut state = lock(&self.state);
        state.now = state.now.max(now);
    }

    /// Report one source as finished
    pub fn finish(&self, id: SourceId) {
        if let Some(done) = lock(&self.state).pending.remove(&id) {
            let _ = done.send(());
        }
    }

    /// Report every pending source as finished
    pub fn finish_all(&self) {
        let pending: Vec<_> = lock(&self.state).pending.drain().collect();
        for (_, done) in pending {
            let _ = done.send(());
        }
    }

    pub fn scheduled(&self) -> Vec<ScheduledBuffer> {
        lock(&self.state).scheduled.clone()
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

impl OutputContext for VirtualOutput {
    fn now(&self) -> f64 {
        lock(&self.state).now
    }

    fn schedule(&self, buffer: PcmBuffer, start: f64) -> Result<ScheduledSource> {
        let mut state = lock(&self.state);
        let id = SourceId(state.next_id);
        state.next_id += 1;

        let (tx, rx) = oneshot::channel();
        state.pending.insert(id, tx);
        state.scheduled.push(ScheduledBuffer {
            id,
            start,
            duration: buffer.duration(),
            frames: buffer.frames(),
        });

        Ok(ScheduledSource { id, ended: rx })
    }
}

/// Transport sink that records every frame it is given
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<RecordingSinkInner>,
}

#[derive(Debug, Default)]
struct RecordingSinkInner {
    sent: Mutex<Vec<EncodedFrame>>,
    fail_remaining: AtomicUsize,
    close_calls: AtomicUsize,
    gate: Arc<RwLock<()>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose first `count` sends fail
    pub fn failing_first(count: usize) -> Self {
        let sink = Self::new();
        sink.inner.fail_remaining.store(count, Ordering::SeqCst);
        sink
    }

    pub fn sent(&self) -> Vec<EncodedFrame> {
        lock(&self.inner.sent).clone()
    }

    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    /// Block sends until the returned guard is dropped
    pub fn pause(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.inner.gate).try_write_owned().expect("sink already paused")
    }
}

#[async_trait::async_trait]
impl TransportSink for RecordingSink {
    async fn send(&self, frame: EncodedFrame) -> Result<()> {
        let _open = self.inner.gate.read().await;

        let failed = self
            .inner
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LiveError::transport_failed("scripted send failure"));
        }

        lock(&self.inner.sent).push(frame);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
enum OpenBehavior {
    /// Connect and signal open right away
    #[default]
    Immediate,
    /// Connect; the test signals open
    Manual,
    /// `open` fails with this reason
    Fail(String),
    /// `open` never completes
    Hang,
}

/// Transport whose events are pushed by the test
///
/// Every connection shares one [`RecordingSink`]; events go to the most
/// recently opened connection.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    behavior: OpenBehavior,
    sink: RecordingSink,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    open_calls: AtomicU64,
    last_setup: Mutex<Option<SessionSetup>>,
}

impl ScriptedTransport {
    /// Transport that opens immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that waits for [`ScriptedTransport::signal_open`]
    pub fn manual() -> Self {
        Self { behavior: OpenBehavior::Manual, ..Default::default() }
    }

    /// Transport whose `open` fails
    pub fn failing(reason: impl Into<String>) -> Self {
        Self { behavior: OpenBehavior::Fail(reason.into()), ..Default::default() }
    }

    /// Transport whose `open` never returns
    pub fn hanging() -> Self {
        Self { behavior: OpenBehavior::Hang, ..Default::default() }
    }

    /// Deliver an event to the current connection
    pub fn emit(&self, event: TransportEvent) -> bool {
        lock(&self.events).as_ref().is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn signal_open(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    pub fn message(&self, message: ServerMessage) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    /// Drop the current connection's event source
    pub fn disconnect(&self) {
        lock(&self.events).take();
    }

    pub fn sink(&self) -> &RecordingSink {
        &self.sink
    }

    pub fn open_calls(&self) -> u64 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn last_setup(&self) -> Option<SessionSetup> {
        lock(&self.last_setup).clone()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, setup: &SessionSetup) -> Result<TransportHandle> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_setup) = Some(setup.clone());

        match &self.behavior {
            OpenBehavior::Fail(reason) => return Err(LiveError::transport_failed(reason.clone())),
            OpenBehavior::Hang => futures::future::pending::<()>().await,
            OpenBehavior::Immediate | OpenBehavior::Manual => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if matches!(self.behavior, OpenBehavior::Immediate) {
            let _ = tx.send(TransportEvent::Open);
        }
        *lock(&self.events) = Some(tx);

        Ok(TransportHandle::new(self.sink.clone(), ScriptedEvents { rx }))
    }
}

struct ScriptedEvents {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait::async_trait]
impl TransportEvents for ScriptedEvents {
    async fn next_event(&mut self) -> Result<Option<TransportEvent>> {
        Ok(self.rx.recv().await)
    }
}
