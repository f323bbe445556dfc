//! Gapless playback scheduling of inbound audio
//!
//! Inbound frames are decoded and queued back-to-back on an output clock:
//!
//! 1. decode the base64 payload to a [`PcmBuffer`]
//! 2. `start = max(cursor, clock.now())`
//! 3. schedule at `start`, then `cursor = start + duration`
//! 4. track the source until the output reports it finished
//!
//! Frames therefore play in arrival order with no overlap. If decoding falls
//! behind the clock, the next frame starts "now" and the listener hears a
//! short silence instead of overlapping audio.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace};

use crate::codec;
use crate::types::{EncodedFrame, PcmBuffer};
use crate::Result;

/// Identifier of one scheduled playback source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Handle returned by an output context for a scheduled buffer
#[derive(Debug)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Resolves when the source has finished playing
    pub ended: oneshot::Receiver<()>,
}

/// Audio output context: a monotonic clock plus buffer scheduling
///
/// Passed explicitly to each session; there is no global output context.
pub trait OutputContext: Send + Sync + 'static {
    /// Current output time in seconds. Never decreases.
    fn now(&self) -> f64;

    /// Schedule `buffer` to start playing at `start` seconds on this clock
    fn schedule(&self, buffer: PcmBuffer, start: f64) -> Result<ScheduledSource>;
}

/// Set of in-flight playback sources
///
/// Cloning yields another view of the same set. Only the scheduler adds
/// and removes entries; everyone else can observe and wait for drain.
#[derive(Debug, Clone)]
pub struct ActiveSources {
    set: Arc<watch::Sender<HashSet<SourceId>>>,
}

impl ActiveSources {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(HashSet::new());
        Self { set: Arc::new(tx) }
    }

    fn insert(&self, id: SourceId) {
        self.set.send_modify(|set| {
            set.insert(id);
        });
    }

    fn remove(&self, id: SourceId) -> bool {
        self.set.send_if_modified(|set| set.remove(&id))
    }

    pub fn len(&self) -> usize {
        self.set.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.borrow().is_empty()
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.set.borrow().contains(&id)
    }

    /// Wait until every scheduled source has finished
    pub async fn drained(&self) {
        let mut rx = self.set.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|set| set.is_empty()).await;
    }
}

/// Where and when a frame was scheduled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

/// Schedules decoded frames back-to-back on an output clock
pub struct PlaybackScheduler {
    output: Arc<dyn OutputContext>,
    cursor: f64,
    active: ActiveSources,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackScheduler {
    /// Create a scheduler for inbound audio of the given default format
    pub fn new(output: Arc<dyn OutputContext>, sample_rate: u32, channels: u16) -> Self {
        Self { output, cursor: 0.0, active: ActiveSources::new(), sample_rate, channels }
    }

    /// Next scheduled start time in output-clock seconds
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// View of the in-flight sources
    pub fn active_sources(&self) -> ActiveSources {
        self.active.clone()
    }

    /// Decode and schedule one inbound frame
    ///
    /// The frame's mime type `rate=` parameter overrides the default sample
    /// rate. Returns `Ok(None)` for empty payloads. Must run inside a tokio
    /// runtime: completion tracking is a spawned task.
    pub fn schedule(&mut self, frame: &EncodedFrame) -> Result<Option<ScheduledPlayback>> {
        let rate = frame.sample_rate().unwrap_or(self.sample_rate);
        let buffer = codec::decode_frame(&frame.data, rate, self.channels)?;
        self.schedule_buffer(buffer)
    }

    /// Schedule an already decoded buffer
    pub fn schedule_buffer(&mut self, buffer: PcmBuffer) -> Result<Option<ScheduledPlayback>> {
        if buffer.frames() == 0 {
            trace!("Skipping empty audio frame");
            return Ok(None);
        }

        let now = self.output.now();
        if self.cursor > 0.0 && now > self.cursor {
            debug!(gap_ms = (now - self.cursor) * 1000.0, "Playback fell behind, resynchronizing");
        }

        let start = self.cursor.max(now);
        let duration = buffer.duration();
        let ScheduledSource { id, ended } = self.output.schedule(buffer, start)?;

        self.cursor = start + duration;
        self.active.insert(id);

        trace!(source = id.0, start, duration, active = self.active.len(), "Scheduled playback");

        let active = self.active.clone();
        tokio::spawn(async move {
            // A dropped sender means the output went away; the source is done either way
            let _ = ended.await;
            if active.remove(id) {
                trace!(source = id.0, "Playback source finished");
            }
        });

        Ok(Some(ScheduledPlayback { id, start, duration }))
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("cursor", &self.cursor)
            .field("active", &self.active.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{VirtualOutput, silent_frame};
    use proptest::prelude::*;

    fn scheduler(output: &Arc<VirtualOutput>) -> PlaybackScheduler {
        PlaybackScheduler::new(output.clone(), 24_000, 1)
    }

    #[tokio::test]
    async fn three_frames_play_back_to_back() {
        let output = Arc::new(VirtualOutput::new());
        let mut scheduler = scheduler(&output);

        let mut starts = Vec::new();
        for _ in 0..3 {
            let scheduled = scheduler.schedule(&silent_frame(24_000, 0.1)).unwrap().unwrap();
            starts.push(scheduled.start);
        }

        for (start, expected) in starts.iter().zip([0.0, 0.1, 0.2]) {
            assert!((start - expected).abs() < 1e-9, "{} != {}", start, expected);
        }
        assert!((scheduler.cursor() - 0.3).abs() < 1e-9);
        assert_eq!(scheduler.active_sources().len(), 3);
    }

    #[tokio::test]
    async fn resynchronizes_when_clock_overtakes_cursor() {
        let output = Arc::new(VirtualOutput::new());
        let mut scheduler = scheduler(&output);

        scheduler.schedule(&silent_frame(24_000, 0.1)).unwrap();
        output.set_now(0.5);
        let late = scheduler.schedule(&silent_frame(24_000, 0.1)).unwrap().unwrap();

        assert!((late.start - 0.5).abs() < 1e-9);
        assert!((scheduler.cursor() - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn mime_rate_overrides_default() {
        let output = Arc::new(VirtualOutput::new());
        let mut scheduler = scheduler(&output);

        // 1600 samples at 16 kHz is 0.1s, not 0.0667s
        let scheduled = scheduler.schedule(&silent_frame(16_000, 0.1)).unwrap().unwrap();
        assert!((scheduled.duration - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sources_removed_once_on_completion() {
        let output = Arc::new(VirtualOutput::new());
        let mut scheduler = scheduler(&output);
        let active = scheduler.active_sources();

        let first = scheduler.schedule(&silent_frame(24_000, 0.1)).unwrap().unwrap();
        let second = scheduler.schedule(&silent_frame(24_000, 0.1)).unwrap().unwrap();
        assert!(active.contains(first.id));

        output.finish(first.id);
        tokio::task::yield_now().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while active.contains(first.id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(active.contains(second.id));
        assert_eq!(active.len(), 1);

        output.finish_all();
        tokio::time::timeout(std::time::Duration::from_secs(1), active.drained()).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_is_rejected_without_moving_cursor() {
        let output = Arc::new(VirtualOutput::new());
        let mut scheduler = scheduler(&output);

        let bad = EncodedFrame::new("###".to_string(), "audio/pcm;rate=24000");
        assert!(scheduler.schedule(&bad).is_err());
        assert_eq!(scheduler.cursor(), 0.0);
        assert!(output.scheduled().is_empty());
    }

    #[tokio::test]
    async fn empty_frame_is_skipped() {
        let output = Arc::new(VirtualOutput::new());
        let mut scheduler = scheduler(&output);

        let empty = EncodedFrame::new(String::new(), "audio/pcm;rate=24000");
        assert_eq!(scheduler.schedule(&empty).unwrap(), None);
        assert!(scheduler.active_sources().is_empty());
    }

    proptest! {
        #[test]
        fn starts_follow_arrival_order(
            steps in prop::collection::vec((1usize..4800, 0.0f64..0.3), 1..40)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let _guard = runtime.enter();

            let output = Arc::new(VirtualOutput::new());
            let mut scheduler = scheduler(&output);

            let mut clock = 0.0;
            let mut previous_end = 0.0f64;
            let mut previous_start = f64::NEG_INFINITY;

            for (samples, advance) in steps {
                clock += advance;
                output.set_now(clock);

                let buffer = PcmBuffer::new(vec![vec![0.0; samples]], 24_000).unwrap();
                let scheduled = scheduler.schedule_buffer(buffer).unwrap().unwrap();

                prop_assert!(scheduled.start >= previous_start);
                prop_assert!(scheduled.start >= clock);
                prop_assert!(scheduled.start >= previous_end);
                prop_assert_eq!(scheduled.start, previous_end.max(clock));

                previous_start = scheduled.start;
                previous_end = scheduled.start + scheduled.duration;
            }
        }
    }
}
