//! Microphone capture pipeline
//!
//! Device buffers are regrouped into fixed-size chunks, each chunk is
//! encoded to 16-bit PCM + base64 as soon as it is complete, and the
//! resulting frames are queued for a single sender task. The queue never
//! drops or reorders frames; its depth is tracked so growth shows up in
//! the logs. Frames still queued when capture is stopped are counted as
//! discarded.

use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::stream::RechunkExt;
use crate::transport::TransportSink;
use crate::types::EncodedFrame;

/// Counters describing a capture pipeline's progress
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_encoded: AtomicU64,
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
    frames_discarded: AtomicU64,
    queue_depth: AtomicUsize,
}

impl CaptureStats {
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    /// Frames left unsent because capture stopped first
    pub fn frames_discarded(&self) -> u64 {
        self.frames_discarded.load(Ordering::Relaxed)
    }

    /// Frames encoded but not yet handed to the transport
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }
}

/// Capture pipeline settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Samples per outbound chunk
    pub chunk_size: usize,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Queue depth above which a warning is logged
    pub queue_warn_depth: usize,
}

/// Ordered, unbounded outbound queue with a logged high-water mark
struct OutboundQueue {
    tx: mpsc::UnboundedSender<EncodedFrame>,
    stats: Arc<CaptureStats>,
    warn_depth: usize,
    above_mark: AtomicBool,
}

impl OutboundQueue {
    fn push(&self, frame: EncodedFrame) -> bool {
        // Counted before the send so the receiver never decrements first
        let depth = self.stats.queue_depth.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(frame).is_err() {
            self.stats.queue_depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        if depth > self.warn_depth {
            if !self.above_mark.swap(true, Ordering::Relaxed) {
                warn!(depth, limit = self.warn_depth, "Outbound audio queue is growing");
            }
        } else {
            self.above_mark.store(false, Ordering::Relaxed);
        }
        true
    }
}

/// Running capture pipeline: an encoder task and a sender task
pub struct CapturePipeline {
    encoder: JoinHandle<()>,
    sender: JoinHandle<()>,
    stats: Arc<CaptureStats>,
    cancel: CancellationToken,
}

impl CapturePipeline {
    /// Wire microphone samples into the transport's send path
    pub fn spawn(
        audio: BoxStream<'static, Vec<f32>>,
        sink: Arc<dyn TransportSink>,
        settings: CaptureSettings,
        cancel: CancellationToken,
    ) -> Self {
        let stats = Arc::new(CaptureStats::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let queue = OutboundQueue {
            tx,
            stats: Arc::clone(&stats),
            warn_depth: settings.queue_warn_depth,
            above_mark: AtomicBool::new(false),
        };

        let encoder = tokio::spawn(Self::encoder_task(audio, queue, settings, cancel.clone()));
        let sender =
            tokio::spawn(Self::sender_task(rx, sink, Arc::clone(&stats), cancel.clone()));

        info!(
            chunk_size = settings.chunk_size,
            sample_rate = settings.sample_rate,
            "Capture pipeline started"
        );

        Self { encoder, sender, stats, cancel }
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Stop capturing and wait for any in-flight send to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();

        if let Err(e) = self.encoder.await {
            warn!("Capture encoder task failed: {}", e);
        }
        if let Err(e) = self.sender.await {
            warn!("Capture sender task failed: {}", e);
        }

        info!(
            encoded = self.stats.frames_encoded(),
            sent = self.stats.frames_sent(),
            failed = self.stats.send_failures(),
            discarded = self.stats.frames_discarded(),
            "Capture pipeline stopped"
        );
    }

    async fn encoder_task(
        audio: BoxStream<'static, Vec<f32>>,
        queue: OutboundQueue,
        settings: CaptureSettings,
        cancel: CancellationToken,
    ) {
        let mut chunks = audio.rechunk(settings.chunk_size);

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Capture encoder cancelled");
                    break;
                }
                chunk = chunks.next() => chunk,
            };

            let Some(samples) = chunk else {
                info!("Microphone stream ended");
                break;
            };

            let frame = match codec::capture_frame(&samples, settings.sample_rate) {
                Ok(frame) => codec::encode_frame(frame),
                Err(e) => {
                    warn!("Failed to encode captured chunk: {}", e);
                    continue;
                }
            };

            let seq = queue.stats.frames_encoded.fetch_add(1, Ordering::Relaxed);
            trace!(seq, samples = samples.len(), "Encoded capture chunk");

            if !queue.push(frame) {
                debug!("Outbound queue closed, stopping encoder");
                break;
            }
        }
    }

    async fn sender_task(
        mut rx: mpsc::UnboundedReceiver<EncodedFrame>,
        sink: Arc<dyn TransportSink>,
        stats: Arc<CaptureStats>,
        cancel: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Capture sender cancelled");
                    break;
                }
                frame = rx.recv() => frame,
            };

            let Some(frame) = frame else {
                break;
            };
            stats.queue_depth.fetch_sub(1, Ordering::AcqRel);

            match sink.send(frame).await {
                Ok(()) => {
                    stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Failed to send audio frame: {}", e);
                }
            }
        }

        rx.close();
        let mut discarded = 0u64;
        while rx.try_recv().is_ok() {
            stats.queue_depth.fetch_sub(1, Ordering::AcqRel);
            discarded += 1;
        }
        if discarded > 0 {
            stats.frames_discarded.fetch_add(discarded, Ordering::Relaxed);
            info!(discarded, "Discarded unsent frames at shutdown");
        }
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline").field("stats", &self.stats).finish_non_exhaustive()
    }
}
