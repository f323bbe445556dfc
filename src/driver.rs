//! Driver runs the event loop of one live session

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::capture::{CapturePipeline, CaptureSettings};
use crate::device::DeviceLease;
use crate::playback::PlaybackScheduler;
use crate::session::SessionShared;
use crate::transport::{TransportEvent, TransportEvents, TransportSink};
use crate::types::{ServerMessage, SessionState, Speaker};
use crate::LiveError;

/// Everything one session's driver task owns
pub(crate) struct DriverContext {
    pub events: Box<dyn TransportEvents>,
    pub sink: Arc<dyn TransportSink>,
    pub lease: DeviceLease,
    pub scheduler: PlaybackScheduler,
    pub capture: CaptureSettings,
    /// Instant by which the transport must signal open
    pub open_deadline: Instant,
    pub connect_timeout: Duration,
    pub shared: Arc<SessionShared>,
}

/// How a session ended
#[derive(Debug)]
enum SessionEnd {
    /// Explicit `stop()`
    Stopped,
    /// Transport closed normally
    Closed,
    /// Transport failure or connect timeout
    Failed(LiveError),
}

/// Driver spawns and runs the session event loop
///
/// The task owns the transport's inbound half, the device lease and the
/// playback scheduler. Every way a session can end funnels into a single
/// teardown, so devices are released exactly once.
pub(crate) struct Driver;

impl Driver {
    /// Spawn the event loop for a freshly opened transport
    pub fn spawn(ctx: DriverContext, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            Self::run(ctx, cancel).await;
        })
    }

    async fn run(mut ctx: DriverContext, cancel: CancellationToken) {
        info!("Session driver started");

        let deadline = tokio::time::sleep_until(ctx.open_deadline);
        tokio::pin!(deadline);

        let connect_timeout = ctx.connect_timeout;
        let mut capture: Option<CapturePipeline> = None;
        let mut opened = false;
        let mut message_count = 0u64;

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Session stop requested");
                    break SessionEnd::Stopped;
                }
                _ = &mut deadline, if !opened => {
                    warn!(timeout = ?connect_timeout, "Transport did not open in time");
                    break SessionEnd::Failed(LiveError::Timeout { duration: connect_timeout });
                }
                event = ctx.events.next_event() => event,
            };

            match event {
                Ok(Some(TransportEvent::Open)) => {
                    if opened {
                        debug!("Ignoring repeated open signal");
                        continue;
                    }
                    opened = true;
                    capture = Self::wire_capture(&mut ctx, &cancel);
                    // A concurrent stop() may already have moved on to Closing
                    if ctx.shared.transition(SessionState::Connecting, SessionState::Active) {
                        info!("Session active");
                    }
                }
                Ok(Some(TransportEvent::Message(message))) => {
                    if !opened {
                        debug!("Ignoring message received before open");
                        continue;
                    }
                    message_count += 1;
                    trace!(message_count, "Inbound message");
                    Self::handle_message(&mut ctx, &message);
                }
                Ok(Some(TransportEvent::Error(reason))) => {
                    error!("Transport reported an error: {}", reason);
                    break SessionEnd::Failed(LiveError::transport_failed(reason));
                }
                Ok(Some(TransportEvent::Close)) | Ok(None) => {
                    info!("Transport closed");
                    break SessionEnd::Closed;
                }
                Err(e) => {
                    error!("Transport read failed: {}", e);
                    break SessionEnd::Failed(e);
                }
            }
        };

        Self::teardown(ctx, capture, end).await;
        info!("Session driver ended ({} messages)", message_count);
    }

    /// Connect the microphone to the transport's send path
    fn wire_capture(ctx: &mut DriverContext, cancel: &CancellationToken) -> Option<CapturePipeline> {
        let audio = ctx.lease.take_audio()?;
        let pipeline =
            CapturePipeline::spawn(audio, Arc::clone(&ctx.sink), ctx.capture, cancel.child_token());
        ctx.shared.capture_stats.send_replace(Some(pipeline.stats()));
        Some(pipeline)
    }

    fn handle_message(ctx: &mut DriverContext, message: &ServerMessage) {
        if let Some(text) = message.output_text().filter(|t| !t.is_empty()) {
            ctx.shared.transcript.send_modify(|t| t.push(Speaker::Model, text));
        }
        if let Some(text) = message.input_text().filter(|t| !t.is_empty()) {
            ctx.shared.transcript.send_modify(|t| t.push(Speaker::User, text));
        }

        for frame in message.inline_audio() {
            match ctx.scheduler.schedule(frame) {
                Ok(Some(scheduled)) => {
                    trace!(start = scheduled.start, duration = scheduled.duration, "Queued reply audio");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Dropping malformed audio frame: {}", e);
                }
            }
        }

        if let Some(content) = &message.server_content {
            if content.interrupted {
                debug!("Model turn interrupted");
            }
            if content.turn_complete {
                debug!("Model turn complete");
            }
        }

        if let Some(go_away) = &message.go_away {
            info!(time_left = ?go_away.time_left, "Endpoint announced disconnect");
        }
    }

    /// Shared release path for stop, close and error
    async fn teardown(mut ctx: DriverContext, capture: Option<CapturePipeline>, end: SessionEnd) {
        if let Some(capture) = capture {
            capture.shutdown().await;
        }

        if !matches!(end, SessionEnd::Closed) {
            if let Err(e) = ctx.sink.close().await {
                warn!("Failed to close transport: {}", e);
            }
        }

        ctx.lease.release();

        let in_flight = ctx.scheduler.active_sources().len();
        if in_flight > 0 {
            debug!(in_flight, "Leaving scheduled playback to finish");
        }

        match end {
            SessionEnd::Stopped | SessionEnd::Closed => {
                ctx.shared.set_state(SessionState::Idle);
                info!("Session ended");
            }
            SessionEnd::Failed(e) => {
                error!("Session failed: {}", e);
                ctx.shared.last_error.send_replace(Some(Arc::new(e)));
                ctx.shared.set_state(SessionState::Error);
            }
        }
    }
}
