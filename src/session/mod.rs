//! Session lifecycle controller
//!
//! [`LiveSession`] owns at most one live connection at a time and drives the
//! state machine:
//!
//! ```text
//! Idle ──start──▶ Connecting ──open──▶ Active ──stop──▶ Closing ──▶ Idle
//!                     │                  │
//!                     └──error/timeout───┴──▶ Error ──reset──▶ Idle
//! ```
//!
//! A transport close while `Connecting` or `Active` returns to `Idle`. Every
//! ending goes through the same teardown, so capture devices are released
//! exactly once per session. Calls that do not apply to the current state
//! (`start()` while not `Idle`, `stop()` while `Idle` or `Error`) are no-ops.

use futures::Stream;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::capture::CaptureStats;
use crate::config::LiveConfig;
use crate::device::{DeviceLease, MediaDevices};
use crate::driver::{Driver, DriverContext};
use crate::playback::{ActiveSources, OutputContext, PlaybackScheduler};
use crate::transport::Transport;
use crate::types::{SessionState, Transcript};
use crate::{LiveError, Result};

#[cfg(test)]
mod tests;

/// State shared between the controller and its driver task
pub(crate) struct SessionShared {
    pub state: watch::Sender<SessionState>,
    pub transcript: watch::Sender<Transcript>,
    pub last_error: watch::Sender<Option<Arc<LiveError>>>,
    pub capture_stats: watch::Sender<Option<Arc<CaptureStats>>>,
}

impl SessionShared {
    fn new(transcript_capacity: usize) -> Self {
        Self {
            state: watch::channel(SessionState::Idle).0,
            transcript: watch::channel(Transcript::with_capacity(transcript_capacity)).0,
            last_error: watch::channel(None).0,
            capture_stats: watch::channel(None).0,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Session state changed");
        }
    }

    /// Move from `from` to `to` only if currently in `from`
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(%from, %to, "Session state changed");
        }
        changed
    }

    /// Move `Connecting`/`Active` to `Closing`; returns whether it did
    fn begin_closing(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_live() {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        })
    }
}

/// Returns a `Connecting` session to `Idle` if `start()` is dropped before
/// the driver takes over
struct ConnectingGuard {
    shared: Arc<SessionShared>,
    armed: bool,
}

impl ConnectingGuard {
    fn new(shared: &Arc<SessionShared>) -> Self {
        shared.set_state(SessionState::Connecting);
        Self { shared: Arc::clone(shared), armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        if self.armed && self.shared.transition(SessionState::Connecting, SessionState::Idle) {
            info!("start() cancelled before the transport opened");
        }
    }
}

/// A running driver task
struct RunningSession {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Controller for realtime audio sessions against a streaming endpoint
///
/// The transport, capture devices and audio output are explicit
/// collaborators passed in at construction; nothing is global.
pub struct LiveSession {
    transport: Arc<dyn Transport>,
    devices: Arc<dyn MediaDevices>,
    output: Arc<dyn OutputContext>,
    config: LiveConfig,
    shared: Arc<SessionShared>,
    running: Option<RunningSession>,
    playback: Option<ActiveSources>,
}

impl LiveSession {
    /// Create an idle controller. Fails if `config` does not validate.
    pub fn new(
        transport: Arc<dyn Transport>,
        devices: Arc<dyn MediaDevices>,
        output: Arc<dyn OutputContext>,
        config: LiveConfig,
    ) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(SessionShared::new(config.transcript_capacity));
        Ok(Self { transport, devices, output, config, shared, running: None, playback: None })
    }

    /// Start a session.
    ///
    /// Acquires the capture devices, opens the transport and moves to
    /// `Connecting`; the session becomes `Active` once the transport signals
    /// open. Does nothing unless the session is `Idle`.
    ///
    /// # Errors
    ///
    /// - [`LiveError::MediaAccess`] if devices cannot be acquired; the state
    ///   stays `Idle`.
    /// - A transport error or timeout if the connection cannot be opened; the
    ///   devices are released and the state becomes `Error`.
    ///
    /// Dropping the returned future before it completes releases the devices
    /// and returns the session to `Idle`.
    pub async fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state != SessionState::Idle {
            debug!(%state, "start() ignored");
            return Ok(());
        }

        self.reap().await;

        info!(model = %self.config.model, "Starting live session");

        let mut lease =
            DeviceLease::acquire(self.devices.as_ref(), &self.config.capture_constraints()).await?;

        self.shared.transcript.send_modify(|t| t.clear());
        self.shared.last_error.send_replace(None);
        self.shared.capture_stats.send_replace(None);
        let connecting = ConnectingGuard::new(&self.shared);

        let connect_timeout = self.config.connect_timeout();
        let open_deadline = Instant::now() + connect_timeout;
        let setup = self.config.session_setup();

        let opened = tokio::time::timeout_at(open_deadline, self.transport.open(&setup)).await;
        let handle = match opened {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                connecting.disarm();
                return Err(self.fail_connect(&mut lease, e));
            }
            Err(_) => {
                connecting.disarm();
                let e = LiveError::Timeout { duration: connect_timeout };
                return Err(self.fail_connect(&mut lease, e));
            }
        };

        let scheduler = PlaybackScheduler::new(
            Arc::clone(&self.output),
            self.config.playback.sample_rate,
            self.config.playback.channels,
        );
        self.playback = Some(scheduler.active_sources());

        let cancel = CancellationToken::new();
        let ctx = DriverContext {
            events: handle.events,
            sink: Arc::from(handle.sink),
            lease,
            scheduler,
            capture: self.config.capture_settings(),
            open_deadline,
            connect_timeout,
            shared: Arc::clone(&self.shared),
        };
        let task = Driver::spawn(ctx, cancel.clone());
        self.running = Some(RunningSession { task, cancel });
        connecting.disarm();

        info!("Transport opening, waiting for endpoint");
        Ok(())
    }

    /// Stop the session.
    ///
    /// Moves to `Closing`, stops capture, closes the transport, releases the
    /// devices and returns once the session is `Idle`. Scheduled playback is
    /// left to finish. Does nothing when already `Idle`, `Error` or `Closing`.
    pub async fn stop(&mut self) {
        if !self.shared.begin_closing() {
            debug!(state = %self.state(), "stop() ignored");
            return;
        }

        info!("Stopping live session");
        self.reap().await;
    }

    /// Acknowledge an `Error`, returning to `Idle` so a new `start()` can run.
    ///
    /// Returns whether the state changed.
    pub fn reset(&mut self) -> bool {
        self.shared.transition(SessionState::Error, SessionState::Idle)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// State changes as a stream, starting with the current state
    pub fn state_updates(&self) -> impl Stream<Item = SessionState> + 'static {
        WatchStream::new(self.shared.state.subscribe())
    }

    /// Wait until the session reaches `target`
    pub async fn wait_for_state(&self, target: SessionState) {
        let mut rx = self.shared.state.subscribe();
        // The sender outlives `self`, so this cannot fail
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Snapshot of the rolling transcript
    pub fn transcript(&self) -> Transcript {
        self.shared.transcript.borrow().clone()
    }

    /// Transcript snapshots as a stream, starting with the current one
    pub fn transcript_updates(&self) -> impl Stream<Item = Transcript> + 'static {
        WatchStream::new(self.shared.transcript.subscribe())
    }

    /// Error that ended the most recent session, if it failed
    pub fn last_error(&self) -> Option<Arc<LiveError>> {
        self.shared.last_error.borrow().clone()
    }

    /// In-flight playback of the most recent session
    pub fn active_sources(&self) -> Option<ActiveSources> {
        self.playback.clone()
    }

    /// Wait for scheduled playback of the most recent session to finish
    pub async fn playback_drained(&self) {
        if let Some(active) = &self.playback {
            active.drained().await;
        }
    }

    /// Capture counters of the current session, once capture is wired
    pub fn capture_stats(&self) -> Option<Arc<CaptureStats>> {
        self.shared.capture_stats.borrow().clone()
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    fn fail_connect(&self, lease: &mut DeviceLease, e: LiveError) -> LiveError {
        error!("Failed to open transport: {}", e);
        lease.release();
        self.shared.last_error.send_replace(Some(Arc::new(e.detached())));
        self.shared.set_state(SessionState::Error);
        e
    }

    /// Cancel and join the driver task of a previous or current session
    async fn reap(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!("Session driver task failed: {}", e);
            // The driver never reached its teardown; settle the state here
            if !self.state().is_resolved() {
                self.shared.set_state(SessionState::Idle);
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            debug!("Dropping live session");
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("state", &self.state())
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}
