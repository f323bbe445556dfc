//! Lifecycle tests for the session controller
//!
//! Every collaborator is a test double, so each scenario drives the state
//! machine deterministically: transport events are pushed by hand, the
//! output clock never advances on its own, and microphone buffers are fed
//! explicitly.

use super::*;
use crate::test_utils::{FakeDevices, ScriptedTransport, VirtualOutput, silent_frame};
use crate::transport::TransportEvent;
use crate::types::{EncodedFrame, ServerMessage, Speaker};
use futures::StreamExt;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    session: LiveSession,
    transport: Arc<ScriptedTransport>,
    devices: FakeDevices,
    output: Arc<VirtualOutput>,
}

fn harness(transport: ScriptedTransport) -> Harness {
    harness_with(transport, FakeDevices::new(), LiveConfig::default())
}

fn harness_with(transport: ScriptedTransport, devices: FakeDevices, config: LiveConfig) -> Harness {
    let transport = Arc::new(transport);
    let output = Arc::new(VirtualOutput::new());
    let session =
        LiveSession::new(transport.clone(), Arc::new(devices.clone()), output.clone(), config)
            .unwrap();
    Harness { session, transport, devices, output }
}

async fn reach(session: &LiveSession, state: SessionState) {
    tokio::time::timeout(WAIT, session.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("session never reached {}, stuck in {}", state, session.state()));
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn active(transport: ScriptedTransport) -> Harness {
    let mut h = harness(transport);
    h.session.start().await.unwrap();
    reach(&h.session, SessionState::Active).await;
    h
}

#[tokio::test]
async fn start_connects_and_becomes_active() {
    let mut h = harness(ScriptedTransport::manual());
    assert_eq!(h.session.state(), SessionState::Idle);

    h.session.start().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Connecting);
    assert_eq!(h.devices.open_calls(), 1);
    assert_eq!(h.transport.open_calls(), 1);

    let constraints = h.devices.last_constraints().unwrap();
    assert!(constraints.audio);
    assert_eq!(constraints.sample_rate, 16_000);

    let setup = h.transport.last_setup().unwrap();
    assert!(setup.input_audio_transcription);
    assert!(setup.output_audio_transcription);

    assert!(h.transport.signal_open());
    reach(&h.session, SessionState::Active).await;
    assert!(h.session.capture_stats().is_some());
}

#[tokio::test]
async fn stop_releases_devices_and_closes_transport() {
    let mut h = active(ScriptedTransport::new()).await;

    h.session.stop().await;

    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.devices.stop_calls(), 1);
    assert!(h.devices.all_tracks_stopped());
    assert_eq!(h.transport.sink().close_calls(), 1);
    assert!(h.session.last_error().is_none());
}

#[tokio::test]
async fn stopping_twice_releases_once() {
    let mut h = active(ScriptedTransport::new()).await;

    h.session.stop().await;
    h.session.stop().await;

    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.devices.stop_calls(), 1);
    assert_eq!(h.transport.sink().close_calls(), 1);
}

#[tokio::test]
async fn stop_while_connecting_returns_to_idle() {
    let mut h = harness(ScriptedTransport::manual());
    h.session.start().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Connecting);

    h.session.stop().await;

    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.devices.stop_calls(), 1);
}

#[tokio::test]
async fn start_while_active_is_ignored() {
    let mut h = active(ScriptedTransport::new()).await;

    h.session.start().await.unwrap();

    assert_eq!(h.session.state(), SessionState::Active);
    assert_eq!(h.devices.open_calls(), 1);
    assert_eq!(h.transport.open_calls(), 1);
}

#[tokio::test]
async fn stop_while_idle_is_ignored() {
    let mut h = harness(ScriptedTransport::new());

    h.session.stop().await;

    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.devices.open_calls(), 0);
    assert_eq!(h.transport.sink().close_calls(), 0);
}

#[tokio::test]
async fn denied_media_keeps_session_idle() {
    let mut h = harness_with(ScriptedTransport::new(), FakeDevices::denied(), LiveConfig::default());

    let err = h.session.start().await.unwrap_err();

    assert!(matches!(err, LiveError::MediaAccess { .. }));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.transport.open_calls(), 0);
}

#[tokio::test]
async fn failed_open_ends_in_error_and_releases_devices() {
    let mut h = harness(ScriptedTransport::failing("invalid api key"));

    let err = h.session.start().await.unwrap_err();

    assert!(err.is_transport());
    assert_eq!(h.session.state(), SessionState::Error);
    assert_eq!(h.devices.stop_calls(), 1);
    let recorded = h.session.last_error().unwrap();
    assert!(recorded.to_string().contains("invalid api key"));
}

#[tokio::test(start_paused = true)]
async fn hanging_open_times_out() {
    let mut h = harness(ScriptedTransport::hanging());

    let err = h.session.start().await.unwrap_err();

    assert!(matches!(err, LiveError::Timeout { duration } if duration == Duration::from_secs(15)));
    assert_eq!(h.session.state(), SessionState::Error);
    assert_eq!(h.devices.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_start_returns_to_idle() {
    let mut h = harness(ScriptedTransport::hanging());

    let abandoned = tokio::time::timeout(Duration::from_millis(20), h.session.start()).await;
    assert!(abandoned.is_err());

    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.devices.stop_calls(), 1);
    assert!(h.devices.all_tracks_stopped());
    assert!(h.session.last_error().is_none());

    h.session.stop().await;
    assert_eq!(h.session.state(), SessionState::Idle);

    // A later start() runs again instead of being ignored
    let retried = tokio::time::timeout(Duration::from_millis(20), h.session.start()).await;
    assert!(retried.is_err());
    assert_eq!(h.transport.open_calls(), 2);
    assert_eq!(h.devices.open_calls(), 2);
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn missing_open_signal_times_out() {
    let config = LiveConfig { connect_timeout_ms: 5_000, ..LiveConfig::default() };
    let mut h = harness_with(ScriptedTransport::manual(), FakeDevices::new(), config);

    h.session.start().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Connecting);

    tokio::time::timeout(Duration::from_secs(60), h.session.wait_for_state(SessionState::Error))
        .await
        .unwrap();

    let recorded = h.session.last_error().unwrap();
    assert!(matches!(*recorded, LiveError::Timeout { .. }));
    assert_eq!(h.devices.stop_calls(), 1);
    assert_eq!(h.transport.sink().close_calls(), 1);
}

#[tokio::test]
async fn transport_error_while_connecting_ends_in_error() {
    let mut h = harness(ScriptedTransport::manual());
    h.session.start().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Connecting);

    assert!(h.transport.emit(TransportEvent::Error("handshake rejected".into())));
    reach(&h.session, SessionState::Error).await;

    let recorded = h.session.last_error().unwrap();
    assert!(matches!(*recorded, LiveError::Transport { .. }));
    assert!(recorded.to_string().contains("handshake rejected"));
    assert_eq!(h.devices.stop_calls(), 1);
    assert_eq!(h.transport.sink().close_calls(), 1);
    assert!(h.session.capture_stats().is_none());

    h.session.stop().await;
    assert_eq!(h.session.state(), SessionState::Error);
    assert_eq!(h.devices.stop_calls(), 1);
}

#[tokio::test]
async fn connection_dropped_while_connecting_returns_to_idle() {
    let mut h = harness(ScriptedTransport::manual());
    h.session.start().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Connecting);

    h.transport.disconnect();
    reach(&h.session, SessionState::Idle).await;

    assert!(h.session.last_error().is_none());
    assert_eq!(h.devices.stop_calls(), 1);
    assert!(h.devices.all_tracks_stopped());
}

#[tokio::test]
async fn transport_error_while_active_ends_in_error() {
    let mut h = active(ScriptedTransport::new()).await;

    h.transport.message(ServerMessage::audio(silent_frame(24_000, 0.2)));
    eventually(|| h.output.scheduled().len() == 1).await;

    h.transport.emit(TransportEvent::Error("socket reset".into()));
    reach(&h.session, SessionState::Error).await;

    assert_eq!(h.devices.stop_calls(), 1);
    assert!(h.devices.all_tracks_stopped());
    let recorded = h.session.last_error().unwrap();
    assert!(recorded.to_string().contains("socket reset"));

    // Playback already scheduled is left to finish
    let sources = h.session.active_sources().unwrap();
    assert_eq!(sources.len(), 1);
    h.output.finish_all();
    tokio::time::timeout(WAIT, h.session.playback_drained()).await.unwrap();
    assert!(sources.is_empty());

    // Stopping from Error does nothing
    h.session.stop().await;
    assert_eq!(h.session.state(), SessionState::Error);
    assert_eq!(h.devices.stop_calls(), 1);
}

#[tokio::test]
async fn error_requires_reset_before_restart() {
    let mut h = active(ScriptedTransport::new()).await;
    h.transport.emit(TransportEvent::Error("boom".into()));
    reach(&h.session, SessionState::Error).await;

    h.session.start().await.unwrap();
    assert_eq!(h.transport.open_calls(), 1);

    assert!(h.session.reset());
    assert!(!h.session.reset());
    assert_eq!(h.session.state(), SessionState::Idle);

    h.session.start().await.unwrap();
    reach(&h.session, SessionState::Active).await;
    assert_eq!(h.transport.open_calls(), 2);
    assert!(h.session.last_error().is_none());
}

#[tokio::test]
async fn transport_close_returns_to_idle() {
    let mut h = active(ScriptedTransport::new()).await;

    h.transport.emit(TransportEvent::Close);
    reach(&h.session, SessionState::Idle).await;
    eventually(|| h.devices.stop_calls() == 1).await;

    assert!(h.session.last_error().is_none());
    assert_eq!(h.transport.sink().close_calls(), 0);

    h.session.stop().await;
    assert_eq!(h.devices.stop_calls(), 1);
}

#[tokio::test]
async fn dropped_connection_counts_as_close() {
    let h = active(ScriptedTransport::new()).await;

    h.transport.disconnect();

    reach(&h.session, SessionState::Idle).await;
    eventually(|| h.devices.stop_calls() == 1).await;
}

#[tokio::test]
async fn session_can_restart_after_stop() {
    let mut h = active(ScriptedTransport::new()).await;
    h.transport.message(ServerMessage::output_transcription("first session"));
    eventually(|| h.session.transcript().len() == 1).await;
    h.session.stop().await;

    h.session.start().await.unwrap();
    reach(&h.session, SessionState::Active).await;

    assert!(h.session.transcript().is_empty());
    assert_eq!(h.devices.open_calls(), 2);
    h.session.stop().await;
    assert_eq!(h.devices.stop_calls(), 2);
}

#[tokio::test]
async fn transcript_keeps_most_recent_entries_in_order() {
    let h = active(ScriptedTransport::new()).await;

    for i in 0..12 {
        h.transport.message(ServerMessage::output_transcription(format!("line {}", i)));
    }
    eventually(|| h.session.transcript().entries().last().is_some_and(|e| e.text == "line 11"))
        .await;

    let transcript = h.session.transcript();
    assert_eq!(transcript.len(), 10);
    let lines = transcript.lines();
    assert_eq!(lines.first().map(String::as_str), Some("AI: line 2"));
    assert_eq!(lines.last().map(String::as_str), Some("AI: line 11"));
}

#[tokio::test]
async fn output_transcript_precedes_input_in_one_message() {
    let h = active(ScriptedTransport::new()).await;

    let mut message = ServerMessage::output_transcription("Hello");
    if let Some(content) = message.server_content.as_mut() {
        content.input_transcription = Some(crate::types::Transcription { text: "Hi".into() });
    }
    h.transport.message(message);
    h.transport.message(ServerMessage::input_transcription(""));
    h.transport.message(ServerMessage::input_transcription("Again"));

    eventually(|| h.session.transcript().len() == 3).await;
    let speakers: Vec<_> = h.session.transcript().entries().map(|e| e.speaker).collect();
    assert_eq!(speakers, vec![Speaker::Model, Speaker::User, Speaker::User]);
    assert_eq!(h.session.transcript().lines(), vec!["AI: Hello", "You: Hi", "You: Again"]);
}

#[tokio::test]
async fn messages_before_open_are_ignored() {
    let h = {
        let mut h = harness(ScriptedTransport::manual());
        h.session.start().await.unwrap();
        h
    };

    h.transport.message(ServerMessage::output_transcription("too early"));
    h.transport.signal_open();
    h.transport.message(ServerMessage::output_transcription("on time"));

    eventually(|| !h.session.transcript().is_empty()).await;
    assert_eq!(h.session.transcript().lines(), vec!["AI: on time"]);
}

#[tokio::test]
async fn reply_audio_is_scheduled_gaplessly() {
    let h = active(ScriptedTransport::new()).await;

    for _ in 0..3 {
        h.transport.message(ServerMessage::audio(silent_frame(24_000, 0.1)));
    }
    eventually(|| h.output.scheduled().len() == 3).await;

    let starts: Vec<f64> = h.output.scheduled().iter().map(|s| s.start).collect();
    for (start, expected) in starts.iter().zip([0.0, 0.1, 0.2]) {
        assert!((start - expected).abs() < 1e-9, "{} != {}", start, expected);
    }
    assert_eq!(h.session.active_sources().unwrap().len(), 3);
}

#[tokio::test]
async fn malformed_audio_does_not_end_the_session() {
    let h = active(ScriptedTransport::new()).await;

    let bad = EncodedFrame::new("not base64!".into(), "audio/pcm;rate=24000");
    h.transport.message(ServerMessage::audio(bad));
    h.transport.message(ServerMessage::output_transcription("still here"));

    eventually(|| h.session.transcript().len() == 1).await;
    assert_eq!(h.session.state(), SessionState::Active);
    assert!(h.output.scheduled().is_empty());
}

#[tokio::test]
async fn microphone_chunks_reach_transport_in_order() {
    let mut h = active(ScriptedTransport::new()).await;

    assert!(h.devices.feed(vec![0.25; 4096]));
    assert!(h.devices.feed(vec![-0.5; 4096]));
    eventually(|| h.transport.sink().sent().len() == 2).await;

    let sent = h.transport.sink().sent();
    assert!(sent.iter().all(|f| f.mime_type == "audio/pcm;rate=16000"));
    let first = crate::codec::decode_frame(&sent[0].data, 16_000, 1).unwrap();
    let second = crate::codec::decode_frame(&sent[1].data, 16_000, 1).unwrap();
    assert_eq!(first.frames(), 4096);
    assert!((first.channel(0)[0] - 0.25).abs() < 1e-4);
    assert!((second.channel(0)[0] + 0.5).abs() < 1e-4);

    let stats = h.session.capture_stats().unwrap();
    h.session.stop().await;
    assert_eq!(stats.frames_sent(), 2);
    assert!(!h.devices.feed(vec![0.0; 4096]));
}

#[tokio::test]
async fn state_updates_start_with_current_state() {
    let h = active(ScriptedTransport::new()).await;

    let mut updates = Box::pin(h.session.state_updates());
    assert_eq!(updates.next().await, Some(SessionState::Active));

    h.transport.emit(TransportEvent::Close);
    let next = tokio::time::timeout(WAIT, updates.next()).await.unwrap();
    assert_eq!(next, Some(SessionState::Idle));
}

#[tokio::test]
async fn dropping_the_session_releases_devices() {
    let h = active(ScriptedTransport::new()).await;
    let devices = h.devices.clone();

    drop(h);

    eventually(|| devices.stop_calls() == 1).await;
}
