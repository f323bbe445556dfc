//! Gemini Live transport over a WebSocket
//!
//! The connection speaks the bidirectional `BidiGenerateContent` protocol:
//! a `setup` message goes out first, the endpoint answers `setupComplete`
//! (reported as [`TransportEvent::Open`]), and from then on microphone
//! frames go out as `realtimeInput` while `serverContent` messages carry
//! transcripts and synthesized speech back.

use futures::stream::Stream;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::api_key_from_env;
use crate::transport::{Transport, TransportEvent, TransportEvents, TransportHandle, TransportSink};
use crate::types::{EncodedFrame, Modality, ServerMessage, SessionSetup};
use crate::{LiveError, Result};

/// Default Gemini Live WebSocket endpoint
pub const GEMINI_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Messages sent by the client
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage<'a> {
    Setup(SetupPayload<'a>),
    RealtimeInput(RealtimeInput<'a>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupPayload<'a> {
    model: String,
    generation_config: GenerationConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<InstructionContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: &'a [Modality],
}

#[derive(Debug, Serialize)]
struct InstructionContent<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

/// Presence enables the feature; the endpoint takes no options
#[derive(Debug, Serialize)]
struct TranscriptionConfig {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [&'a EncodedFrame; 1],
}

impl<'a> SetupPayload<'a> {
    fn new(setup: &'a SessionSetup) -> Self {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };

        Self {
            model,
            generation_config: GenerationConfig { response_modalities: &setup.response_modalities },
            system_instruction: setup
                .system_instruction
                .as_deref()
                .map(|text| InstructionContent { parts: [TextPart { text }] }),
            input_audio_transcription: setup.input_audio_transcription.then_some(TranscriptionConfig {}),
            output_audio_transcription: setup
                .output_audio_transcription
                .then_some(TranscriptionConfig {}),
        }
    }
}

fn to_json(message: &ClientMessage<'_>, context: &str) -> Result<String> {
    serde_json::to_string(message).map_err(|e| LiveError::serialization(context, e))
}

/// Map one inbound payload to a transport event.
///
/// Payloads that are not valid server messages are logged and skipped.
fn classify(payload: &[u8]) -> Option<TransportEvent> {
    match serde_json::from_slice::<ServerMessage>(payload) {
        Ok(message) if message.is_setup_complete() => Some(TransportEvent::Open),
        Ok(message) => Some(TransportEvent::Message(message)),
        Err(e) => {
            warn!(len = payload.len(), "Skipping unparseable server message: {}", e);
            None
        }
    }
}

/// Transport for the Gemini Live API
#[derive(Clone)]
pub struct GeminiTransport {
    endpoint: Url,
    api_key: String,
}

impl GeminiTransport {
    /// Create a transport for the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LiveError::config("API key must not be empty"));
        }
        let endpoint = Url::parse(GEMINI_LIVE_ENDPOINT)
            .map_err(|e| LiveError::config(format!("invalid endpoint URL: {}", e)))?;
        Ok(Self { endpoint, api_key })
    }

    /// Create a transport using the API key from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    /// Use a different WebSocket endpoint, e.g. a regional proxy.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| LiveError::config(format!("invalid endpoint URL: {}", e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(LiveError::config(format!("endpoint must be ws:// or wss://, got {}", url)));
        }
        self.endpoint = url;
        Ok(self)
    }

    fn connect_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("key", &self.api_key);
        url
    }
}

impl std::fmt::Debug for GeminiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait::async_trait]
impl Transport for GeminiTransport {
    async fn open(&self, setup: &SessionSetup) -> Result<TransportHandle> {
        info!(endpoint = %self.endpoint, model = %setup.model, "Connecting to Gemini Live");

        let (ws_stream, _) = connect_async(self.connect_url().as_str())
            .await
            .map_err(|e| LiveError::transport_failed_with_source("connection failed", Box::new(e)))?;

        let (mut write, read) = ws_stream.split();

        let setup_json = to_json(&ClientMessage::Setup(SetupPayload::new(setup)), "session setup")?;
        write
            .send(Message::Text(setup_json))
            .await
            .map_err(|e| LiveError::transport_failed_with_source("failed to send setup", Box::new(e)))?;
        debug!("Session setup sent");

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    error!("Failed to write to Gemini socket: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            debug!("Gemini writer finished");
        });

        Ok(TransportHandle::new(
            GeminiSink { tx, closed: AtomicBool::new(false) },
            GeminiEvents { read },
        ))
    }
}

/// Outbound half: frames are queued to the socket writer task
struct GeminiSink {
    tx: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl TransportSink for GeminiSink {
    async fn send(&self, frame: EncodedFrame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LiveError::transport_failed("connection is closed"));
        }

        let json = to_json(
            &ClientMessage::RealtimeInput(RealtimeInput { media_chunks: [&frame] }),
            "realtime input",
        )?;
        trace!(bytes = json.len(), "Sending realtime input");

        self.tx
            .send(Message::Text(json))
            .map_err(|_| LiveError::transport_failed("socket writer has stopped"))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Closing Gemini socket");
        // The writer may already be gone if the socket failed
        let _ = self.tx.send(Message::Close(None));
        Ok(())
    }
}

/// Inbound half: socket frames mapped to transport events
struct GeminiEvents<S> {
    read: S,
}

#[async_trait::async_trait]
impl<S> TransportEvents for GeminiEvents<S>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
{
    async fn next_event(&mut self) -> Result<Option<TransportEvent>> {
        loop {
            let Some(frame) = self.read.next().await else {
                return Ok(None);
            };

            let event = match frame {
                Ok(Message::Text(text)) => classify(text.as_bytes()),
                Ok(Message::Binary(bytes)) => classify(&bytes),
                Ok(Message::Close(frame)) => {
                    match &frame {
                        Some(frame) if !frame.reason.is_empty() => {
                            info!(code = ?frame.code, reason = %frame.reason, "Gemini closed the connection");
                        }
                        _ => info!("Gemini closed the connection"),
                    }
                    Some(TransportEvent::Close)
                }
                Ok(_) => None,
                Err(e) => Some(TransportEvent::Error(e.to_string())),
            };

            if let Some(event) = event {
                return Ok(Some(event));
            }
        }
    }
}
