//! Transport seam for streaming endpoints

use crate::Result;
use crate::types::{EncodedFrame, ServerMessage, SessionSetup};

/// Signals delivered by an open transport, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The endpoint accepted the session setup and is ready for media
    Open,
    /// A structured message (transcripts, inline audio, control)
    Message(ServerMessage),
    /// The endpoint or connection failed
    Error(String),
    /// The endpoint closed the connection normally
    Close,
}

/// Trait for streaming endpoints
///
/// Transports wrap a vendor connection behind a narrow interface so the
/// session controller never sees vendor types. `open` starts the
/// connection and returns immediately; readiness is reported later as
/// [`TransportEvent::Open`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start a connection and send the setup payload
    async fn open(&self, setup: &SessionSetup) -> Result<TransportHandle>;
}

/// Outbound half of an open connection
#[async_trait::async_trait]
pub trait TransportSink: Send + Sync + 'static {
    /// Send one realtime media frame
    ///
    /// Fire-and-forget: there is no backpressure signal.
    async fn send(&self, frame: EncodedFrame) -> Result<()>;

    /// Close the connection. Closing twice is harmless.
    async fn close(&self) -> Result<()>;
}

/// Inbound half of an open connection
#[async_trait::async_trait]
pub trait TransportEvents: Send + 'static {
    /// Get the next event
    ///
    /// Returns:
    /// - `Ok(Some(event))` - New event available
    /// - `Ok(None)` - Connection gone (treated like [`TransportEvent::Close`])
    /// - `Err(e)` - Error reading from the connection
    async fn next_event(&mut self) -> Result<Option<TransportEvent>>;
}

/// Both halves of an open connection
pub struct TransportHandle {
    pub sink: Box<dyn TransportSink>,
    pub events: Box<dyn TransportEvents>,
}

impl TransportHandle {
    pub fn new(sink: impl TransportSink, events: impl TransportEvents) -> Self {
        Self { sink: Box::new(sink), events: Box::new(events) }
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle").finish_non_exhaustive()
    }
}
