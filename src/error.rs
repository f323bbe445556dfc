//! Error types for live media sessions.
//!
//! All errors implement `std::error::Error` and carry enough context to tell
//! the user what went wrong and whether a fresh `start()` is worth trying.
//!
//! ## Error Categories
//!
//! - **Media access**: microphone/camera permission or hardware failures
//! - **Decode**: malformed inbound payloads (the frame is dropped, the session continues)
//! - **Transport**: failures surfaced by the streaming connection (the session ends in `Error`)
//! - **Timeout**: the connection never signalled open
//! - **Config**: invalid configuration values
//!
//! A transport close is not an error; it ends the session normally.
//!
//! ```rust
//! use connect_live::LiveError;
//!
//! let error = LiveError::transport_failed("socket reset by peer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for live session operations.
pub type Result<T, E = LiveError> = std::result::Result<T, E>;

/// Main error type for live session operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LiveError {
    #[error("Media device access failed: {reason}")]
    MediaAccess {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Connection did not open within {duration:?}")]
    Timeout { duration: Duration },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Serialization error in {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LiveError {
    /// Returns whether a fresh, user-initiated `start()` may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LiveError::MediaAccess { .. } => false,
            LiveError::Decode { .. } => false,
            LiveError::Transport { .. } => true,
            LiveError::Timeout { .. } => true,
            LiveError::Config { .. } => false,
            LiveError::Serialization { .. } => false,
        }
    }

    /// Returns whether this error ends a session in the `Error` state.
    pub fn is_transport(&self) -> bool {
        matches!(self, LiveError::Transport { .. } | LiveError::Timeout { .. })
    }

    /// Copy of this error with its source chain flattened into the message.
    ///
    /// Used where one failure must be both returned and recorded.
    pub fn detached(&self) -> Self {
        match self {
            LiveError::MediaAccess { reason, source } => LiveError::MediaAccess {
                reason: flatten(reason, source.as_deref()),
                source: None,
            },
            LiveError::Decode { context, details } => {
                LiveError::Decode { context: context.clone(), details: details.clone() }
            }
            LiveError::Transport { reason, source } => LiveError::Transport {
                reason: flatten(reason, source.as_deref()),
                source: None,
            },
            LiveError::Timeout { duration } => LiveError::Timeout { duration: *duration },
            LiveError::Config { reason } => LiveError::Config { reason: reason.clone() },
            LiveError::Serialization { context, source } => LiveError::Serialization {
                context: context.clone(),
                source: <serde_json::Error as serde::de::Error>::custom(source),
            },
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LiveError::MediaAccess { .. } => vec![
                "Grant microphone and camera permissions",
                "Check that an input device is connected",
                "Close other applications holding the device",
            ],
            LiveError::Decode { .. } => vec![
                "Check the payload encoding (base64, 16-bit PCM)",
                "Verify the sample rate and channel count",
            ],
            LiveError::Transport { .. } => vec![
                "Check network connectivity",
                "Verify the API key and model name",
                "Start a new session",
            ],
            LiveError::Timeout { .. } => vec![
                "Increase the connect timeout",
                "Check network connectivity",
                "Start a new session",
            ],
            LiveError::Config { .. } => vec![
                "Check configuration values are non-zero",
                "Verify the configuration file syntax",
            ],
            LiveError::Serialization { .. } => vec![
                "Check the wire message format",
                "Update the client to match the endpoint's protocol version",
            ],
        }
    }

    /// Helper constructor for media access errors.
    pub fn media_access(reason: impl Into<String>) -> Self {
        LiveError::MediaAccess { reason: reason.into(), source: None }
    }

    /// Helper constructor for media access errors with source.
    pub fn media_access_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LiveError::MediaAccess { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for decode errors.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        LiveError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        LiveError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LiveError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        LiveError::Config { reason: reason.into() }
    }

    /// Helper constructor for serialization errors.
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        LiveError::Serialization { context: context.into(), source }
    }
}

impl From<base64::DecodeError> for LiveError {
    fn from(err: base64::DecodeError) -> Self {
        LiveError::decode("base64 payload", err.to_string())
    }
}

impl From<serde_yaml_ng::Error> for LiveError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        LiveError::config(err.to_string())
    }
}

fn flatten(reason: &str, source: Option<&(dyn std::error::Error + Send + Sync)>) -> String {
    match source {
        Some(source) => format!("{}: {}", reason, source),
        None => reason.to_string(),
    }
}
