//! Session lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of a live session.
///
/// `Idle → Connecting → Active → Closing → Idle`, with `Error` reachable
/// from `Connecting` or `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum SessionState {
    /// No connection, devices released
    #[default]
    Idle,

    /// Devices acquired, waiting for the transport to open
    Connecting,

    /// Transport open, capture and playback running
    Active,

    /// Tearing down after an explicit stop
    Closing,

    /// Ended by a transport failure; devices released
    Error,
}

impl SessionState {
    /// States in which a session holds devices and a transport.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    /// States in which nothing is held and no teardown is pending.
    pub fn is_resolved(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_classification() {
        assert!(SessionState::Connecting.is_live());
        assert!(SessionState::Active.is_live());
        assert!(!SessionState::Closing.is_live());
        assert!(SessionState::Idle.is_resolved());
        assert!(SessionState::Error.is_resolved());
        assert!(!SessionState::Closing.is_resolved());
        assert_eq!(SessionState::default(), SessionState::Idle);
        assert_eq!(SessionState::Active.to_string(), "active");
    }
}
