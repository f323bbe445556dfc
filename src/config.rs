//! Session configuration
//!
//! Configuration is plain serde data with defaults for every field, so a
//! YAML file only needs the values it changes:
//!
//! ```rust
//! use connect_live::LiveConfig;
//!
//! let config = LiveConfig::from_yaml_str("transcript_capacity: 20\n").unwrap();
//! assert_eq!(config.transcript_capacity, 20);
//! assert_eq!(config.capture.chunk_size, 4096);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::capture::CaptureSettings;
use crate::device::CaptureConstraints;
use crate::types::{
    CAPTURE_CHUNK_SAMPLES, CAPTURE_SAMPLE_RATE, DEFAULT_TRANSCRIPT_CAPACITY, Modality,
    PLAYBACK_SAMPLE_RATE, SessionSetup,
};
use crate::{LiveError, Result};

/// Default model for native-audio live sessions.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default persona for the assistant.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant for MS I.A Academy students. Speak clearly and concisely.";

/// Environment variables checked, in order, for the endpoint API key.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Microphone capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub chunk_size: usize,
    /// Request a camera track for local self-view
    pub self_view: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { sample_rate: CAPTURE_SAMPLE_RATE, chunk_size: CAPTURE_CHUNK_SAMPLES, self_view: true }
    }
}

/// Inbound audio format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { sample_rate: PLAYBACK_SAMPLE_RATE, channels: 1 }
    }
}

/// Complete configuration for a live session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub model: String,
    pub system_instruction: Option<String>,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub transcript_capacity: usize,
    /// How long to wait for the transport to open before failing
    pub connect_timeout_ms: u64,
    /// Outbound queue depth that triggers a warning
    pub send_queue_warn_depth: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            input_transcription: true,
            output_transcription: true,
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            transcript_capacity: DEFAULT_TRANSCRIPT_CAPACITY,
            connect_timeout_ms: 15_000,
            send_queue_warn_depth: 32,
        }
    }
}

impl LiveConfig {
    /// Parse and validate configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LiveConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            LiveError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LiveError::config("model must not be empty"));
        }
        if self.capture.sample_rate == 0 || self.playback.sample_rate == 0 {
            return Err(LiveError::config("sample rates must be non-zero"));
        }
        if self.capture.chunk_size == 0 {
            return Err(LiveError::config("capture chunk size must be non-zero"));
        }
        if self.playback.channels == 0 {
            return Err(LiveError::config("playback channel count must be non-zero"));
        }
        if self.transcript_capacity == 0 {
            return Err(LiveError::config("transcript capacity must be non-zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(LiveError::config("connect timeout must be non-zero"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Setup payload sent when the transport opens.
    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.model.clone(),
            response_modalities: vec![Modality::Audio],
            system_instruction: self.system_instruction.clone(),
            input_audio_transcription: self.input_transcription,
            output_audio_transcription: self.output_transcription,
        }
    }

    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            audio: true,
            video: self.capture.self_view,
            sample_rate: self.capture.sample_rate,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            chunk_size: self.capture.chunk_size,
            sample_rate: self.capture.sample_rate,
            queue_warn_depth: self.send_queue_warn_depth,
        }
    }
}

/// Read the endpoint API key from the environment.
pub fn api_key_from_env() -> Result<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            LiveError::config(format!("no API key found in {}", API_KEY_VARS.join(" or ")))
        })
}
