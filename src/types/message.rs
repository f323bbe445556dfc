//! Structured messages exchanged with the streaming endpoint

use serde::{Deserialize, Serialize};

use super::frame::{EncodedFrame, is_pcm_mime};

/// Output modality requested from the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

/// Configuration payload sent when a session opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    /// Model identifier, e.g. `gemini-2.5-flash-native-audio-preview-12-2025`
    pub model: String,

    /// Modalities the endpoint should respond with
    pub response_modalities: Vec<Modality>,

    /// Persona / behaviour instruction for the model
    pub system_instruction: Option<String>,

    /// Ask the endpoint to transcribe the user's speech
    pub input_audio_transcription: bool,

    /// Ask the endpoint to transcribe its own speech
    pub output_audio_transcription: bool,
}

/// One inbound message from the endpoint.
///
/// Every field is optional; a single message may carry a transcription
/// fragment, inline audio, both, or only control signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,

    #[serde(default)]
    pub turn_complete: bool,

    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<EncodedFrame>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

/// Notice that the endpoint will close the connection soon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Message carrying only a transcription of the model's speech.
    pub fn output_transcription(text: impl Into<String>) -> Self {
        Self {
            server_content: Some(ServerContent {
                output_transcription: Some(Transcription { text: text.into() }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Message carrying only a transcription of the user's speech.
    pub fn input_transcription(text: impl Into<String>) -> Self {
        Self {
            server_content: Some(ServerContent {
                input_transcription: Some(Transcription { text: text.into() }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Message carrying one inline audio part.
    pub fn audio(frame: EncodedFrame) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(Content {
                    parts: vec![Part { text: None, inline_data: Some(frame) }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Text of the model-speech transcription fragment, if present.
    pub fn output_text(&self) -> Option<&str> {
        self.server_content.as_ref()?.output_transcription.as_ref().map(|t| t.text.as_str())
    }

    /// Text of the user-speech transcription fragment, if present.
    pub fn input_text(&self) -> Option<&str> {
        self.server_content.as_ref()?.input_transcription.as_ref().map(|t| t.text.as_str())
    }

    /// Inline PCM audio parts of the model turn, in order.
    ///
    /// Parts whose mime type is not raw PCM are skipped. A PCM part without
    /// a `rate=` parameter plays at the configured default rate.
    pub fn inline_audio(&self) -> impl Iterator<Item = &EncodedFrame> {
        self.server_content
            .iter()
            .filter_map(|content| content.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|data| data.mime_type.is_empty() || is_pcm_mime(&data.mime_type))
    }
}
