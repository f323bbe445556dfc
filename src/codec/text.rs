//! Byte ↔ text framing for embedding PCM in structured messages

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::Result;

/// Encode raw bytes as standard padded base64.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard padded base64 back to bytes.
///
/// Characters outside the alphabet or bad padding fail with a decode error.
pub fn text_to_bytes(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text)?)
}
