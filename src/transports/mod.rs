//! Concrete streaming endpoint transports

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::GeminiTransport;
