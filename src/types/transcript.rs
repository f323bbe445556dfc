//! Bounded rolling transcript of a live session

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of transcript entries kept.
pub const DEFAULT_TRANSCRIPT_CAPACITY: usize = 10;

/// Who produced a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Speaker {
    /// The local user (input transcription)
    User,
    /// The model (output transcription)
    Model,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Speaker::User => "You",
            Speaker::Model => "AI",
        }
    }
}

/// One transcription fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

impl std::fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.speaker.label(), self.text)
    }
}

/// Rolling transcript keeping only the most recent entries, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Transcript {
    entries: VecDeque<TranscriptEntry>,
    capacity: usize,
}

impl Transcript {
    /// Create an empty transcript. A zero capacity is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append an entry, dropping the oldest ones beyond capacity.
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.entries.push_back(TranscriptEntry { speaker, text: text.into() });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    /// Entries rendered as `"AI: …"` / `"You: …"` lines.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRANSCRIPT_CAPACITY)
    }
}
