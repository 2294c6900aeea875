//! Conversation data model shared by every component.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Session state ──────────────────────────────────────────────────

/// Where the conversation currently is.
///
/// ```text
///   Inactive ─► Listening ─► Awaiting ─► Speaking ─► Listening …
///                  ▲            │            │
///                  └────────────┴────────────┘  (error / barge-in / idle)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// No session. Microphone and speaker are released.
    #[default]
    Inactive,

    /// Capturing user speech.
    Listening,

    /// An utterance is being answered; no audio has been queued yet.
    Awaiting,

    /// Assistant audio is queued or playing.
    Speaking,
}

// ── Utterance ──────────────────────────────────────────────────────

/// One block of user speech, ended by a silence timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub is_final: bool,
    pub created_at: DateTime<Utc>,
}

impl Utterance {
    /// A finalized utterance stamped with the current time.
    #[must_use]
    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            created_at: Utc::now(),
        }
    }
}

// ── Conversation turn ──────────────────────────────────────────────

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One side of an exchange. The assistant side grows as chunks arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub complete: bool,
}

impl ConversationTurn {
    /// A finished user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            complete: true,
        }
    }

    /// An empty assistant placeholder awaiting chunks.
    #[must_use]
    pub const fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            complete: false,
        }
    }

    /// Append one chunk of assistant speech, space-separated.
    pub fn append_chunk(&mut self, text: &str) {
        if !self.content.is_empty() && !text.is_empty() {
            self.content.push(' ');
        }
        self.content.push_str(text);
    }
}

// ── Text chunk ─────────────────────────────────────────────────────

/// A bounded, normalized span of assistant text sent for synthesis as one
/// unit. Ordered by `sequence_index`, which matches generation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub sequence_index: u64,
    pub text: String,
}

// ── Audio segment ──────────────────────────────────────────────────

/// Synthesized audio for one chunk, owned by the playback scheduler from
/// arrival until it has played or been flushed.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub sequence_index: u64,
    pub raw_bytes: Bytes,
    /// Filled in once the scheduler has decoded the bytes.
    pub decoded_duration: Option<Duration>,
    /// Audio-clock time the segment was scheduled to start at.
    pub scheduled_start: Option<Duration>,
}

impl AudioSegment {
    #[must_use]
    pub const fn new(sequence_index: u64, raw_bytes: Bytes) -> Self {
        Self {
            sequence_index,
            raw_bytes,
            decoded_duration: None,
            scheduled_start: None,
        }
    }
}
