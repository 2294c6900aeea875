//! Engine configuration.
//!
//! Every struct deserializes with `#[serde(default)]`, so a partial TOML file
//! or an empty one yields the tuned defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default persona for the assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a warm, emotionally expressive, and engaging AI \
companion named Echo. You speak to the user like a close friend you genuinely care about. You \
have a playful, empathetic personality. Use natural, conversational language, react to the \
user's emotional tone, ask follow-up questions that show interest in their life, and be helpful \
and informative when needed while keeping your replies comfortable to listen to. Your words are \
spoken aloud, so avoid lists, tables and code.";

/// Top-level configuration for a conversation session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    pub endpointer: EndpointerConfig,
    pub segmenter: SegmenterConfig,
    pub scheduler: SchedulerConfig,
    pub model: ModelConfig,
    pub synthesis: SynthesisConfig,
}

// ── Endpointer ─────────────────────────────────────────────────────

/// Speech capture and end-of-utterance detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointerConfig {
    /// Recognition language (fixed for the whole session).
    pub language: String,

    /// Interval between volume polls (ms, default 100).
    pub poll_interval_ms: u64,

    /// Spectral level above which a poll counts as speech (default 0.015).
    /// Silence reads 0.0 and loud speech goes past 1.0.
    pub volume_threshold: f32,

    /// Continuous silence that ends an utterance (ms, default 1000).
    pub silence_duration_ms: u64,

    /// Shortest transcript worth emitting, in characters (default 2).
    pub min_transcript_chars: usize,

    /// Fixed part of the retry delay (ms, default 200).
    pub retry_base_delay_ms: u64,

    /// Added per retry attempt (ms, default 500).
    pub retry_step_ms: u64,

    /// Retries before a hard restart is forced (default 5).
    pub max_retries: u32,

    /// Pause between stopping and re-acquiring capture (ms, default 200).
    pub restart_delay_ms: u64,

    /// Delay before capture resumes once the assistant stops talking
    /// (ms, default 200). Keeps the playback tail out of the transcript.
    pub peer_resume_delay_ms: u64,

    /// Level the user has to exceed to interrupt playback (default 0.5).
    pub barge_in_threshold: f32,

    /// Consecutive loud polls needed to raise a barge-in (default 2).
    pub barge_in_ticks: u32,
}

impl Default for EndpointerConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            poll_interval_ms: 100,
            volume_threshold: 0.015,
            silence_duration_ms: 1000,
            min_transcript_chars: 2,
            retry_base_delay_ms: 200,
            retry_step_ms: 500,
            max_retries: 5,
            restart_delay_ms: 200,
            peer_resume_delay_ms: 200,
            barge_in_threshold: 0.5,
            barge_in_ticks: 2,
        }
    }
}

impl EndpointerConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub const fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms + self.retry_step_ms * attempt as u64)
    }

    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    #[must_use]
    pub const fn peer_resume_delay(&self) -> Duration {
        Duration::from_millis(self.peer_resume_delay_ms)
    }
}

// ── Segmenter ──────────────────────────────────────────────────────

/// Chunking thresholds for the streamed reply, in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SegmenterConfig {
    /// A sentence group is flushed once it grows past this (default 250).
    pub sentence_group_chars: usize,

    /// Unpunctuated text longer than this is force-broken (default 200).
    pub force_break_after_chars: usize,

    /// Window searched for a soft boundary when forcing (default 250).
    pub force_break_window_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sentence_group_chars: 250,
            force_break_after_chars: 200,
            force_break_window_chars: 250,
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────────

/// Gapless playback settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Overlap between consecutive segments (ms, default 50).
    pub overlap_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { overlap_ms: 50 }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn overlap(&self) -> Duration {
        Duration::from_millis(self.overlap_ms)
    }
}

// ── Model ──────────────────────────────────────────────────────────

/// Streaming chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    /// Bearer token. Usually supplied through the environment, not the file.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    /// Upper bound for one whole streamed reply (ms, default 60 000).
    pub request_timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.8,
            presence_penalty: 0.6,
            frequency_penalty: 0.5,
            request_timeout_ms: 60_000,
        }
    }
}

impl ModelConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ── Synthesis ──────────────────────────────────────────────────────

/// Text-to-speech endpoint (`POST {text}` → `audio/mpeg`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub endpoint: String,
    /// Per-request timeout (ms, default 20 000).
    pub request_timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3001/tts".to_string(),
            request_timeout_ms: 20_000,
        }
    }
}

impl SynthesisConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
