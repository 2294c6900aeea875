//! Capability interfaces injected into the engine.
//!
//! These traits decouple the components from any concrete device or
//! provider, so the same engine runs against local hardware, a remote
//! browser session or test doubles:
//!
//! | Trait | Used by | Local implementation |
//! |---|---|---|
//! | [`SpeechRecognizer`] | endpointer | provided by the host |
//! | [`AudioCapturer`] | endpointer | [`CpalCapturer`](crate::local::CpalCapturer) |
//! | [`AudioPlayer`] | playback scheduler | [`RodioPlayer`](crate::local::RodioPlayer) |
//! | [`ChatModel`] | segmenter | [`OpenAiChatModel`](crate::providers::OpenAiChatModel) |
//! | [`SpeechSynthesizer`] | orchestrator | [`HttpSynthesizer`](crate::providers::HttpSynthesizer) |
//!
//! Device traits take `&mut self` and are owned by exactly one component
//! task for the lifetime of a session. Provider traits take `&self` and are
//! shared behind an `Arc`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::VoiceError;

// ── Speech recognition ─────────────────────────────────────────────

/// Options for one recognition stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Keep recognising across pauses instead of stopping after one phrase.
    pub continuous: bool,
    /// Deliver non-final hypotheses as they form.
    pub interim_results: bool,
    /// BCP-47 language tag, fixed per session.
    pub language: String,
}

impl RecognitionConfig {
    /// Continuous recognition with interim results in `language`.
    #[must_use]
    pub fn continuous(language: impl Into<String>) -> Self {
        Self {
            continuous: true,
            interim_results: true,
            language: language.into(),
        }
    }
}

/// Failure kinds a recognizer can report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecognitionErrorKind {
    /// Nothing was heard for the recognizer's own timeout.
    NoSpeech,
    /// The audio device dropped out.
    AudioCapture,
    /// The user or OS refused microphone access.
    PermissionDenied,
    /// Anything else the provider reports.
    Other(String),
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpeech => f.write_str("no-speech"),
            Self::AudioCapture => f.write_str("audio-capture"),
            Self::PermissionDenied => f.write_str("permission-denied"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// Events produced by a running recognition stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A hypothesis. Final results are delivered once each.
    Result { text: String, is_final: bool },
    /// The stream failed. An `End` usually follows.
    Error(RecognitionErrorKind),
    /// The stream closed.
    End,
}

/// Black-box speech-to-text service.
pub trait SpeechRecognizer: Send {
    /// Open a recognition stream.
    ///
    /// Events arrive on the returned receiver until [`stop`](Self::stop) is
    /// called or the provider ends the stream.
    fn start(
        &mut self,
        config: &RecognitionConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, VoiceError>;

    /// Tear the current stream down. Idempotent.
    fn stop(&mut self);
}

// ── Microphone ─────────────────────────────────────────────────────

/// Microphone handle used for volume analysis.
#[async_trait]
pub trait AudioCapturer: Send {
    /// Open the input device. A second call while acquired is a no-op.
    ///
    /// Opening can wait on the OS (permission prompts, device wake-up), so it
    /// must not block the calling task.
    async fn acquire(&mut self) -> Result<(), VoiceError>;

    /// The most recent analysis window of mono PCM samples in `-1.0..=1.0`,
    /// or `None` when the device is not acquired.
    fn analysis_window(&mut self) -> Option<Vec<f32>>;

    /// Close the input device. Idempotent.
    fn release(&mut self);

    /// Whether the device is currently open.
    fn is_acquired(&self) -> bool;
}

// ── Speaker ────────────────────────────────────────────────────────

/// Identifies one scheduled playback voice on an [`AudioPlayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// PCM produced by decoding a synthesized segment.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub duration: Duration,
}

impl DecodedAudio {
    /// Build from interleaved samples, deriving the duration.
    #[must_use]
    pub fn from_samples(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let frames = samples.len() / usize::from(channels.max(1));
        #[allow(clippy::cast_precision_loss)]
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(frames as f64 / f64::from(sample_rate))
        };
        Self {
            samples,
            channels,
            sample_rate,
            duration,
        }
    }
}

/// Audio output context with its own monotonic clock.
///
/// All times are offsets on [`now`](Self::now)'s clock, which starts when
/// the context is opened.
#[async_trait]
pub trait AudioPlayer: Send {
    /// Current audio-clock time.
    fn now(&self) -> Duration;

    /// Decode an encoded segment (mp3, wav, …) to PCM.
    async fn decode(&mut self, bytes: Bytes) -> Result<DecodedAudio, VoiceError>;

    /// Start `audio` at clock time `start` (immediately if already past).
    fn play_at(&mut self, audio: DecodedAudio, start: Duration) -> Result<VoiceId, VoiceError>;

    /// Stop one voice at clock time `at` (immediately if already past).
    fn stop_voice(&mut self, voice: VoiceId, at: Duration);

    /// Silence every voice now.
    fn stop_all(&mut self);

    /// Release the output device. Idempotent.
    fn close(&mut self);
}

// ── Providers ──────────────────────────────────────────────────────

/// One message of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Ordered incremental text fragments of one model reply.
pub type TokenStream = BoxStream<'static, Result<String, VoiceError>>;

/// Black-box streaming language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the conversation and return its reply as a token stream.
    ///
    /// Non-2xx answers fail here; transport faults mid-stream surface as
    /// `Err` items.
    async fn stream_reply(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, VoiceError>;
}

/// Black-box text-to-speech service.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one chunk of text to encoded audio bytes.
    async fn synthesize(&self, text: &str) -> Result<Bytes, VoiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoded_duration_accounts_for_channels() {
        let audio = DecodedAudio::from_samples(vec![0.0; 48_000], 2, 24_000);
        assert_eq!(audio.duration, Duration::from_secs(1));
    }

    #[test]
    fn recognition_error_kinds_display_like_wire_names() {
        assert_eq!(RecognitionErrorKind::NoSpeech.to_string(), "no-speech");
        assert_eq!(RecognitionErrorKind::AudioCapture.to_string(), "audio-capture");
    }
}
