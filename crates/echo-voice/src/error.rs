//! Conversation engine error types.

use crate::capability::RecognitionErrorKind;

/// Errors that can occur anywhere in the conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// No audio input device found.
    #[error("No audio input device found")]
    NoInputDevice,

    /// Failed to open audio input stream.
    #[error("Failed to open audio input stream: {0}")]
    InputStreamError(String),

    /// Failed to open audio output stream.
    #[error("Failed to open audio output stream: {0}")]
    OutputStreamError(String),

    /// Microphone permission denied.
    #[error("Microphone permission denied")]
    MicrophonePermissionDenied,

    /// The speech recognizer reported a failure.
    #[error("Speech recognition failed: {0}")]
    RecognitionFailed(RecognitionErrorKind),

    /// Could not reach the model endpoint.
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    /// The model endpoint answered with a non-2xx status.
    #[error("Model API error: {status} - {message}")]
    ModelStatus { status: u16, message: String },

    /// The model token stream could not be parsed.
    #[error("Malformed model stream: {0}")]
    MalformedStream(String),

    /// Could not reach the speech synthesis endpoint.
    #[error("Speech synthesis request failed: {0}")]
    SynthesisRequest(String),

    /// The speech synthesis endpoint answered with a non-2xx status.
    #[error("Speech synthesis error: {status} - {message}")]
    SynthesisStatus { status: u16, message: String },

    /// A synthesized audio segment could not be decoded.
    #[error("Audio decode failed: {0}")]
    Decode(String),

    /// The audio output thread exited unexpectedly.
    #[error("Audio thread died")]
    AudioThreadDied,

    /// A session is already active.
    #[error("Conversation session is already active")]
    AlreadyActive,

    /// No session is active.
    #[error("Conversation session is not active")]
    NotActive,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation belonged to a cancelled turn.
    #[error("Voice operation cancelled")]
    Cancelled,
}

/// Coarse classification used to route a fault to its handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Microphone / recognition faults: retried locally.
    Capture,
    /// Model or synthesis HTTP faults: surfaced once, turn discarded.
    Transport,
    /// A turn was aborted on purpose. Never surfaced.
    Cancellation,
    /// A single audio segment was unusable. Skipped.
    Decode,
    /// Session lifecycle and local device faults.
    Session,
}

impl VoiceError {
    /// Classify this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NoInputDevice
            | Self::InputStreamError(_)
            | Self::MicrophonePermissionDenied
            | Self::RecognitionFailed(_) => ErrorClass::Capture,
            Self::ModelRequest(_)
            | Self::ModelStatus { .. }
            | Self::MalformedStream(_)
            | Self::SynthesisRequest(_)
            | Self::SynthesisStatus { .. } => ErrorClass::Transport,
            Self::Cancelled => ErrorClass::Cancellation,
            Self::Decode(_) => ErrorClass::Decode,
            Self::OutputStreamError(_)
            | Self::AudioThreadDied
            | Self::AlreadyActive
            | Self::NotActive
            | Self::Io(_) => ErrorClass::Session,
        }
    }

    /// Whether a capture fault leaves the device unusable, so retrying is
    /// pointless and the session has to stop.
    #[must_use]
    pub const fn is_fatal_capture(&self) -> bool {
        matches!(
            self,
            Self::MicrophonePermissionDenied
                | Self::NoInputDevice
                | Self::RecognitionFailed(RecognitionErrorKind::PermissionDenied)
        )
    }
}
