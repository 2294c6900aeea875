//! Duplex spoken conversation engine.
//!
//! Captures the user's speech, decides when they stopped talking, streams a
//! model reply, turns it into speech chunk by chunk and plays it back without
//! gaps, while staying ready to cut itself off the moment the user talks
//! over it.
//!
//! ```text
//!   mic ──► SpeechCaptureEndpointer ──► Utterance
//!                                          │
//!                                          ▼
//!                              ConversationOrchestrator
//!                                          │ model request
//!                                          ▼
//!            ResponseStreamSegmenter (TextNormalizer) ──► TextChunk (ordered)
//!                                          │ synthesis (parallel)
//!                                          ▼
//!            reorder by sequence ──► AudioPlaybackScheduler ──► speaker
//! ```

#![deny(unused_crate_dependencies)]

pub mod capability;
pub mod config;
pub mod endpointer;
pub mod error;
pub mod level;
#[cfg(feature = "local-audio")]
pub mod local;
pub mod orchestrator;
pub mod playback;
pub mod providers;
pub mod schedule;
pub mod segmenter;
pub mod sse;
pub mod text;
pub mod types;

// Re-export key types for convenience
pub use capability::{
    AudioCapturer, AudioPlayer, ChatModel, DecodedAudio, RecognitionConfig, RecognitionErrorKind,
    RecognitionEvent, SpeechRecognizer, SpeechSynthesizer, VoiceId,
};
pub use config::VoiceConfig;
pub use endpointer::{EndpointerEvent, EndpointerHandle, SpeechCaptureEndpointer};
pub use error::{ErrorClass, VoiceError};
pub use orchestrator::{ConversationEvent, ConversationOrchestrator, SessionDevices};
pub use playback::{AudioPlaybackScheduler, SchedulerEvent};
pub use segmenter::{ResponseStreamSegmenter, StreamOutcome};
pub use text::normalize;
pub use types::{AudioSegment, ConversationTurn, Role, SessionState, TextChunk, Utterance};
