//! Hand-written capability doubles shared by the integration tests.
//!
//! Every mock keeps its state behind an `Arc<Mutex<_>>` so a test can hold a
//! clone and inspect or steer the device after it has been moved into the
//! engine. Clocks read tokio's `Instant`, so `start_paused` tests see
//! deterministic times.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use echo_voice::{
    AudioCapturer, AudioPlayer, ChatModel, DecodedAudio, RecognitionConfig, RecognitionErrorKind,
    RecognitionEvent, SpeechRecognizer, SpeechSynthesizer, VoiceError, VoiceId,
    capability::{ChatMessage, TokenStream},
};
use futures_util::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap()
}

// ── Recognizer ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecognizerState {
    pub starts: Vec<Instant>,
    pub stops: usize,
    /// `start` called while a stream was still open.
    pub overlapping_starts: usize,
    pub active: Option<mpsc::UnboundedSender<RecognitionEvent>>,
    /// Every new stream fails with this right away.
    pub fail_with: Option<RecognitionErrorKind>,
}

#[derive(Clone, Default)]
pub struct MockRecognizer {
    pub state: Arc<Mutex<RecognizerState>>,
}

impl MockRecognizer {
    pub fn failing(kind: RecognitionErrorKind) -> Self {
        let recognizer = Self::default();
        lock(&recognizer.state).fail_with = Some(kind);
        recognizer
    }

    pub fn say(&self, text: &str, is_final: bool) {
        let state = lock(&self.state);
        if let Some(tx) = &state.active {
            let _ = tx.send(RecognitionEvent::Result {
                text: text.to_string(),
                is_final,
            });
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    pub fn start_count(&self) -> usize {
        lock(&self.state).starts.len()
    }

    pub fn start_gaps(&self) -> Vec<Duration> {
        let state = lock(&self.state);
        state
            .starts
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn start(
        &mut self,
        config: &RecognitionConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, VoiceError> {
        assert!(config.continuous && config.interim_results);

        let mut state = lock(&self.state);
        if state.active.is_some() {
            state.overlapping_starts += 1;
        }
        state.starts.push(Instant::now());

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(kind) = state.fail_with.clone() {
            let _ = tx.send(RecognitionEvent::Error(kind));
        }
        state.active = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        if state.active.take().is_some() {
            state.stops += 1;
        }
    }
}

// ── Capturer ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct CapturerState {
    /// Peak amplitude of the broadband noise in the analysis window.
    pub level: f32,
    pub acquired: bool,
    pub acquires: usize,
    pub releases: usize,
    pub deny: bool,
}

#[derive(Clone, Default)]
pub struct MockCapturer {
    pub state: Arc<Mutex<CapturerState>>,
}

impl MockCapturer {
    pub fn denied() -> Self {
        let capturer = Self::default();
        lock(&capturer.state).deny = true;
        capturer
    }

    pub fn set_level(&self, level: f32) {
        lock(&self.state).level = level;
    }

    pub fn is_acquired(&self) -> bool {
        lock(&self.state).acquired
    }

    pub fn releases(&self) -> usize {
        lock(&self.state).releases
    }
}

#[async_trait]
impl AudioCapturer for MockCapturer {
    async fn acquire(&mut self) -> Result<(), VoiceError> {
        let mut state = lock(&self.state);
        if state.deny {
            return Err(VoiceError::MicrophonePermissionDenied);
        }
        if !state.acquired {
            state.acquired = true;
            state.acquires += 1;
        }
        Ok(())
    }

    fn analysis_window(&mut self) -> Option<Vec<f32>> {
        let state = lock(&self.state);
        state.acquired.then(|| noise(state.level, 512))
    }

    fn release(&mut self) {
        let mut state = lock(&self.state);
        if state.acquired {
            state.acquired = false;
            state.releases += 1;
        }
    }

    fn is_acquired(&self) -> bool {
        lock(&self.state).acquired
    }
}

/// Deterministic white noise in `-amplitude..amplitude`. The level meter
/// reads it at roughly 0.12 for 0.001, 0.36 for 0.003, 0.65 for 0.01 and
/// 1.2 for 0.1.
pub fn noise(amplitude: f32, len: usize) -> Vec<f32> {
    let mut seed: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            #[allow(clippy::cast_precision_loss)]
            let unit = (seed >> 8) as f32 / 16_777_216.0;
            (unit * 2.0 - 1.0) * amplitude
        })
        .collect()
}

// ── Player ─────────────────────────────────────────────────────────

/// Encoded test audio: `"<millis>ms:<label>"`, e.g. `"500ms:first"`.
/// Anything else fails to decode.
pub fn audio(duration_ms: u64, label: &str) -> Bytes {
    Bytes::from(format!("{duration_ms}ms:{label}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Played {
    pub voice: VoiceId,
    pub label: String,
    pub start: Duration,
    pub duration: Duration,
}

#[derive(Default)]
pub struct PlayerState {
    pub played: Vec<Played>,
    pub voice_stops: Vec<(VoiceId, Duration)>,
    pub stop_all_calls: usize,
    pub closed: bool,
    pub decode_delay: Duration,
    /// Labels of decoded segments not yet played, in decode order.
    decoded: VecDeque<String>,
}

#[derive(Clone)]
pub struct MockPlayer {
    pub state: Arc<Mutex<PlayerState>>,
    epoch: Instant,
    next_voice: u64,
}

impl Default for MockPlayer {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            epoch: Instant::now(),
            next_voice: 0,
        }
    }
}

impl MockPlayer {
    pub fn played(&self) -> Vec<Played> {
        lock(&self.state).played.clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.played().into_iter().map(|p| p.label).collect()
    }

    pub fn stop_all_calls(&self) -> usize {
        lock(&self.state).stop_all_calls
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

fn parse_audio(bytes: &[u8]) -> Option<(Duration, String)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let (ms, label) = text.split_once("ms:")?;
    Some((Duration::from_millis(ms.parse().ok()?), label.to_string()))
}

#[async_trait]
impl AudioPlayer for MockPlayer {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn decode(&mut self, bytes: Bytes) -> Result<DecodedAudio, VoiceError> {
        let delay = lock(&self.state).decode_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (duration, label) =
            parse_audio(&bytes).ok_or_else(|| VoiceError::Decode("not audio".to_string()))?;
        // The scheduler plays each segment right after decoding it.
        lock(&self.state).decoded.push_back(label);
        Ok(DecodedAudio {
            samples: Vec::new(),
            channels: 1,
            sample_rate: 16_000,
            duration,
        })
    }

    fn play_at(&mut self, audio: DecodedAudio, start: Duration) -> Result<VoiceId, VoiceError> {
        let voice = VoiceId(self.next_voice);
        self.next_voice += 1;

        let mut state = lock(&self.state);
        let label = state.decoded.pop_front().unwrap_or_default();
        state.played.push(Played {
            voice,
            label,
            start,
            duration: audio.duration,
        });
        Ok(voice)
    }

    fn stop_voice(&mut self, voice: VoiceId, at: Duration) {
        lock(&self.state).voice_stops.push((voice, at));
    }

    fn stop_all(&mut self) {
        lock(&self.state).stop_all_calls += 1;
    }

    fn close(&mut self) {
        lock(&self.state).closed = true;
    }
}

// ── Providers ──────────────────────────────────────────────────────

/// Replies with a fixed token script, or fails the request outright.
pub struct ScriptedModel {
    pub tokens: Vec<&'static str>,
    pub reject: Option<(u16, &'static str)>,
}

impl ScriptedModel {
    pub fn replying(tokens: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            reject: None,
        })
    }

    pub fn rejecting(status: u16, message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            tokens: Vec::new(),
            reject: Some((status, message)),
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_reply(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, VoiceError> {
        assert_eq!(messages.len(), 2);
        if let Some((status, message)) = self.reject {
            return Err(VoiceError::ModelStatus {
                status,
                message: message.to_string(),
            });
        }
        let tokens: Vec<Result<String, VoiceError>> =
            self.tokens.iter().map(|t| Ok((*t).to_string())).collect();
        Ok(stream::iter(tokens).boxed())
    }
}

/// Synthesizes `"<ms>ms:<text>"` after a per-text latency.
pub struct MockSynthesizer {
    pub duration_ms: u64,
    /// Latency for texts starting with the given prefix.
    pub latency: Vec<(&'static str, Duration)>,
    /// Texts starting with this prefix are rejected with a 500.
    pub fail_on: Option<&'static str>,
    pub requests: Mutex<Vec<String>>,
    /// Requests that ran to completion or failure, not dropped midway.
    pub completed: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            latency: Vec::new(),
            fail_on: None,
            requests: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, prefix: &'static str) -> Self {
        self.fail_on = Some(prefix);
        self
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn completed(&self) -> Vec<String> {
        lock(&self.completed).clone()
    }

    pub fn with_latency(mut self, prefix: &'static str, latency: Duration) -> Self {
        self.latency.push((prefix, latency));
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes, VoiceError> {
        lock(&self.requests).push(text.to_string());
        let latency = self
            .latency
            .iter()
            .find(|(prefix, _)| text.starts_with(prefix))
            .map_or(Duration::from_millis(10), |(_, latency)| *latency);
        tokio::time::sleep(latency).await;
        lock(&self.completed).push(text.to_string());

        if self.fail_on.is_some_and(|prefix| text.starts_with(prefix)) {
            return Err(VoiceError::SynthesisStatus {
                status: 500,
                message: "voice unavailable".to_string(),
            });
        }
        Ok(audio(self.duration_ms, text))
    }
}

/// Drain everything currently buffered on `rx`.
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}
