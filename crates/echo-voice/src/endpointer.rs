//! Speech capture and end-of-utterance detection.
//!
//! The endpointer owns the microphone and the recognition stream for one
//! session and runs as a single task:
//!
//! ```text
//!   Idle ─► Acquiring ─► Listening ─► Cooldown ─┬─► emit & restart ─► Listening
//!                           ▲          (silence) └─► error retry ─────┘
//!                           │
//!                       Suspended (peer speaking: volume meter only)
//! ```
//!
//! Every `poll_interval` the capturer's analysis window is reduced to a
//! spectral level by the [`LevelMeter`]. Below `volume_threshold` the silence timer runs; once it reaches
//! `silence_duration` with a transcript of at least `min_transcript_chars`,
//! the transcript is emitted as an [`Utterance`] and recognition restarts.
//!
//! Recognition failures are retried with `retry_base_delay + retry_step ×
//! attempt`. After `max_retries` the microphone itself is released and
//! re-acquired, and the counter starts over.
//!
//! While the peer (the assistant) speaks, recognition is torn down so the
//! assistant cannot hear itself. Only the volume meter keeps running, with a
//! higher threshold, to detect barge-in. The microphone is re-opened for it
//! if a hard restart had released it.

use std::fmt::Display;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capability::{
    AudioCapturer, RecognitionConfig, RecognitionErrorKind, RecognitionEvent, SpeechRecognizer,
};
use crate::config::EndpointerConfig;
use crate::error::VoiceError;
use crate::level::LevelMeter;
use crate::schedule::TaskSlot;
use crate::types::Utterance;

// ── Events and commands ────────────────────────────────────────────

/// Events emitted by the endpointer.
#[derive(Debug)]
pub enum EndpointerEvent {
    /// The user finished speaking.
    Utterance(Utterance),

    /// Speech energy was detected. While the peer is speaking this is the
    /// barge-in signal, raised once per speaking period.
    InterimActivity,

    /// Microphone level (0.0–1.0), for UI visualisation.
    AudioLevel(f32),

    /// Capture is unusable and the endpointer has stopped.
    Fatal(VoiceError),
}

enum Command {
    SetPeerSpeaking(bool),
    Stop(oneshot::Sender<()>),
}

/// Where the capture loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CapturePhase {
    Idle,
    Acquiring,
    Listening,
    Cooldown,
    Restarting,
    Suspended,
}

/// Delayed actions of the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// Start a new recognition stream.
    Restart,
    /// Re-acquire the microphone, then start recognition.
    HardRestart,
}

// ── Handle ─────────────────────────────────────────────────────────

/// Control handle for a running endpointer. Dropping every handle stops it.
#[derive(Clone)]
pub struct EndpointerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl EndpointerHandle {
    /// Tell the endpointer whether the assistant is currently audible.
    pub fn set_peer_speaking(&self, speaking: bool) {
        if self.commands.send(Command::SetPeerSpeaking(speaking)).is_err() {
            debug!("Endpointer already stopped");
        }
    }

    /// Stop capture and wait until the microphone has been released.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Whether the capture task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

// ── Endpointer ─────────────────────────────────────────────────────

/// Owns the microphone and recognition stream for one session.
pub struct SpeechCaptureEndpointer {
    config: EndpointerConfig,
    recognizer: Box<dyn SpeechRecognizer>,
    capturer: Box<dyn AudioCapturer>,
    meter: LevelMeter,
    events: mpsc::UnboundedSender<EndpointerEvent>,
    session: CancellationToken,

    phase: CapturePhase,
    recognition: Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
    pending: TaskSlot<Pending>,
    retry_count: u32,

    final_text: String,
    interim_text: String,
    silence_since: Option<Instant>,
    hearing_speech: bool,

    peer_speaking: bool,
    loud_polls: u32,
    barge_in_raised: bool,
    fatal: bool,
}

impl SpeechCaptureEndpointer {
    /// Acquire the microphone and spawn the capture loop.
    ///
    /// Fails only when the microphone cannot be opened at all; recognition
    /// failures after that are retried inside the loop.
    pub async fn start_session(
        config: EndpointerConfig,
        recognizer: Box<dyn SpeechRecognizer>,
        capturer: Box<dyn AudioCapturer>,
    ) -> Result<(EndpointerHandle, mpsc::UnboundedReceiver<EndpointerEvent>), VoiceError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut endpointer = Self {
            config,
            recognizer,
            capturer,
            meter: LevelMeter::new(),
            events: event_tx,
            session: CancellationToken::new(),
            phase: CapturePhase::Idle,
            recognition: None,
            pending: TaskSlot::default(),
            retry_count: 0,
            final_text: String::new(),
            interim_text: String::new(),
            silence_since: None,
            hearing_speech: false,
            peer_speaking: false,
            loud_polls: 0,
            barge_in_raised: false,
            fatal: false,
        };

        endpointer.set_phase(CapturePhase::Acquiring);
        endpointer.capturer.acquire().await?;
        info!(language = %endpointer.config.language, "Speech capture started");

        tokio::spawn(endpointer.run(command_rx));
        Ok((
            EndpointerHandle {
                commands: command_tx,
            },
            event_rx,
        ))
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.start_recognition().await;

        let stop_ack = loop {
            if self.fatal {
                break None;
            }

            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::SetPeerSpeaking(speaking)) => {
                        self.set_peer_speaking(speaking).await;
                    }
                    Some(Command::Stop(ack)) => break Some(ack),
                    None => break None,
                },
                action = self.pending.fired() => self.on_pending(action).await,
                event = next_recognition_event(&mut self.recognition) => self.on_recognition(event),
                _ = poll.tick() => self.on_poll(),
            }
        };

        self.teardown();
        if let Some(ack) = stop_ack {
            let _ = ack.send(());
        }
    }

    // ── Volume polling ─────────────────────────────────────────────

    fn on_poll(&mut self) {
        let Some(window) = self.capturer.analysis_window() else {
            return;
        };
        let level = self.meter.level(&window);
        self.emit(EndpointerEvent::AudioLevel(display_level(level)));

        if self.peer_speaking {
            self.detect_barge_in(level);
            return;
        }
        if self.recognition.is_none() {
            return;
        }

        if is_speech(level, self.config.volume_threshold) {
            self.silence_since = None;
            if !self.hearing_speech {
                self.hearing_speech = true;
                self.emit(EndpointerEvent::InterimActivity);
            }
            if self.phase == CapturePhase::Cooldown {
                self.set_phase(CapturePhase::Listening);
            }
            return;
        }

        self.hearing_speech = false;
        let now = Instant::now();
        let since = *self.silence_since.get_or_insert(now);

        let transcript_chars = self.transcript().chars().count();
        if transcript_chars == 0 {
            return;
        }
        self.set_phase(CapturePhase::Cooldown);

        if now.duration_since(since) >= self.config.silence_duration()
            && transcript_chars >= self.config.min_transcript_chars
        {
            self.finalize_utterance();
        }
    }

    fn detect_barge_in(&mut self, level: f32) {
        if is_speech(level, self.config.barge_in_threshold) {
            self.loud_polls += 1;
        } else {
            self.loud_polls = 0;
        }

        if self.loud_polls >= self.config.barge_in_ticks && !self.barge_in_raised {
            self.barge_in_raised = true;
            info!(level, "Barge-in detected");
            self.emit(EndpointerEvent::InterimActivity);
        }
    }

    fn finalize_utterance(&mut self) {
        let text = self.transcript();
        self.final_text.clear();
        self.interim_text.clear();
        self.silence_since = None;

        info!(chars = text.len(), "Utterance finalized");
        self.emit(EndpointerEvent::Utterance(Utterance::finalized(text)));

        self.stop_recognition();
        self.set_phase(CapturePhase::Restarting);
        self.pending
            .schedule(Pending::Restart, self.config.restart_delay(), &self.session);
    }

    fn transcript(&self) -> String {
        let final_text = self.final_text.trim();
        let interim = self.interim_text.trim();
        match (final_text.is_empty(), interim.is_empty()) {
            (_, true) => final_text.to_string(),
            (true, false) => interim.to_string(),
            (false, false) => format!("{final_text} {interim}"),
        }
    }

    // ── Recognition stream ─────────────────────────────────────────

    fn on_recognition(&mut self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Result { text, is_final } => {
                self.retry_count = 0;
                if is_final {
                    let text = text.trim();
                    if !text.is_empty() {
                        if !self.final_text.is_empty() {
                            self.final_text.push(' ');
                        }
                        self.final_text.push_str(text);
                    }
                    self.interim_text.clear();
                } else {
                    self.interim_text = text;
                    if !self.hearing_speech {
                        self.hearing_speech = true;
                        self.emit(EndpointerEvent::InterimActivity);
                    }
                }
            }
            RecognitionEvent::Error(RecognitionErrorKind::PermissionDenied) => {
                self.fail(VoiceError::RecognitionFailed(
                    RecognitionErrorKind::PermissionDenied,
                ));
            }
            RecognitionEvent::Error(kind) => {
                self.stop_recognition();
                self.schedule_retry(&kind);
            }
            RecognitionEvent::End => {
                self.recognition = None;
                if !self.peer_speaking {
                    self.schedule_retry(&"recognition ended");
                }
            }
        }
    }

    async fn start_recognition(&mut self) {
        // At most one recognition stream, and none while the peer speaks.
        if self.peer_speaking || self.recognition.is_some() || self.fatal {
            return;
        }

        if !self.capturer.is_acquired() {
            self.set_phase(CapturePhase::Acquiring);
            if let Err(e) = self.capturer.acquire().await {
                self.on_start_failure(e);
                return;
            }
        }

        let config = RecognitionConfig::continuous(self.config.language.clone());
        match self.recognizer.start(&config) {
            Ok(events) => {
                self.recognition = Some(events);
                self.silence_since = None;
                self.hearing_speech = false;
                self.set_phase(CapturePhase::Listening);
            }
            Err(e) => self.on_start_failure(e),
        }
    }

    fn on_start_failure(&mut self, e: VoiceError) {
        if e.is_fatal_capture() {
            self.fail(e);
        } else {
            self.schedule_retry(&e);
        }
    }

    fn stop_recognition(&mut self) {
        if self.recognition.take().is_some() {
            self.recognizer.stop();
        }
    }

    fn schedule_retry(&mut self, reason: &dyn Display) {
        self.retry_count += 1;
        self.set_phase(CapturePhase::Restarting);

        if self.retry_count > self.config.max_retries {
            warn!(%reason, "Recognition retries exhausted, restarting capture");
            self.retry_count = 0;
            self.stop_recognition();
            self.capturer.release();
            self.pending
                .schedule(Pending::HardRestart, self.config.restart_delay(), &self.session);
            return;
        }

        let delay = self.config.retry_delay(self.retry_count);
        warn!(
            attempt = self.retry_count,
            max = self.config.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            %reason,
            "Recognition failed, retrying"
        );
        self.pending.schedule(Pending::Restart, delay, &self.session);
    }

    async fn on_pending(&mut self, action: Pending) {
        debug!(?action, "Scheduled capture action fired");
        match action {
            Pending::Restart => self.start_recognition().await,
            Pending::HardRestart => {
                self.set_phase(CapturePhase::Acquiring);
                match self.capturer.acquire().await {
                    Ok(()) => self.start_recognition().await,
                    Err(e) => self.on_start_failure(e),
                }
            }
        }
    }

    // ── Peer speaking ──────────────────────────────────────────────

    async fn set_peer_speaking(&mut self, speaking: bool) {
        if speaking {
            if self.peer_speaking {
                return;
            }
            self.peer_speaking = true;
            self.pending.cancel();
            self.stop_recognition();
            self.final_text.clear();
            self.interim_text.clear();
            self.silence_since = None;
            self.hearing_speech = false;
            self.loud_polls = 0;
            self.barge_in_raised = false;
            self.set_phase(CapturePhase::Suspended);
            self.ensure_meter().await;
            return;
        }

        self.peer_speaking = false;
        if self.recognition.is_none() && self.pending.pending().is_none() {
            self.set_phase(CapturePhase::Restarting);
            self.pending.schedule(
                Pending::Restart,
                self.config.peer_resume_delay(),
                &self.session,
            );
        }
    }

    /// Barge-in detection needs the microphone even with recognition down,
    /// e.g. when the peer starts speaking during a hard restart.
    async fn ensure_meter(&mut self) {
        if self.capturer.is_acquired() {
            return;
        }
        match self.capturer.acquire().await {
            Ok(()) => debug!("Microphone re-acquired for barge-in detection"),
            Err(e) if e.is_fatal_capture() => self.fail(e),
            Err(e) => warn!(error = %e, "Microphone unavailable, barge-in detection paused"),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    fn fail(&mut self, e: VoiceError) {
        error!(error = %e, "Speech capture unusable, stopping");
        self.fatal = true;
        self.emit(EndpointerEvent::Fatal(e));
    }

    fn teardown(&mut self) {
        self.session.cancel();
        self.pending.cancel();
        self.stop_recognition();
        self.capturer.release();
        self.set_phase(CapturePhase::Idle);
        info!("Speech capture stopped");
    }

    fn set_phase(&mut self, phase: CapturePhase) {
        if self.phase != phase {
            debug!(old = ?self.phase, new = ?phase, "Capture phase transition");
            self.phase = phase;
        }
    }

    fn emit(&self, event: EndpointerEvent) {
        if self.events.send(event).is_err() {
            debug!("Endpointer event receiver dropped");
        }
    }
}

impl Drop for SpeechCaptureEndpointer {
    fn drop(&mut self) {
        // Covers task abort; both calls are idempotent.
        self.recognizer.stop();
        self.capturer.release();
    }
}

async fn next_recognition_event(
    recognition: &mut Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
) -> RecognitionEvent {
    match recognition {
        Some(events) => events.recv().await.unwrap_or(RecognitionEvent::End),
        None => std::future::pending().await,
    }
}

// ── Level helpers ──────────────────────────────────────────────────

/// Whether a level counts as speech against `threshold`.
pub fn is_speech(level: f32, threshold: f32) -> bool {
    level > threshold
}

/// Clamp a meter level to 0.0–1.0 for display.
fn display_level(level: f32) -> f32 {
    level.clamp(0.0, 1.0)
}
