//! Conversation orchestrator: turn-taking and barge-in.
//!
//! ```text
//!   Inactive ─start─► Listening ─utterance─► Awaiting ─first segment─► Speaking
//!                        ▲                      │                         │
//!                        └──── transport error ─┘◄── idle / barge-in ─────┘
//! ```
//!
//! One session task owns the endpointer handle, the playback scheduler and
//! the active turn. Each turn runs a producer task that streams the reply
//! through the [`ResponseStreamSegmenter`], synthesizes chunks in parallel
//! and hands the audio back in sequence order. The session task applies it
//! to the scheduler only while that turn is still current, so nothing from a
//! cancelled turn is ever enqueued.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capability::{AudioCapturer, AudioPlayer, ChatModel, SpeechRecognizer, SpeechSynthesizer};
use crate::config::VoiceConfig;
use crate::endpointer::{EndpointerEvent, EndpointerHandle, SpeechCaptureEndpointer};
use crate::error::{ErrorClass, VoiceError};
use crate::playback::{AudioPlaybackScheduler, SchedulerEvent};
use crate::segmenter::{ResponseStreamSegmenter, StreamOutcome};
use crate::types::{AudioSegment, ConversationTurn, SessionState, TextChunk};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConversationEvent {
    /// Session state transition.
    StateChanged(SessionState),

    /// A finished turn: the user's utterance, or the assistant's reply
    /// (`complete == false` when it was cut off).
    UtteranceRendered(ConversationTurn),

    /// The assistant turn in progress failed and was dropped.
    TurnDiscarded,

    /// A user-visible failure.
    Error(String),

    /// Microphone level (0.0–1.0).
    AudioLevel(f32),
}

/// Devices owned by one session.
pub struct SessionDevices {
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub capturer: Box<dyn AudioCapturer>,
    pub player: Box<dyn AudioPlayer>,
}

// ── Orchestrator ───────────────────────────────────────────────────

/// Host-facing entry point.
pub struct ConversationOrchestrator {
    config: VoiceConfig,
    model: Arc<dyn ChatModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    events: mpsc::UnboundedSender<ConversationEvent>,
    state: Arc<watch::Sender<SessionState>>,
    session: Option<RunningSession>,
}

struct RunningSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConversationOrchestrator {
    pub fn new(
        config: VoiceConfig,
        model: Arc<dyn ChatModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> (Self, mpsc::UnboundedReceiver<ConversationEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Inactive);
        (
            Self {
                config,
                model,
                synthesizer,
                events,
                state: Arc::new(state),
                session: None,
            },
            event_rx,
        )
    }

    /// Acquire the devices and start listening.
    pub async fn start_session(&mut self, devices: SessionDevices) -> Result<(), VoiceError> {
        if self.session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return Err(VoiceError::AlreadyActive);
        }

        let SessionDevices {
            recognizer,
            capturer,
            player,
        } = devices;

        let (endpointer, endpointer_events) = match SpeechCaptureEndpointer::start_session(
            self.config.endpointer.clone(),
            recognizer,
            capturer,
        )
        .await
        {
            Ok(started) => started,
            Err(e) => {
                error!(error = %e, "Failed to start speech capture");
                send_event(&self.events, ConversationEvent::Error(e.to_string()));
                return Err(e);
            }
        };
        let (scheduler, scheduler_events) =
            AudioPlaybackScheduler::new(&self.config.scheduler, player);

        let segmenter = Arc::new(ResponseStreamSegmenter::new(
            Arc::clone(&self.model),
            self.config.model.system_prompt.clone(),
            self.config.segmenter.clone(),
        ));
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = Session {
            endpointer,
            endpointer_events,
            scheduler,
            scheduler_events,
            segmenter,
            synthesizer: Arc::clone(&self.synthesizer),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
            turn: None,
            turn_tx,
            turn_rx,
            next_turn_id: 0,
        };

        info!("Conversation session started");
        session.set_state(SessionState::Listening);
        let task = tokio::spawn(session.run());
        self.session = Some(RunningSession { cancel, task });
        Ok(())
    }

    /// Cancel the active turn, release every device and go inactive.
    pub async fn stop_session(&mut self) -> Result<(), VoiceError> {
        let session = self.session.take().ok_or(VoiceError::NotActive)?;
        session.cancel.cancel();
        if let Err(e) = session.task.await {
            warn!(error = %e, "Session task ended abnormally");
            self.state.send_replace(SessionState::Inactive);
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_session_active(&self) -> bool {
        self.state() != SessionState::Inactive
    }

    pub fn is_listening(&self) -> bool {
        self.state() == SessionState::Listening
    }

    pub fn is_speaking(&self) -> bool {
        self.state() == SessionState::Speaking
    }
}

impl Drop for ConversationOrchestrator {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.cancel();
        }
    }
}

// ── Session task ───────────────────────────────────────────────────

/// Messages from a turn's producer task.
#[derive(Debug)]
enum TurnUpdate {
    /// Synthesized audio for the next chunk, in sequence order.
    Ready {
        turn_id: u64,
        chunk: TextChunk,
        audio: Bytes,
    },
    /// The reply stream ended and every chunk has been delivered, or the
    /// turn failed.
    Finished {
        turn_id: u64,
        result: Result<(), VoiceError>,
    },
}

struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
    reply: ConversationTurn,
    /// The reply is still streaming or being synthesized.
    producing: bool,
    segments_enqueued: usize,
    producer: JoinHandle<()>,
}

struct Session {
    endpointer: EndpointerHandle,
    endpointer_events: mpsc::UnboundedReceiver<EndpointerEvent>,
    scheduler: AudioPlaybackScheduler,
    scheduler_events: mpsc::UnboundedReceiver<SchedulerEvent>,
    segmenter: Arc<ResponseStreamSegmenter>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    events: mpsc::UnboundedSender<ConversationEvent>,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
    turn: Option<ActiveTurn>,
    turn_tx: mpsc::UnboundedSender<TurnUpdate>,
    turn_rx: mpsc::UnboundedReceiver<TurnUpdate>,
    next_turn_id: u64,
}

impl Session {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = self.endpointer_events.recv() => match event {
                    Some(event) => {
                        if !self.on_endpointer(event).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(update) = self.turn_rx.recv() => self.on_turn_update(update).await,
                Some(event) = self.scheduler_events.recv() => self.on_scheduler(event),
            }
        }

        self.cancel_turn().await;
        self.scheduler.close().await;
        self.endpointer.stop().await;
        self.set_state(SessionState::Inactive);
        info!("Conversation session stopped");
    }

    /// Returns `false` when the session has to end.
    async fn on_endpointer(&mut self, event: EndpointerEvent) -> bool {
        match event {
            EndpointerEvent::Utterance(utterance) => {
                if self.turn.is_some() {
                    debug!("New utterance supersedes the turn in flight");
                    self.cancel_turn().await;
                    self.resume_listening();
                }
                self.emit(ConversationEvent::UtteranceRendered(ConversationTurn::user(
                    utterance.text.clone(),
                )));
                self.start_turn(utterance.text);
            }
            EndpointerEvent::InterimActivity => {
                if self.current_state() == SessionState::Speaking {
                    self.barge_in().await;
                }
            }
            EndpointerEvent::AudioLevel(level) => self.emit(ConversationEvent::AudioLevel(level)),
            EndpointerEvent::Fatal(e) => {
                error!(error = %e, "Speech capture failed, ending session");
                self.emit(ConversationEvent::Error(e.to_string()));
                return false;
            }
        }
        true
    }

    fn start_turn(&mut self, utterance: String) {
        let id = self.next_turn_id;
        self.next_turn_id += 1;

        let cancel = self.cancel.child_token();
        let producer = tokio::spawn(produce_turn(TurnContext {
            id,
            utterance,
            segmenter: Arc::clone(&self.segmenter),
            synthesizer: Arc::clone(&self.synthesizer),
            cancel: cancel.clone(),
            updates: self.turn_tx.clone(),
        }));
        self.turn = Some(ActiveTurn {
            id,
            cancel,
            reply: ConversationTurn::assistant_placeholder(),
            producing: true,
            segments_enqueued: 0,
            producer,
        });
        self.set_state(SessionState::Awaiting);
        debug!(turn = id, "Turn started");
    }

    async fn on_turn_update(&mut self, update: TurnUpdate) {
        match update {
            TurnUpdate::Ready {
                turn_id,
                chunk,
                audio,
            } => {
                let Some(turn) = self.turn.as_mut().filter(|t| t.id == turn_id) else {
                    return;
                };
                if turn.cancel.is_cancelled() {
                    return;
                }

                turn.reply.append_chunk(&chunk.text);
                turn.segments_enqueued += 1;
                let segment = AudioSegment::new(chunk.sequence_index, audio);
                if let Err(e) = self.scheduler.enqueue(segment) {
                    warn!(error = %e, "Playback unavailable, dropping segment");
                    return;
                }

                if self.current_state() == SessionState::Awaiting {
                    self.set_state(SessionState::Speaking);
                    self.endpointer.set_peer_speaking(true);
                }
            }
            TurnUpdate::Finished { turn_id, result } => {
                let Some(turn) = self.turn.as_mut().filter(|t| t.id == turn_id) else {
                    return;
                };

                match result {
                    Ok(()) => {
                        turn.producing = false;
                        if !self.scheduler.is_playing() {
                            self.finish_turn();
                        }
                    }
                    Err(e) if e.class() == ErrorClass::Cancellation => {
                        debug!(turn = turn_id, "Turn cancelled");
                    }
                    Err(e) => self.discard_turn(&e).await,
                }
            }
        }
    }

    fn on_scheduler(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Idle => {
                if self.turn.as_ref().is_some_and(|t| t.producing) {
                    // More segments are on their way.
                    return;
                }
                if self.scheduler.is_playing() {
                    // Raced a segment enqueued after the queue drained.
                    debug!("Stale idle ignored");
                    return;
                }
                if self.current_state() == SessionState::Speaking {
                    self.finish_turn();
                }
            }
            SchedulerEvent::SegmentScheduled { sequence_index, .. } => {
                debug!(seq = sequence_index, "Segment playing");
            }
            SchedulerEvent::SegmentSkipped { .. } => {}
        }
    }

    /// The reply was fully spoken.
    fn finish_turn(&mut self) {
        if let Some(mut turn) = self.turn.take() {
            turn.reply.complete = true;
            debug!(turn = turn.id, segments = turn.segments_enqueued, "Turn complete");
            self.emit(ConversationEvent::UtteranceRendered(turn.reply));
        }
        self.resume_listening();
    }

    /// User speech while the assistant is talking.
    async fn barge_in(&mut self) {
        info!("User interrupted playback");
        self.cancel_turn().await;
        self.resume_listening();
    }

    /// A transport failure: surface it once and drop the reply.
    async fn discard_turn(&mut self, e: &VoiceError) {
        error!(error = %e, "Assistant turn failed");
        if let Some(turn) = self.turn.take() {
            turn.cancel.cancel();
            join_producer(turn.id, turn.producer).await;
        }
        self.scheduler.stop().await;
        self.emit(ConversationEvent::Error(e.to_string()));
        self.emit(ConversationEvent::TurnDiscarded);
        self.resume_listening();
    }

    /// Stop the active turn, if any, and report it as incomplete.
    async fn cancel_turn(&mut self) {
        let Some(mut turn) = self.turn.take() else {
            return;
        };
        turn.cancel.cancel();
        join_producer(turn.id, turn.producer).await;
        self.scheduler.stop().await;

        turn.reply.complete = false;
        debug!(turn = turn.id, "Turn cancelled");
        self.emit(ConversationEvent::UtteranceRendered(turn.reply));
    }

    fn resume_listening(&mut self) {
        let was_speaking = self.current_state() == SessionState::Speaking;
        self.set_state(SessionState::Listening);
        if was_speaking {
            self.endpointer.set_peer_speaking(false);
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, new_state: SessionState) {
        let old = self.state.send_replace(new_state);
        if old != new_state {
            debug!(?old, new = ?new_state, "Session state transition");
            self.emit(ConversationEvent::StateChanged(new_state));
        }
    }

    fn emit(&self, event: ConversationEvent) {
        send_event(&self.events, event);
    }
}

fn send_event(events: &mpsc::UnboundedSender<ConversationEvent>, event: ConversationEvent) {
    if events.send(event).is_err() {
        debug!("Conversation event receiver dropped");
    }
}

/// Wait for a cancelled producer to wind down, so no request of the turn
/// outlives it.
async fn join_producer(turn_id: u64, producer: JoinHandle<()>) {
    if let Err(e) = producer.await {
        warn!(turn = turn_id, error = %e, "Turn producer ended abnormally");
    }
}

// ── Turn producer ──────────────────────────────────────────────────

struct TurnContext {
    id: u64,
    utterance: String,
    segmenter: Arc<ResponseStreamSegmenter>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cancel: CancellationToken,
    updates: mpsc::UnboundedSender<TurnUpdate>,
}

/// Stream the reply, synthesize every chunk as soon as it is emitted and
/// deliver the audio in sequence order.
async fn produce_turn(ctx: TurnContext) {
    let TurnContext {
        id,
        utterance,
        segmenter,
        synthesizer,
        cancel,
        updates,
    } = ctx;

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
    let stream_cancel = cancel.clone();
    // Owns `chunk_tx`, so the chunk channel closes when the stream ends.
    let stream = async move { segmenter.run(&utterance, &stream_cancel, &chunk_tx).await };
    tokio::pin!(stream);

    let mut stream_done = false;
    let mut chunks_open = true;
    let mut synthesis = FuturesUnordered::new();
    let mut reorder = ReorderBuffer::default();

    let finish = |result: Result<(), VoiceError>| {
        let _ = updates.send(TurnUpdate::Finished {
            turn_id: id,
            result,
        });
    };

    while !stream_done || chunks_open || !synthesis.is_empty() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = &mut stream, if !stream_done => match result {
                Ok(StreamOutcome::Completed(text)) => {
                    debug!(turn = id, chars = text.len(), "Reply stream complete");
                    stream_done = true;
                }
                Ok(StreamOutcome::Cancelled(_)) => return,
                Err(e) => {
                    finish(Err(e));
                    return;
                }
            },
            chunk = chunk_rx.recv(), if chunks_open => match chunk {
                Some(chunk) => synthesis.push(synthesize(Arc::clone(&synthesizer), chunk)),
                None => chunks_open = false,
            },
            Some((chunk, result)) = synthesis.next(), if !synthesis.is_empty() => match result {
                Ok(audio) => {
                    for (chunk, audio) in reorder.insert(chunk, audio) {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let _ = updates.send(TurnUpdate::Ready { turn_id: id, chunk, audio });
                    }
                }
                Err(e) => {
                    finish(Err(e));
                    return;
                }
            },
        }
    }

    finish(Ok(()));
}

async fn synthesize(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    chunk: TextChunk,
) -> (TextChunk, Result<Bytes, VoiceError>) {
    debug!(seq = chunk.sequence_index, "Synthesizing chunk");
    let result = synthesizer.synthesize(&chunk.text).await;
    (chunk, result)
}

/// Holds synthesized chunks that finished ahead of a predecessor.
#[derive(Debug, Default)]
struct ReorderBuffer {
    next: u64,
    held: BTreeMap<u64, (TextChunk, Bytes)>,
}

impl ReorderBuffer {
    /// Add one result and return every entry now deliverable, in order.
    fn insert(&mut self, chunk: TextChunk, audio: Bytes) -> Vec<(TextChunk, Bytes)> {
        self.held.insert(chunk.sequence_index, (chunk, audio));

        let mut ready = Vec::new();
        while let Some(entry) = self.held.remove(&self.next) {
            ready.push(entry);
            self.next += 1;
        }
        ready
    }
}
