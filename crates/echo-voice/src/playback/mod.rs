//! Gapless playback of synthesized segments.
//!
//! The scheduler runs as one task that owns the [`AudioPlayer`]. Segments are
//! played strictly in the order they were enqueued; each one is decoded and
//! then scheduled against a single anchor on the player's clock:
//!
//! ```text
//!   start  = max(now, anchor)
//!   anchor = start + duration - overlap
//! ```
//!
//! so consecutive segments overlap by `overlap`, and the previous voice is cut
//! at the new segment's start. [`SchedulerEvent::Idle`] fires once the queue
//! is empty and the last segment has finished.

mod timeline;

pub use timeline::Timeline;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::{AudioPlayer, DecodedAudio, VoiceId};
use crate::config::SchedulerConfig;
use crate::error::VoiceError;
use crate::types::AudioSegment;

/// Events emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A segment was handed to the player.
    SegmentScheduled {
        sequence_index: u64,
        start: Duration,
        duration: Duration,
    },

    /// A segment could not be decoded and was dropped.
    SegmentSkipped { sequence_index: u64, reason: String },

    /// The queue drained and the last segment finished playing.
    Idle,
}

enum SchedulerCommand {
    Enqueue(AudioSegment),
    Stop(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Segment counts shared by the handle and the task.
///
/// The handle counts what it sends, the task records how much of that has
/// finished or been dropped. An `Idle` that raced a later enqueue leaves
/// `enqueued > drained`, so it can be told apart from the real one.
#[derive(Debug, Default)]
struct Progress {
    enqueued: AtomicU64,
    drained: AtomicU64,
}

impl Progress {
    fn is_playing(&self) -> bool {
        self.enqueued.load(Ordering::SeqCst) > self.drained.load(Ordering::SeqCst)
    }

    fn drain_to(&self, count: u64) {
        self.drained.fetch_max(count, Ordering::SeqCst);
    }

    fn drain_all(&self) {
        self.drain_to(self.enqueued.load(Ordering::SeqCst));
    }
}

/// Handle to the playback task. Dropping it closes the player.
pub struct AudioPlaybackScheduler {
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    progress: Arc<Progress>,
}

impl AudioPlaybackScheduler {
    /// Spawn the playback task around `player`.
    pub fn new(
        config: &SchedulerConfig,
        player: Box<dyn AudioPlayer>,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let progress = Arc::new(Progress::default());

        let task = PlaybackTask {
            timeline: Timeline::new(config.overlap(), player.now()),
            player,
            queue: VecDeque::new(),
            current: None,
            idle_at: None,
            commands: command_rx,
            events: event_tx,
            accepted: 0,
            progress: Arc::clone(&progress),
        };
        tokio::spawn(task.run());

        (
            Self {
                commands: command_tx,
                progress,
            },
            event_rx,
        )
    }

    /// Queue a segment behind everything already queued.
    pub fn enqueue(&self, segment: AudioSegment) -> Result<(), VoiceError> {
        // Counted here so playback reads as busy from the first enqueue, not
        // from the moment the task gets to it.
        self.progress.enqueued.fetch_add(1, Ordering::SeqCst);
        self.commands
            .send(SchedulerCommand::Enqueue(segment))
            .map_err(|_| {
                self.progress.drain_all();
                VoiceError::AudioThreadDied
            })
    }

    /// Silence playback now, drop everything queued and reset the anchor.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(SchedulerCommand::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        self.progress.drain_all();
    }

    /// Stop playback and release the output device.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(SchedulerCommand::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        self.progress.drain_all();
    }

    /// True from the first enqueue until the queue drains and the last
    /// segment has finished.
    pub fn is_playing(&self) -> bool {
        self.progress.is_playing()
    }
}

// ── Playback task ──────────────────────────────────────────────────

struct PlaybackTask {
    player: Box<dyn AudioPlayer>,
    timeline: Timeline,
    queue: VecDeque<AudioSegment>,
    /// Most recently scheduled voice.
    current: Option<VoiceId>,
    /// When the last scheduled segment finishes, if anything is scheduled.
    idle_at: Option<Instant>,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    /// Segments received from the handle so far.
    accepted: u64,
    progress: Arc<Progress>,
}

/// What interrupted a decode.
enum Interrupt {
    Stop(oneshot::Sender<()>),
    Close(Option<oneshot::Sender<()>>),
}

impl PlaybackTask {
    async fn run(mut self) {
        let close_ack = loop {
            if let Some(segment) = self.queue.pop_front() {
                match self.play_next(segment).await {
                    // Nothing scheduled and nothing left: every segment was skipped.
                    Ok(()) if self.queue.is_empty() && self.idle_at.is_none() => self.on_idle(),
                    Ok(()) => {}
                    Err(Interrupt::Stop(ack)) => {
                        self.stop();
                        let _ = ack.send(());
                    }
                    Err(Interrupt::Close(ack)) => break ack,
                }
                continue;
            }

            let idle_at = self.idle_at;
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(SchedulerCommand::Enqueue(segment)) => self.accept(segment),
                    Some(SchedulerCommand::Stop(ack)) => {
                        self.stop();
                        let _ = ack.send(());
                    }
                    Some(SchedulerCommand::Close(ack)) => break Some(ack),
                    None => break None,
                },
                () = sleep_until_some(idle_at) => self.on_idle(),
            }
        };

        self.stop();
        self.player.close();
        info!("Playback closed");
        if let Some(ack) = close_ack {
            let _ = ack.send(());
        }
    }

    fn accept(&mut self, segment: AudioSegment) {
        debug!(seq = segment.sequence_index, bytes = segment.raw_bytes.len(), "Segment queued");
        self.accepted += 1;
        self.queue.push_back(segment);
    }

    /// Decode one segment and schedule it. Commands arriving meanwhile are
    /// handled without waiting for the decode: enqueues join the queue, a
    /// stop or close abandons the segment.
    async fn play_next(&mut self, mut segment: AudioSegment) -> Result<(), Interrupt> {
        let seq = segment.sequence_index;

        let decoded = {
            let mut decode = self.player.decode(segment.raw_bytes.clone());
            loop {
                tokio::select! {
                    biased;
                    command = self.commands.recv() => match command {
                        // Same as `accept`, on disjoint fields: `decode` borrows the player.
                        Some(SchedulerCommand::Enqueue(next)) => {
                            debug!(seq = next.sequence_index, bytes = next.raw_bytes.len(), "Segment queued");
                            self.accepted += 1;
                            self.queue.push_back(next);
                        }
                        Some(SchedulerCommand::Stop(ack)) => return Err(Interrupt::Stop(ack)),
                        Some(SchedulerCommand::Close(ack)) => return Err(Interrupt::Close(Some(ack))),
                        None => return Err(Interrupt::Close(None)),
                    },
                    result = &mut decode => break result,
                }
            }
        };

        let audio = match decoded {
            Ok(audio) => audio,
            Err(e) => {
                warn!(seq, error = %e, "Skipping undecodable segment");
                self.emit(SchedulerEvent::SegmentSkipped {
                    sequence_index: seq,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        segment.decoded_duration = Some(audio.duration);
        self.schedule(&mut segment, audio);
        Ok(())
    }

    fn schedule(&mut self, segment: &mut AudioSegment, audio: DecodedAudio) {
        let seq = segment.sequence_index;
        let duration = audio.duration;
        let now = self.player.now();
        let start = self.timeline.place(now, duration);

        let voice = match self.player.play_at(audio, start) {
            Ok(voice) => voice,
            Err(e) => {
                warn!(seq, error = %e, "Player rejected segment");
                self.emit(SchedulerEvent::SegmentSkipped {
                    sequence_index: seq,
                    reason: e.to_string(),
                });
                return;
            }
        };

        if let Some(previous) = self.current.replace(voice) {
            self.player.stop_voice(previous, start);
        }
        segment.scheduled_start = Some(start);

        let end = start + duration;
        self.idle_at = Some(Instant::now() + end.saturating_sub(now));
        debug!(
            seq,
            start_ms = millis(start),
            duration_ms = millis(duration),
            "Segment scheduled"
        );
        self.emit(SchedulerEvent::SegmentScheduled {
            sequence_index: seq,
            start,
            duration,
        });
    }

    fn on_idle(&mut self) {
        self.idle_at = None;
        self.current = None;
        self.progress.drain_to(self.accepted);
        if self.progress.is_playing() {
            // An enqueue is already on its way.
            debug!("Idle superseded by a new segment");
            return;
        }
        debug!("Playback idle");
        self.emit(SchedulerEvent::Idle);
    }

    fn stop(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.player.stop_all();
        self.current = None;
        self.idle_at = None;
        self.timeline.reset(self.player.now());
        self.progress.drain_to(self.accepted);
        debug!(dropped, "Playback stopped");
    }

    fn emit(&self, event: SchedulerEvent) {
        if self.events.send(event).is_err() {
            debug!("Scheduler event receiver dropped");
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
