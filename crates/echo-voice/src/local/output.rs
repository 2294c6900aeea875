//! Speaker output via `rodio`, confined to a dedicated thread.
//!
//! Every scheduled voice is its own `Sink` so it can be started late (a
//! leading delay on the source) and cut at an exact time independently of
//! the voices around it.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, Sink, Source};

use crate::capability::{AudioPlayer, DecodedAudio, VoiceId};
use crate::error::VoiceError;

enum OutputCommand {
    Play {
        voice: VoiceId,
        audio: DecodedAudio,
        start_at: Instant,
    },
    StopAt {
        voice: VoiceId,
        at: Instant,
    },
    StopAll,
    Shutdown,
}

/// [`AudioPlayer`] on the default `rodio` output device.
///
/// The clock starts when the player is opened.
pub struct RodioPlayer {
    cmd_tx: mpsc::Sender<OutputCommand>,
    thread: Option<thread::JoinHandle<()>>,
    epoch: Instant,
    next_voice: u64,
}

impl RodioPlayer {
    /// Open the default output device on a new thread.
    pub fn open() -> Result<Self, VoiceError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<OutputCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), VoiceError>>();

        let thread = thread::Builder::new()
            .name("echo-output".into())
            .spawn(move || run_output(&cmd_rx, &init_tx))
            .map_err(|e| {
                VoiceError::OutputStreamError(format!("failed to spawn audio thread: {e}"))
            })?;

        init_rx.recv().map_err(|_| VoiceError::AudioThreadDied)??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
            epoch: Instant::now(),
            next_voice: 0,
        })
    }

    fn send(&self, command: OutputCommand) -> Result<(), VoiceError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| VoiceError::AudioThreadDied)
    }
}

#[async_trait]
impl AudioPlayer for RodioPlayer {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn decode(&mut self, bytes: Bytes) -> Result<DecodedAudio, VoiceError> {
        tokio::task::spawn_blocking(move || decode_bytes(bytes))
            .await
            .map_err(|e| VoiceError::Decode(e.to_string()))?
    }

    fn play_at(&mut self, audio: DecodedAudio, start: Duration) -> Result<VoiceId, VoiceError> {
        let voice = VoiceId(self.next_voice);
        self.next_voice += 1;
        self.send(OutputCommand::Play {
            voice,
            audio,
            start_at: self.epoch + start,
        })?;
        Ok(voice)
    }

    fn stop_voice(&mut self, voice: VoiceId, at: Duration) {
        let _ = self.send(OutputCommand::StopAt {
            voice,
            at: self.epoch + at,
        });
    }

    fn stop_all(&mut self) {
        let _ = self.send(OutputCommand::StopAll);
    }

    fn close(&mut self) {
        let _ = self.cmd_tx.send(OutputCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            tracing::debug!("Audio output closed");
        }
    }
}

impl Drop for RodioPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Decode mp3/wav bytes to interleaved f32 PCM.
fn decode_bytes(bytes: Bytes) -> Result<DecodedAudio, VoiceError> {
    let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| VoiceError::Decode(e.to_string()))?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();

    if samples.is_empty() {
        return Err(VoiceError::Decode("segment contains no audio".to_string()));
    }
    Ok(DecodedAudio::from_samples(samples, channels, sample_rate))
}

/// Body of the output thread. Owns the `OutputStream` and every `Sink`.
fn run_output(cmd_rx: &mpsc::Receiver<OutputCommand>, init_tx: &mpsc::Sender<Result<(), VoiceError>>) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = init_tx.send(Err(VoiceError::OutputStreamError(e.to_string())));
            return;
        }
    };
    tracing::info!("Audio output opened on default device");

    if init_tx.send(Ok(())).is_err() {
        return;
    }

    let mut sinks: HashMap<VoiceId, Sink> = HashMap::new();
    let mut stops: Vec<(VoiceId, Instant)> = Vec::new();

    loop {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = stops.into_iter().partition(|(_, at)| *at <= now);
        stops = waiting;
        for (voice, _) in due {
            if let Some(sink) = sinks.remove(&voice) {
                sink.stop();
            }
        }
        sinks.retain(|_, sink| !sink.empty());

        let command = match stops.iter().map(|(_, at)| *at).min() {
            Some(next) => match cmd_rx.recv_timeout(next.saturating_duration_since(now)) {
                Ok(command) => command,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            },
            None => match cmd_rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            OutputCommand::Play {
                voice,
                audio,
                start_at,
            } => match Sink::try_new(&handle) {
                Ok(sink) => {
                    let delay = start_at.saturating_duration_since(Instant::now());
                    let source =
                        SamplesBuffer::new(audio.channels, audio.sample_rate, audio.samples)
                            .delay(delay);
                    sink.append(source);
                    sinks.insert(voice, sink);
                }
                Err(e) => tracing::warn!(error = %e, "Failed to create playback sink"),
            },
            OutputCommand::StopAt { voice, at } => stops.push((voice, at)),
            OutputCommand::StopAll => {
                stops.clear();
                for (_, sink) in sinks.drain() {
                    sink.stop();
                }
            }
            OutputCommand::Shutdown => break,
        }
    }

    for (_, sink) in sinks.drain() {
        sink.stop();
    }
    tracing::debug!("Audio output thread shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode_bytes(Bytes::from_static(b"definitely not audio")).unwrap_err();
        assert!(matches!(err, VoiceError::Decode(_)));
    }

    #[test]
    fn wav_segment_decodes_with_duration() {
        // 0.5 s of 8 kHz mono 16-bit silence.
        let frames: u32 = 4000;
        let data_len = frames * 2;
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16_u32.to_le_bytes());
        wav.extend_from_slice(&1_u16.to_le_bytes());
        wav.extend_from_slice(&1_u16.to_le_bytes());
        wav.extend_from_slice(&8000_u32.to_le_bytes());
        wav.extend_from_slice(&16_000_u32.to_le_bytes());
        wav.extend_from_slice(&2_u16.to_le_bytes());
        wav.extend_from_slice(&16_u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.resize(wav.len() + data_len as usize, 0);

        let audio = decode_bytes(Bytes::from(wav)).unwrap();
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.duration, Duration::from_millis(500));
    }
}
