//! Microphone capture for volume analysis.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfig};
use tokio::sync::oneshot;

use crate::capability::AudioCapturer;
use crate::error::VoiceError;

/// Samples kept for one analysis window (mono).
pub const ANALYSIS_WINDOW: usize = 2048;

type Window = Arc<Mutex<VecDeque<f32>>>;

/// [`AudioCapturer`] on the default `cpal` input device.
///
/// The input stream lives on its own thread between
/// [`acquire`](AudioCapturer::acquire) and
/// [`release`](AudioCapturer::release). Its callback mixes every frame down
/// to mono and keeps the most recent [`ANALYSIS_WINDOW`] samples.
pub struct CpalCapturer {
    window: Window,
    device: Option<DeviceThread>,
}

struct DeviceThread {
    stop_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl CpalCapturer {
    pub fn new() -> Self {
        Self {
            window: Arc::new(Mutex::new(VecDeque::with_capacity(ANALYSIS_WINDOW))),
            device: None,
        }
    }
}

impl Default for CpalCapturer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioCapturer for CpalCapturer {
    async fn acquire(&mut self) -> Result<(), VoiceError> {
        if self.device.is_some() {
            return Ok(());
        }

        if let Ok(mut window) = self.window.lock() {
            window.clear();
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (init_tx, init_rx) = oneshot::channel::<Result<(), VoiceError>>();
        let window = Arc::clone(&self.window);

        let handle = thread::Builder::new()
            .name("echo-capture".into())
            .spawn(move || run_input(&window, init_tx, &stop_rx))
            .map_err(|e| {
                VoiceError::InputStreamError(format!("failed to spawn capture thread: {e}"))
            })?;

        // The device opens (or fails) on its own thread; a failed thread
        // has already returned by the time it reports, so it is not joined.
        match init_rx.await {
            Ok(Ok(())) => {
                self.device = Some(DeviceThread { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::AudioThreadDied),
        }
    }

    fn analysis_window(&mut self) -> Option<Vec<f32>> {
        self.device.as_ref()?;
        let window = self.window.lock().ok()?;
        Some(window.iter().copied().collect())
    }

    fn release(&mut self) {
        if let Some(device) = self.device.take() {
            let _ = device.stop_tx.send(());
            let _ = device.handle.join();
            tracing::debug!("Microphone released");
        }
    }

    fn is_acquired(&self) -> bool {
        self.device.is_some()
    }
}

impl Drop for CpalCapturer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Body of the capture thread. Owns the `cpal::Stream` for its whole life.
fn run_input(
    window: &Window,
    init_tx: oneshot::Sender<Result<(), VoiceError>>,
    stop_rx: &mpsc::Receiver<()>,
) {
    let stream = match open_input(window) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    if init_tx.send(Ok(())).is_err() {
        return;
    }

    // Blocks until release() or the capturer is dropped.
    let _ = stop_rx.recv();
    drop(stream);
}

fn open_input(window: &Window) -> Result<Stream, VoiceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(VoiceError::NoInputDevice)?;

    let config = device
        .default_input_config()
        .map_err(|e| VoiceError::InputStreamError(e.to_string()))?;

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = config.sample_rate().0,
        channels = config.channels(),
        "Microphone acquired"
    );

    let stream = build_input_stream(&device, &config, window)?;
    stream
        .play()
        .map_err(|e| VoiceError::InputStreamError(e.to_string()))?;
    Ok(stream)
}

fn build_input_stream(
    device: &Device,
    config: &SupportedStreamConfig,
    window: &Window,
) -> Result<Stream, VoiceError> {
    let stream_config: StreamConfig = config.clone().into();
    let channels = usize::from(config.channels().max(1));
    let sample_format = config.sample_format();

    let err_fn = |err: cpal::StreamError| {
        tracing::error!(%err, "Audio input stream error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let window = Arc::clone(window);
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    push_frames(&window, data.iter().copied(), channels);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let window = Arc::clone(window);
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples = data.iter().map(|&s| f32::from(s) / 32768.0);
                    push_frames(&window, samples, channels);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I32 => {
            let window = Arc::clone(window);
            device.build_input_stream(
                &stream_config,
                move |data: &[i32], _: &cpal::InputCallbackInfo| {
                    #[allow(clippy::cast_precision_loss)]
                    let samples = data.iter().map(|&s| s as f32 / 2_147_483_648.0);
                    push_frames(&window, samples, channels);
                },
                err_fn,
                None,
            )
        }
        _ => {
            return Err(VoiceError::InputStreamError(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream.map_err(|e| VoiceError::InputStreamError(e.to_string()))
}

/// Mix interleaved frames down to mono and append them to the window.
fn push_frames(window: &Window, samples: impl Iterator<Item = f32>, channels: usize) {
    let Ok(mut window) = window.lock() else {
        return;
    };

    let mut sum = 0.0_f32;
    let mut n = 0;
    for sample in samples {
        sum += sample;
        n += 1;
        if n == channels {
            #[allow(clippy::cast_precision_loss)]
            window.push_back(sum / channels as f32);
            sum = 0.0;
            n = 0;
        }
    }

    let excess = window.len().saturating_sub(ANALYSIS_WINDOW);
    window.drain(..excess);
}
