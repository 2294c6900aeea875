//! A speech recognizer stand-in that reads transcripts from a text source.
//!
//! Each non-empty line becomes one final recognition result. The microphone
//! still drives the endpointer's silence and barge-in timing, so typing a line
//! and staying quiet ends the utterance just like speaking it would.

use std::io::{BufRead, BufReader, Stdin};
use std::sync::{Arc, Mutex};
use std::thread;

use echo_voice::{RecognitionConfig, RecognitionEvent, SpeechRecognizer, VoiceError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Sink = Arc<Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>>;

pub struct LineRecognizer<R> {
    source: Option<R>,
    sink: Sink,
}

impl LineRecognizer<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(std::io::stdin()))
    }
}

impl<R: BufRead + Send + 'static> LineRecognizer<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: Some(source),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// The reader thread is started on first use and outlives individual
    /// recognition streams; lines read while no stream is open are dropped.
    fn spawn_reader(&mut self) -> Result<(), VoiceError> {
        let Some(source) = self.source.take() else {
            return Ok(());
        };
        let sink = Arc::clone(&self.sink);

        thread::Builder::new()
            .name("echo-lines".to_string())
            .spawn(move || read_lines(source, &sink))?;
        Ok(())
    }
}

impl<R: BufRead + Send + 'static> SpeechRecognizer for LineRecognizer<R> {
    fn start(
        &mut self,
        config: &RecognitionConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, VoiceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut sink) = self.sink.lock() {
            *sink = Some(tx);
        }
        self.spawn_reader()?;
        debug!(language = %config.language, "Line recognition started");
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.take();
        }
    }
}

fn read_lines(source: impl BufRead, sink: &Sink) {
    for line in source.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Transcript source failed");
                break;
            }
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let Ok(sink) = sink.lock() else {
            return;
        };
        match sink.as_ref() {
            Some(tx) => {
                let _ = tx.send(RecognitionEvent::Result {
                    text: text.to_string(),
                    is_final: true,
                });
            }
            None => debug!(text, "Line arrived while not listening, dropped"),
        }
    }

    if let Ok(mut sink) = sink.lock() {
        if let Some(tx) = sink.take() {
            let _ = tx.send(RecognitionEvent::End);
        }
    }
}
