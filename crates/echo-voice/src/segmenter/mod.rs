//! Streamed model reply → ordered speakable chunks.
//!
//! The segmenter sends the utterance to the [`ChatModel`], feeds every token
//! into a [`SegmentBuffer`] and emits each ready span, normalized, as the
//! next [`TextChunk`]. Chunks that normalize to nothing (a code-only
//! paragraph's fence line, a reasoning block) are dropped without consuming
//! a sequence index.

mod chunker;

pub use chunker::SegmentBuffer;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::capability::{ChatMessage, ChatModel};
use crate::config::SegmenterConfig;
use crate::error::VoiceError;
use crate::text::normalize;
use crate::types::TextChunk;

/// How a [`ResponseStreamSegmenter::run`] ended. Both carry the raw text
/// received so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(String),
    Cancelled(String),
}

impl StreamOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Completed(text) | Self::Cancelled(text) => text,
        }
    }
}

/// Turns one utterance into an ordered stream of [`TextChunk`]s.
pub struct ResponseStreamSegmenter {
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    config: SegmenterConfig,
}

impl ResponseStreamSegmenter {
    pub fn new(
        model: Arc<dyn ChatModel>,
        system_prompt: impl Into<String>,
        config: SegmenterConfig,
    ) -> Self {
        Self {
            model,
            system_prompt: system_prompt.into(),
            config,
        }
    }

    /// Stream the reply to `utterance`, sending chunks on `chunks` in
    /// generation order.
    ///
    /// Cancelling `cancel` aborts the stream read and suppresses any further
    /// chunk; that is reported as [`StreamOutcome::Cancelled`], never as an
    /// error. A dropped receiver counts as a cancellation too.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the request fails or the stream breaks.
    pub async fn run(
        &self,
        utterance: &str,
        cancel: &CancellationToken,
        chunks: &mpsc::UnboundedSender<TextChunk>,
    ) -> Result<StreamOutcome, VoiceError> {
        let messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(utterance),
        ];

        let mut tokens = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StreamOutcome::Cancelled(String::new())),
            stream = self.model.stream_reply(messages) => stream?,
        };

        let mut buffer = SegmentBuffer::new(self.config.clone());
        let mut emitter = ChunkEmitter::new(chunks);
        let mut full_text = String::new();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(chars = full_text.len(), "Reply stream cancelled");
                    return Ok(StreamOutcome::Cancelled(full_text));
                }
                next = tokens.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    full_text.push_str(&fragment);
                    for span in buffer.push(&fragment) {
                        if !emitter.emit(&span, cancel) {
                            return Ok(StreamOutcome::Cancelled(full_text));
                        }
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if let Some(rest) = buffer.finish() {
            if !emitter.emit(&rest, cancel) {
                return Ok(StreamOutcome::Cancelled(full_text));
            }
        }

        debug!(chunks = emitter.next_index, "Reply stream complete");
        Ok(StreamOutcome::Completed(full_text))
    }
}

struct ChunkEmitter<'a> {
    tx: &'a mpsc::UnboundedSender<TextChunk>,
    next_index: u64,
}

impl<'a> ChunkEmitter<'a> {
    const fn new(tx: &'a mpsc::UnboundedSender<TextChunk>) -> Self {
        Self { tx, next_index: 0 }
    }

    /// Normalize and send one span. Returns `false` once the turn is over.
    fn emit(&mut self, span: &str, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        let text = normalize(span);
        if text.is_empty() {
            return true;
        }

        let chunk = TextChunk {
            sequence_index: self.next_index,
            text,
        };
        debug!(seq = chunk.sequence_index, chars = chunk.text.len(), "Emitting chunk");
        if self.tx.send(chunk).is_err() {
            return false;
        }
        self.next_index += 1;
        true
    }
}
