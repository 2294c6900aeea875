//! Server-sent event parsing for streamed chat completions.
//!
//! Wire format, one event per `data:` line:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo."}}]}
//!
//! data: [DONE]
//! ```
//!
//! Blank lines and `:` keep-alive comments are skipped. A stream that closes
//! without `[DONE]` counts as complete; a `data:` line that is not valid JSON
//! is a [`VoiceError::MalformedStream`].

use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::capability::TokenStream;
use crate::error::VoiceError;

/// State threaded through the `unfold` stream.
struct SseState<S> {
    stream: S,
    buf: BytesMut,
    done: bool,
}

/// Turn a raw SSE byte stream into a stream of non-empty content fragments.
pub fn token_stream<S, E>(byte_stream: S) -> TokenStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        loop {
            if let Some(line_end) = find_newline(&st.buf) {
                let line = st.buf.split_to(line_end);
                match parse_line(&String::from_utf8_lossy(&line)) {
                    Ok(SseLine::Skip) => continue,
                    Ok(SseLine::Done) => {
                        st.done = true;
                        return None;
                    }
                    Ok(SseLine::Content(text)) => return Some((Ok(text), st)),
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("Model stream transport error: {e}");
                    st.done = true;
                    return Some((Err(VoiceError::ModelRequest(e.to_string())), st));
                }
                None => {
                    st.done = true;
                    // A final line without a trailing newline still counts.
                    let tail = String::from_utf8_lossy(&st.buf).into_owned();
                    st.buf.clear();
                    match parse_line(&tail) {
                        Ok(SseLine::Content(text)) => {
                            warn!("Model stream ended without [DONE]");
                            return Some((Ok(text), st));
                        }
                        Ok(SseLine::Done) => return None,
                        Ok(SseLine::Skip) => {
                            warn!("Model stream ended without [DONE]");
                            return None;
                        }
                        Err(e) => return Some((Err(e), st)),
                    }
                }
            }
        }
    })
    .boxed()
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Skip,
    Done,
    Content(String),
}

fn parse_line(line: &str) -> Result<SseLine, VoiceError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Ok(SseLine::Skip);
    }

    let Some(data) = trimmed.strip_prefix("data:") else {
        // `event:`, `id:`, `retry:` carry nothing we use.
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| VoiceError::MalformedStream(format!("{e}: {data}")))?;

    let content = value["choices"][0]["delta"]["content"]
        .as_str()
        .unwrap_or("");
    if content.is_empty() {
        // Role-only and finish_reason chunks.
        debug!("Skipping SSE event without content");
        return Ok(SseLine::Skip);
    }
    Ok(SseLine::Content(content.to_string()))
}

/// Position just past the next `\n`, if any.
fn find_newline(buf: &BytesMut) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
}
