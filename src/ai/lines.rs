//! Turns the upstream byte stream into a stream of text lines.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::errors::RelayError;

/// Lines of the upstream body, in order. An `Err` item ends the stream.
pub type LineStream = BoxStream<'static, Result<String, RelayError>>;

/// Incremental line splitter that keeps UTF-8 sequences intact across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineDecoder {
    utf8_buffer: Vec<u8>,
    line_buffer: String,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every line completed by them.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::UpstreamRead` on invalid UTF-8.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, RelayError> {
        self.utf8_buffer.extend_from_slice(bytes);

        let valid_up_to = match std::str::from_utf8(&self.utf8_buffer) {
            Ok(_) => self.utf8_buffer.len(),
            Err(e) => {
                if e.error_len().is_some() {
                    return Err(RelayError::UpstreamRead(
                        "Invalid UTF-8 in LLM streaming response".to_string(),
                    ));
                }
                // Incomplete trailing sequence; keep it for the next chunk.
                e.valid_up_to()
            }
        };

        let decoded: Vec<u8> = self.utf8_buffer.drain(..valid_up_to).collect();
        let text = String::from_utf8(decoded).map_err(|e| {
            RelayError::UpstreamRead(format!("Invalid UTF-8 in LLM streaming response: {e}"))
        })?;
        self.line_buffer.push_str(&text);

        let mut lines = Vec::new();
        while let Some(pos) = self.line_buffer.find('\n') {
            let mut line: String = self.line_buffer.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        Ok(lines)
    }

    /// Returns the trailing unterminated line, if any, once the body has ended.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::UpstreamRead` if the body ended inside a UTF-8 sequence.
    pub fn finish(&mut self) -> Result<Option<String>, RelayError> {
        if !self.utf8_buffer.is_empty() {
            self.utf8_buffer.clear();
            return Err(RelayError::UpstreamRead(
                "LLM streaming response ended inside a UTF-8 sequence".to_string(),
            ));
        }
        if self.line_buffer.is_empty() {
            return Ok(None);
        }
        let mut line = std::mem::take(&mut self.line_buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

struct LineState<S> {
    bytes: Pin<Box<S>>,
    decoder: LineDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Adapts a byte stream into a [`LineStream`].
///
/// Transport errors are surfaced once as `RelayError::UpstreamRead`, after which the
/// stream ends.
pub fn into_lines<S, E>(bytes: S) -> LineStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send,
{
    let state = LineState {
        bytes: Box::pin(bytes),
        decoder: LineDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.decoder.feed(&chunk) {
                    Ok(lines) => state.pending.extend(lines),
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(RelayError::UpstreamRead(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    match state.decoder.finish() {
                        Ok(Some(line)) => return Some((Ok(line), state)),
                        Ok(None) => return None,
                        Err(e) => return Some((Err(e), state)),
                    }
                }
            }
        }
    })
    .boxed()
}
