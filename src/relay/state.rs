//! Per-relay state machine.
//!
//! A relay is `Streaming` until exactly one terminal transition moves it to
//! `Terminated`. Content is tracked as one append-only `full_text` buffer plus the
//! offset up to which it has been handed to the client: while the stream is healthy
//! the offset follows the end of the buffer; after the first failing chunk it stays
//! put and the rest of the buffer is kept only for diagnostics.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::ai::{ChunkKind, ClassifiedChunk};

pub const REQUEST_FAILED_MESSAGE: &str = "[LLM request failed] response is null";
pub const RESPONSE_FAILED_PREFIX: &str = "[LLM response failed] ";
pub const READ_ERROR_PREFIX: &str = "[LLM read error] ";
pub const TIMEOUT_PREFIX: &str = "[LLM relay timeout] ";

/// How a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `[DONE]` or a clean end of stream with every chunk successful.
    Completed,
    /// No upstream response could be obtained.
    UpstreamUnavailable,
    /// The upstream sent an error object; carries the `API error: ...` message.
    UpstreamProtocolError(String),
    /// A data line could not be parsed; carries the diagnostic.
    ParseFailure(String),
    /// The stream ended and the accumulated text is itself a JSON object.
    ResponseFailed(String),
    /// Reading the upstream body failed.
    UpstreamReadError(String),
    /// The caller or the client went away.
    Cancelled,
    /// The overall relay deadline passed.
    TimedOut(Duration),
}

impl Termination {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Message carried by the terminal `ErrorEnd` envelope.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Completed | Self::Cancelled => None,
            Self::UpstreamUnavailable => Some(REQUEST_FAILED_MESSAGE.to_string()),
            Self::UpstreamProtocolError(message) | Self::ParseFailure(message) => {
                Some(message.clone())
            }
            Self::ResponseFailed(text) => Some(format!("{RESPONSE_FAILED_PREFIX}{text}")),
            Self::UpstreamReadError(cause) => Some(format!("{READ_ERROR_PREFIX}{cause}")),
            Self::TimedOut(limit) => Some(format!(
                "{TIMEOUT_PREFIX}exceeded {}s",
                limit.as_secs()
            )),
        }
    }
}

/// What the relay loop should do after observing a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to deliver; keep reading.
    Continue,
    /// Hand this fragment to the client, then keep reading.
    Deliver(String),
    /// The relay is terminated; stop reading.
    Finished,
}

#[derive(Debug)]
pub struct RelayState {
    /// `None` while streaming; set once by the first terminal transition.
    terminal: Option<Termination>,
    full_text: String,
    last_emitted_offset: usize,
    /// First chunk that failed; `None` means the AND-reduction is still `true`.
    first_failure: Option<Termination>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            terminal: None,
            full_text: String::new(),
            last_emitted_offset: 0,
            first_failure: None,
        }
    }

    /// Folds one classified chunk into the state.
    pub fn observe(&mut self, chunk: &ClassifiedChunk) -> Step {
        if self.is_terminated() {
            return Step::Finished;
        }

        if !chunk.success && self.first_failure.is_none() {
            self.first_failure = Some(match chunk.kind {
                ChunkKind::ParseFailure => Termination::ParseFailure(chunk.payload.clone()),
                _ => Termination::UpstreamProtocolError(chunk.payload.clone()),
            });
        }

        if chunk.carries_content() && !chunk.payload.is_empty() {
            self.full_text.push_str(&chunk.payload);
        }

        if chunk.kind == ChunkKind::Done {
            let outcome = self.outcome();
            self.terminate(outcome);
            return Step::Finished;
        }

        if self.overall_success() && !chunk.payload.is_empty() {
            let fragment = self.full_text[self.last_emitted_offset..].to_string();
            self.last_emitted_offset = self.full_text.len();
            return Step::Deliver(fragment);
        }

        Step::Continue
    }

    /// The body ended without `[DONE]`.
    ///
    /// If everything accumulated parses as one JSON object, the stream is taken to
    /// be an error or status blob rather than model output. This is a heuristic: it
    /// cannot tell such a blob from an answer that happens to be a JSON object.
    pub fn exhausted(&mut self) -> &Termination {
        let outcome = if serde_json::from_str::<Map<String, Value>>(&self.full_text).is_ok() {
            Termination::ResponseFailed(self.full_text.clone())
        } else {
            self.outcome()
        };
        self.terminate(outcome)
    }

    pub fn read_failed(&mut self, cause: impl Into<String>) -> &Termination {
        self.terminate(Termination::UpstreamReadError(cause.into()))
    }

    pub fn cancel(&mut self) -> &Termination {
        self.terminate(Termination::Cancelled)
    }

    /// Moves to `Terminated`; the first terminal transition wins.
    fn terminate(&mut self, termination: Termination) -> &Termination {
        self.terminal.get_or_insert(termination)
    }

    fn outcome(&self) -> Termination {
        self.first_failure.clone().unwrap_or(Termination::Completed)
    }

    /// Logical AND of the `success` flag of every chunk observed so far.
    #[must_use]
    pub const fn overall_success(&self) -> bool {
        self.first_failure.is_none()
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.terminal.is_some()
    }

    #[must_use]
    pub const fn termination(&self) -> Option<&Termination> {
        self.terminal.as_ref()
    }

    /// Every content payload seen so far, in order.
    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Byte offset into [`Self::full_text`] up to which content was delivered.
    #[must_use]
    pub const fn last_emitted_offset(&self) -> usize {
        self.last_emitted_offset
    }

    /// Content received after the stream was poisoned; never delivered.
    #[must_use]
    pub fn withheld_text(&self) -> &str {
        &self.full_text[self.last_emitted_offset..]
    }
}
