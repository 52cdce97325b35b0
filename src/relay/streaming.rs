//! Output chunking and pacing.
//!
//! Accepted fragments are written either as one `LLM_RESPONSE` envelope each, or split
//! into one envelope per character with a fixed pause between characters to
//! simulate typing. The terminal `END`/`ERROR` envelope is written exactly once,
//! after every chunk.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::engine::{Delivery, FragmentHandler};
use super::sink::EnvelopeSink;
use super::state::Termination;
use crate::core::models::EventEnvelope;
use crate::errors::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    /// One envelope per accepted fragment.
    WholeMessage,
    /// One envelope per character, paced.
    CharByChar,
}

impl EmitMode {
    #[must_use]
    pub const fn from_char_level(char_level: bool) -> Self {
        if char_level {
            Self::CharByChar
        } else {
            Self::WholeMessage
        }
    }
}

/// Waits `pacing`, returning `false` if `cancel` fires first.
async fn pause(pacing: Duration, cancel: &CancellationToken) -> bool {
    if pacing.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(pacing) => true,
    }
}

/// Upper bound on the terminal write and on the sink close.
pub const TERMINAL_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

async fn bounded<F>(op: F, what: &str) -> Result<(), RelayError>
where
    F: Future<Output = Result<(), RelayError>>,
{
    tokio::time::timeout(TERMINAL_WRITE_TIMEOUT, op)
        .await
        .map_err(|_| {
            RelayError::DownstreamWrite(format!(
                "{what} timed out after {}s",
                TERMINAL_WRITE_TIMEOUT.as_secs()
            ))
        })?
}

/// Turns accepted fragments into envelopes on a sink.
pub struct OutputChunker<K> {
    stream_id: String,
    mode: EmitMode,
    pacing: Duration,
    sink: K,
    cancel: CancellationToken,
    chunks_emitted: usize,
    finished: bool,
}

impl<K: EnvelopeSink> OutputChunker<K> {
    pub fn new(
        stream_id: impl Into<String>,
        mode: EmitMode,
        pacing: Duration,
        sink: K,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            mode,
            pacing,
            sink,
            cancel,
            chunks_emitted: 0,
            finished: false,
        }
    }

    #[must_use]
    pub const fn chunks_emitted(&self) -> usize {
        self.chunks_emitted
    }

    /// Writes `fragment` as one or more chunk envelopes.
    ///
    /// In character mode every envelope after the first one of the relay is preceded
    /// by the pacing pause. Cancellation during the pause stops emission; the
    /// remaining characters are dropped.
    pub async fn emit(&mut self, fragment: &str) -> Delivery {
        if self.finished {
            return Delivery::Interrupted;
        }

        match self.mode {
            EmitMode::WholeMessage => self.send_chunk(fragment).await,
            EmitMode::CharByChar => {
                let mut buf = [0u8; 4];
                for ch in fragment.chars() {
                    if self.chunks_emitted > 0 && !pause(self.pacing, &self.cancel).await {
                        return Delivery::Interrupted;
                    }
                    if self.send_chunk(ch.encode_utf8(&mut buf)).await == Delivery::Interrupted {
                        return Delivery::Interrupted;
                    }
                }
                Delivery::Delivered
            }
        }
    }

    /// A write blocked on a client that stopped reading is abandoned on cancellation.
    async fn send_chunk(&mut self, content: &str) -> Delivery {
        if self.cancel.is_cancelled() {
            return Delivery::Interrupted;
        }

        let envelope = EventEnvelope::chunk(&self.stream_id, content);
        let sent = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Delivery::Interrupted,
            sent = self.sink.send(&envelope) => sent,
        };

        match sent {
            Ok(()) => {
                self.chunks_emitted += 1;
                Delivery::Delivered
            }
            Err(e) => {
                error!(stream_id = %self.stream_id, error = %e, "Failed to send relay chunk");
                Delivery::Interrupted
            }
        }
    }

    /// Writes the terminal envelope for `termination` and closes the sink.
    ///
    /// Only the first call writes anything. The terminal envelope is written even
    /// after cancellation, but each of the write and the close may take at most
    /// [`TERMINAL_WRITE_TIMEOUT`]; the close is attempted whatever the write did.
    ///
    /// # Errors
    ///
    /// Returns the sink error if the terminal envelope could not be written or the
    /// sink could not be closed, and `RelayError::DownstreamWrite` on timeout.
    pub async fn finish(&mut self, termination: &Termination) -> Result<(), RelayError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let envelope = if termination.is_success() {
            EventEnvelope::end(&self.stream_id)
        } else {
            EventEnvelope::error_end(&self.stream_id, termination.error_message())
        };

        let sent = bounded(self.sink.send(&envelope), "terminal envelope write").await;
        let closed = bounded(self.sink.close(), "sink close").await;
        sent?;
        closed?;

        info!(
            stream_id = %self.stream_id,
            chunks = self.chunks_emitted,
            success = termination.is_success(),
            "LLM relay finished"
        );
        Ok(())
    }
}

#[async_trait]
impl<K: EnvelopeSink> FragmentHandler for OutputChunker<K> {
    async fn on_accepted(&mut self, fragment: &str) -> Delivery {
        self.emit(fragment).await
    }
}
