//! Transport writers for outbound envelopes.
//!
//! The wire format is newline-delimited JSON: one [`EventEnvelope`] per line, flushed
//! as soon as it is written.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::core::models::EventEnvelope;
use crate::errors::RelayError;

/// Destination of the outbound envelope stream.
#[async_trait]
pub trait EnvelopeSink: Send {
    /// Writes one envelope and makes it visible to the client.
    async fn send(&mut self, envelope: &EventEnvelope) -> Result<(), RelayError>;

    /// Releases the transport. Called once, after the terminal envelope.
    async fn close(&mut self) -> Result<(), RelayError> {
        Ok(())
    }
}

#[async_trait]
impl<'a, T: EnvelopeSink + ?Sized> EnvelopeSink for &'a mut T {
    async fn send(&mut self, envelope: &EventEnvelope) -> Result<(), RelayError> {
        (**self).send(envelope).await
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        (**self).close().await
    }
}

/// Serializes one envelope as a single NDJSON line.
///
/// # Errors
///
/// Returns `RelayError::Serialization` if the envelope cannot be encoded.
pub fn encode_line(envelope: &EventEnvelope) -> Result<Vec<u8>, RelayError> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    Ok(line)
}

/// Writes NDJSON to any async writer.
#[derive(Debug)]
pub struct NdjsonWriter<W> {
    writer: W,
}

impl<W> NdjsonWriter<W> {
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> EnvelopeSink for NdjsonWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, envelope: &EventEnvelope) -> Result<(), RelayError> {
        let line = encode_line(envelope)?;
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Body chunks for a streamed HTTP response.
pub type BodyChunk = Result<Bytes, std::io::Error>;

/// Feeds an HTTP response body through a bounded channel.
///
/// A send fails once the receiving body has been dropped, i.e. the client is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<BodyChunk>,
}

impl ChannelSink {
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

#[async_trait]
impl EnvelopeSink for ChannelSink {
    async fn send(&mut self, envelope: &EventEnvelope) -> Result<(), RelayError> {
        let line = encode_line(envelope)?;
        self.tx
            .send(Ok(Bytes::from(line)))
            .await
            .map_err(|_| RelayError::DownstreamWrite("client disconnected".to_string()))
    }
}
