//! Upstream LLM access: HTTP client, line decoding and line classification

pub mod client;
pub mod lines;
pub mod sse;

use async_trait::async_trait;

use crate::errors::RelayError;

// Re-export main types for convenience
pub use client::LlmClient;
pub use lines::LineStream;
pub use sse::{ChunkKind, ClassifiedChunk, classify};

/// Source of upstream line streams.
///
/// Implemented by [`LlmClient`]; the relay and the HTTP layer only see this trait so
/// they can run against a scripted upstream.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Sends the streaming request for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::UpstreamUnavailable` when no response could be obtained.
    async fn open_stream(&self, prompt: &str, max_tokens: u32) -> Result<LineStream, RelayError>;
}
