//! Per-request entry point of the relay.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::engine;
use super::sink::EnvelopeSink;
use super::state::Termination;
use super::streaming::{EmitMode, OutputChunker};
use crate::ai::Upstream;
use crate::core::config::RelayConfig;
use crate::core::models::RelayRequest;

/// Summary of one finished relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub stream_id: String,
    pub termination: Termination,
    pub chunks_emitted: usize,
}

/// Relays one prompt from `upstream` to `sink`.
///
/// Always writes exactly one terminal envelope, last, and closes the sink. Every
/// failure is folded into the returned report; nothing propagates past this
/// function. Cancelling `cancel` ends the relay at the next suspension point; the
/// relay also ends on its own after `config.relay_timeout`.
pub async fn start_relay<K: EnvelopeSink>(
    upstream: &dyn Upstream,
    config: &RelayConfig,
    request: &RelayRequest,
    sink: K,
    cancel: CancellationToken,
) -> RelayReport {
    let stream_id = Uuid::new_v4().to_string();
    info!(
        stream_id = %stream_id,
        char_level = request.char_level,
        max_tokens = request.max_tokens,
        "Starting LLM relay"
    );

    // Child token: the deadline cancels only this relay, and a cancelled relay whose
    // parent is still live is therefore a timeout.
    let relay_token = cancel.child_token();
    let deadline = {
        let token = relay_token.clone();
        let limit = config.relay_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            token.cancel();
        })
    };

    let mut chunker = OutputChunker::new(
        stream_id.clone(),
        EmitMode::from_char_level(request.char_level),
        config.pacing_delay,
        sink,
        relay_token.clone(),
    );

    let opened = tokio::select! {
        biased;
        () = relay_token.cancelled() => None,
        opened = upstream.open_stream(&request.prompt, request.max_tokens) => Some(opened),
    };

    let termination = match opened {
        None => Termination::Cancelled,
        Some(Err(e)) => {
            error!(stream_id = %stream_id, error = %e, "LLM request failed");
            Termination::UpstreamUnavailable
        }
        Some(Ok(mut lines)) => engine::relay(&mut lines, &mut chunker, &relay_token).await,
    };
    deadline.abort();

    let termination = match termination {
        Termination::Cancelled if relay_token.is_cancelled() && !cancel.is_cancelled() => {
            warn!(stream_id = %stream_id, limit = ?config.relay_timeout, "LLM relay timed out");
            Termination::TimedOut(config.relay_timeout)
        }
        other => other,
    };

    if let Some(message) = termination.error_message() {
        warn!(stream_id = %stream_id, error = %message, "LLM relay failed");
    }

    if let Err(e) = chunker.finish(&termination).await {
        error!(stream_id = %stream_id, error = %e, "Failed to send terminal envelope");
    }

    RelayReport {
        stream_id,
        chunks_emitted: chunker.chunks_emitted(),
        termination,
    }
}
