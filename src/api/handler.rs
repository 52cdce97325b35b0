//! HTTP surface - thin router that hands each request to the relay.
//!
//! - `GET /api/stream/llm?prompt=..&charLevel=..&maxTokens=..` streams NDJSON envelopes
//! - `GET /api/stream/health` answers `OK`

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ai::Upstream;
use crate::core::config::RelayConfig;
use crate::core::models::RelayRequest;
use crate::relay::sink::ChannelSink;
use crate::relay::start_relay;

/// Envelopes buffered between the relay and a slow client.
const BODY_BUFFER: usize = 64;

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn Upstream>,
    pub config: Arc<RelayConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/stream/llm", get(stream_llm))
        .route("/api/stream/health", get(health))
        .with_state(state)
}

pub async fn health() -> &'static str {
    "OK"
}

/// Starts a relay in the background and streams its envelopes as the response body.
///
/// Dropping the response body (client disconnect) cancels the relay.
#[tracing::instrument(level = "info", skip_all, fields(char_level = request.char_level, max_tokens = request.max_tokens))]
pub async fn stream_llm(
    State(state): State<AppState>,
    Query(request): Query<RelayRequest>,
) -> Response {
    #[cfg(feature = "debug-logs")]
    tracing::debug!(prompt = %request.prompt, "Relay request");

    let (sink, rx) = ChannelSink::channel(BODY_BUFFER);
    let cancel = CancellationToken::new();

    let disconnect_watch = {
        let sink = sink.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            sink.closed().await;
            cancel.cancel();
        })
    };

    tokio::spawn(async move {
        let report = start_relay(
            state.upstream.as_ref(),
            &state.config,
            &request,
            sink,
            cancel,
        )
        .await;
        disconnect_watch.abort();
        info!(
            stream_id = %report.stream_id,
            termination = ?report.termination,
            chunks = report.chunks_emitted,
            "Relay request completed"
        );
    });

    (
        [
            (CONTENT_TYPE, "application/json"),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}
