/// llm-relay - relays streamed LLM completions to HTTP clients as NDJSON envelopes.
///
/// Each request opens one streaming completion upstream, classifies every SSE line,
/// and forwards accepted content either as whole fragments or one character at a
/// time. The relay always ends with exactly one terminal envelope.
///
/// # Architecture
///
/// - [`ai`] talks to the LLM provider and turns its SSE body into classified lines
/// - [`relay`] owns the per-request state machine, pacing and envelope delivery
/// - [`api`] exposes the relay over axum
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use llm_relay::ai::LlmClient;
/// use llm_relay::api::{AppState, build_router};
/// use llm_relay::core::config::RelayConfig;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     llm_relay::setup_logging();
///
///     let config = RelayConfig::from_env()?;
///     let state = AppState {
///         upstream: Arc::new(LlmClient::new(&config)?),
///         config: Arc::new(config.clone()),
///     };
///
///     let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
///     axum::serve(listener, build_router(state)).await?;
///     Ok(())
/// }
/// ```
// Module declarations
pub mod ai;
pub mod api;
pub mod core;
pub mod errors;
pub mod relay;

/// Configure structured logging with JSON format.
///
/// The level comes from `RUST_LOG` and defaults to `info`. Calling it more than once
/// is harmless; only the first call installs a subscriber.
///
/// # Example
///
/// ```
/// llm_relay::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
