use std::sync::Arc;

use llm_relay::ai::LlmClient;
use llm_relay::api::{AppState, build_router};
use llm_relay::core::config::RelayConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    llm_relay::setup_logging();

    let config = RelayConfig::from_env()?;
    let client = LlmClient::new(&config)?;
    info!(
        addr = %config.listen_addr,
        upstream = %config.api_url,
        model = %config.model,
        "llm-relay starting"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    let state = AppState {
        upstream: Arc::new(client),
        config: Arc::new(config),
    };

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
