//! LLM API client module
//!
//! Sends the streaming chat-completion request and hands the response body back as
//! a [`LineStream`].

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::Upstream;
use super::lines::{LineStream, into_lines};
use crate::core::config::RelayConfig;
use crate::errors::RelayError;

const TEMPERATURE: f64 = 0.95;
const TOP_P: f64 = 0.7;
const PENALTY_SCORE: f64 = 1.0;

/// Builds the JSON body of a streaming chat-completion request.
#[must_use]
pub fn build_request_body(model: &str, prompt: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "stream": true,
        "max_output_tokens": max_tokens,
        "temperature": TEMPERATURE,
        "top_p": TOP_P,
        "penalty_score": PENALTY_SCORE,
        "messages": [
            { "role": "user", "content": prompt }
        ]
    })
}

/// Builds the request headers for the upstream call.
///
/// # Errors
///
/// Returns `RelayError::Config` if the API key is not a valid header value.
pub fn build_headers(api_key: &str) -> Result<HeaderMap, RelayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| RelayError::Config(format!("Invalid Authorization header: {e}")))?;
    headers.insert(AUTHORIZATION, auth_value);

    // Accept SSE content type
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    Ok(headers)
}

/// HTTP client for the configured LLM endpoint.
pub struct LlmClient {
    http: Client,
    api_url: Url,
    api_key: String,
    model: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("api_url", &self.api_url.as_str())
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Creates a client with the connect and read timeouts from `config`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` if the HTTP client cannot be built.
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build LLM HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            request_timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl Upstream for LlmClient {
    async fn open_stream(&self, prompt: &str, max_tokens: u32) -> Result<LineStream, RelayError> {
        #[cfg(feature = "debug-logs")]
        tracing::debug!(prompt = %prompt, "Sending LLM streaming prompt");

        info!(
            model = %self.model,
            prompt_chars = prompt.chars().count(),
            max_tokens,
            "Opening LLM stream"
        );

        let request = self
            .http
            .post(self.api_url.clone())
            .headers(build_headers(&self.api_key)?)
            .json(&build_request_body(&self.model, prompt, max_tokens));

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| {
                RelayError::UpstreamUnavailable(format!(
                    "no response within {}ms",
                    self.request_timeout.as_millis()
                ))
            })?
            .map_err(|e| RelayError::UpstreamUnavailable(format!("LLM request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // The body is still relayed: error bodies are classified line by line.
            warn!(status = %status, "LLM API answered with a non-success status");
        }

        Ok(into_lines(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::State;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::routing::post;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Option<(AxumHeaders, Value)>>>;

    async fn fake_llm(
        State(captured): State<Captured>,
        headers: AxumHeaders,
        axum::Json(body): axum::Json<Value>,
    ) -> &'static str {
        *captured.lock().unwrap() = Some((headers, body));
        "data: {\"result\":\"Hel\"}\n\ndata: {\"result\":\"lo\"}\n\ndata: [DONE]\n\n"
    }

    fn test_config(url: &str) -> RelayConfig {
        RelayConfig::from_lookup(|key| match key {
            "LLM_API_KEY" => Some("test-key".to_string()),
            "LLM_API_URL" => Some(url.to_string()),
            "LLM_API_MODEL" => Some("test-model".to_string()),
            "LLM_API_TIMEOUT_MS" => Some("2000".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let body = build_request_body("ernie-speed-pro-128k", "hi there", 500);

        assert_eq!(body["model"], "ernie-speed-pro-128k");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_output_tokens"], 500);
        assert_eq!(body["temperature"], 0.95);
        assert_eq!(body["top_p"], 0.7);
        assert_eq!(body["penalty_score"], 1.0);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi there");
    }

    #[test]
    fn test_headers() {
        let headers = build_headers("k-123").unwrap();

        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[AUTHORIZATION], "Bearer k-123");
        assert_eq!(headers[ACCEPT], "text/event-stream");
    }

    #[test]
    fn test_headers_reject_control_characters_in_key() {
        assert!(build_headers("bad\nkey").is_err());
    }

    #[tokio::test]
    async fn test_open_stream_posts_and_yields_lines() {
        let captured: Captured = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route("/v2/chat/completions", post(fake_llm))
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let config = test_config(&format!("http://{addr}/v2/chat/completions"));
        let client = LlmClient::new(&config).unwrap();

        let lines: Vec<String> = client
            .open_stream("hello", 64)
            .await
            .unwrap()
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec![
                "data: {\"result\":\"Hel\"}",
                "",
                "data: {\"result\":\"lo\"}",
                "",
                "data: [DONE]",
                "",
            ]
        );

        let (headers, body) = captured.lock().unwrap().take().unwrap();
        assert_eq!(headers["authorization"], "Bearer test-key");
        assert_eq!(headers["accept"], "text/event-stream");
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_output_tokens"], 64);
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn test_open_stream_connection_refused_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = test_config(&format!("http://{addr}/v2/chat/completions"));
        let client = LlmClient::new(&config).unwrap();

        let err = client.open_stream("hello", 64).await.err().expect("expected an error");
        assert!(matches!(err, RelayError::UpstreamUnavailable(_)));
    }
}
