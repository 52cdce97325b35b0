//! Line classifier for the upstream LLM event stream.
//!
//! Every non-empty line read from the upstream body is classified into one of:
//! - `data: [DONE]` stream terminator
//! - `data: {...}` content chunk (native `result` shape or `OpenAI`-compatible
//!   `choices[0].delta.content` shape)
//! - `data: {"error": {...}}` upstream error object
//! - anything else, kept verbatim as a raw JSON blob (error bodies are often not SSE)
//!
//! Classification never fails: malformed input degrades to `ParseFailure` or `RawJson`.

use serde_json::{Map, Value};
use tracing::{error, warn};

/// Prefix of an SSE data line, including the single separating space.
pub const DATA_PREFIX: &str = "data: ";

/// Sentinel payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Prefix of the message carried by an upstream error chunk.
pub const API_ERROR_PREFIX: &str = "API error: ";

/// What a single upstream line turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// A `data:` line with a content payload (possibly empty).
    Data,
    /// A line without the `data:` prefix, kept verbatim.
    RawJson,
    /// The `[DONE]` terminator.
    Done,
    /// An upstream error object.
    Error,
    /// A `data:` line whose payload was not a JSON object.
    ParseFailure,
}

/// Result of classifying one upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedChunk {
    pub kind: ChunkKind,
    pub payload: String,
    pub success: bool,
}

impl ClassifiedChunk {
    fn new(kind: ChunkKind, payload: String) -> Self {
        let success = !matches!(kind, ChunkKind::Error | ChunkKind::ParseFailure);
        Self {
            kind,
            payload,
            success,
        }
    }

    /// Whether the payload is model output that belongs in the accumulated text.
    #[must_use]
    pub const fn carries_content(&self) -> bool {
        matches!(self.kind, ChunkKind::Data | ChunkKind::RawJson)
    }
}

/// Classifies one non-empty upstream line.
///
/// Empty lines are SSE separators and must be skipped by the caller.
#[must_use]
pub fn classify(line: &str) -> ClassifiedChunk {
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return classify_raw(line);
    };

    if data == DONE_SENTINEL {
        return ClassifiedChunk::new(ChunkKind::Done, String::new());
    }

    let json: Map<String, Value> = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Failed to parse upstream stream chunk");
            return ClassifiedChunk::new(
                ChunkKind::ParseFailure,
                format!("Failed to parse stream chunk: {e}"),
            );
        }
    };

    if let Some(err) = error_field(&json) {
        return ClassifiedChunk::new(ChunkKind::Error, api_error_message(err));
    }

    ClassifiedChunk::new(ChunkKind::Data, extract_content(&json))
}

/// Lines without the `data:` prefix are kept as-is; a JSON error body is still
/// recognized as an error. Anything unparseable is tolerated.
fn classify_raw(line: &str) -> ClassifiedChunk {
    if let Ok(json) = serde_json::from_str::<Map<String, Value>>(line)
        && let Some(err) = error_field(&json)
    {
        return ClassifiedChunk::new(ChunkKind::Error, api_error_message(err));
    }

    ClassifiedChunk::new(ChunkKind::RawJson, line.to_string())
}

/// `"error": null` means no error.
fn error_field(json: &Map<String, Value>) -> Option<&Value> {
    json.get("error").filter(|err| !err.is_null())
}

/// Prefers the native `result` field, then `choices[0].delta.content`.
fn extract_content(json: &Map<String, Value>) -> String {
    if let Some(result) = json.get("result") {
        return value_text(result);
    }

    json.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .map(value_text)
        .unwrap_or_default()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Builds the user-facing message for an upstream error object.
///
/// Well-formed errors look like `{"code": "429", "message": "rate limited"}`; anything
/// else falls back to whatever text is available.
fn api_error_message(err: &Value) -> String {
    let code = err.get("code").map(value_text).unwrap_or_default();
    let message = err.get("message").and_then(Value::as_str);

    let message = match (message, err) {
        (Some(msg), _) => msg.to_string(),
        (None, Value::String(s)) => s.clone(),
        (None, _) if !code.is_empty() => {
            warn!(code = %code, "Upstream error object has no message");
            code.clone()
        }
        (None, other) => {
            warn!(error = %other, "Upstream error object has no message or code");
            other.to_string()
        }
    };

    error!(code = %code, message = %message, "LLM API returned an error");
    format!("{API_ERROR_PREFIX}{message}")
}
