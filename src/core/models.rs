use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Default `maxTokens` when the caller does not send one.
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// One inbound relay request, as accepted by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub prompt: String,
    #[serde(default = "default_char_level")]
    pub char_level: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

const fn default_char_level() -> bool {
    true
}

const fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

/// Kind of an outbound envelope, serialized as the `dataType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// A content chunk delivered before the terminal envelope.
    #[serde(rename = "LLM_RESPONSE")]
    Chunk,
    /// Successful end of the relay.
    #[serde(rename = "END")]
    End,
    /// Failed end of the relay.
    #[serde(rename = "ERROR")]
    ErrorEnd,
}

/// One line of the outbound NDJSON stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub data_id: String,
    pub data_type: DataType,
    pub content: Option<String>,
    pub finished: bool,
    #[serde(with = "local_timestamp")]
    pub timestamp: NaiveDateTime,
    pub error_message: Option<String>,
    /// Reserved; always `None` today.
    pub sequence: Option<u32>,
}

impl EventEnvelope {
    #[must_use]
    pub fn chunk(stream_id: &str, content: impl Into<String>) -> Self {
        Self {
            data_id: stream_id.to_string(),
            data_type: DataType::Chunk,
            content: Some(content.into()),
            finished: false,
            timestamp: now(),
            error_message: None,
            sequence: None,
        }
    }

    #[must_use]
    pub fn end(stream_id: &str) -> Self {
        Self {
            data_id: stream_id.to_string(),
            data_type: DataType::End,
            content: None,
            finished: true,
            timestamp: now(),
            error_message: None,
            sequence: None,
        }
    }

    #[must_use]
    pub fn error_end(stream_id: &str, error_message: Option<String>) -> Self {
        Self {
            data_id: stream_id.to_string(),
            data_type: DataType::ErrorEnd,
            content: None,
            finished: true,
            timestamp: now(),
            error_message,
            sequence: None,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.data_type, DataType::End | DataType::ErrorEnd)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// `yyyy-MM-ddTHH:mm:ss.SSS` in local time, without offset.
mod local_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

    pub fn serialize<S>(timestamp: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&timestamp.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
