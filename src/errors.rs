use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to reach LLM upstream: {0}")]
    UpstreamUnavailable(String),

    #[error("Failed to read LLM stream: {0}")]
    UpstreamRead(String),

    #[error("Failed to write relay envelope: {0}")]
    DownstreamWrite(String),

    #[error("Failed to serialize relay envelope: {0}")]
    Serialization(String),

    #[error("Invalid relay configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for RelayError {
    fn from(error: std::io::Error) -> Self {
        RelayError::DownstreamWrite(error.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        RelayError::Serialization(error.to_string())
    }
}
