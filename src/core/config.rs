use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::errors::RelayError;

pub const DEFAULT_API_URL: &str = "https://qianfan.baidubce.com/v2/chat/completions";
pub const DEFAULT_MODEL: &str = "ernie-speed-pro-128k";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Delay between character envelopes in char-level mode.
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_url: Url,
    pub api_key: String,
    pub model: String,
    /// Time allowed for the upstream to answer with response headers.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Idle time allowed between two reads of the upstream body.
    pub read_timeout: Duration,
    /// Hard deadline for one relay, from upstream request to terminal envelope.
    pub relay_timeout: Duration,
    pub pacing_delay: Duration,
    pub listen_addr: SocketAddr,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, so tests don't have to touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(&api_url)
            .map_err(|e| RelayError::Config(format!("LLM_API_URL: {e}")))?;

        let api_key = lookup("LLM_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RelayError::Config("LLM_API_KEY: not set".to_string()))?;

        let listen_addr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e| RelayError::Config(format!("LISTEN_ADDR: {e}")))?;

        Ok(Self {
            api_url,
            api_key,
            model: lookup("LLM_API_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            request_timeout: Duration::from_millis(parse_number(
                &lookup,
                "LLM_API_TIMEOUT_MS",
                60_000,
            )?),
            connect_timeout: Duration::from_secs(parse_number(
                &lookup,
                "LLM_CONNECT_TIMEOUT_SECS",
                30,
            )?),
            read_timeout: Duration::from_secs(parse_number(&lookup, "LLM_READ_TIMEOUT_SECS", 60)?),
            relay_timeout: Duration::from_secs(parse_number(&lookup, "RELAY_TIMEOUT_SECS", 60)?),
            pacing_delay: DEFAULT_PACING_DELAY,
            listen_addr,
        })
    }
}

fn parse_number<F>(lookup: &F, key: &str, default: u64) -> Result<u64, RelayError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RelayError::Config(format!("{key}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = RelayConfig::from_lookup(lookup_from(&[("LLM_API_KEY", "secret")])).unwrap();

        assert_eq!(config.api_url.as_str(), DEFAULT_API_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.relay_timeout, Duration::from_secs(60));
        assert_eq!(config.pacing_delay, Duration::from_millis(50));
        assert_eq!(config.listen_addr.port(), 8080);
    }

    #[test]
    fn overrides_are_read() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("LLM_API_KEY", "secret"),
            ("LLM_API_URL", "http://localhost:9000/v1/chat/completions"),
            ("LLM_API_MODEL", "gpt-4o-mini"),
            ("LLM_API_TIMEOUT_MS", "1500"),
            ("RELAY_TIMEOUT_SECS", "5"),
            ("LISTEN_ADDR", "127.0.0.1:3000"),
        ]))
        .unwrap();

        assert_eq!(config.api_url.port(), Some(9000));
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.relay_timeout, Duration::from_secs(5));
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("LLM_API_KEY"));
    }

    #[test]
    fn bad_numbers_and_urls_are_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("LLM_API_KEY", "secret"),
            ("RELAY_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RELAY_TIMEOUT_SECS"));

        let err = RelayConfig::from_lookup(lookup_from(&[
            ("LLM_API_KEY", "secret"),
            ("LLM_API_URL", "not a url"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("LLM_API_URL"));
    }
}
