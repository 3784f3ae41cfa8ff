//! Client configuration.
//!
//! The backend location and the stream safety valve are explicit values passed
//! to the client at construction instead of process-wide globals.

use std::time::Duration;

use serde::Deserialize;

/// Environment variable holding the backend base URL.
pub const BACKEND_URL_ENV: &str = "TACHELES_BACKEND_URL";

/// Environment variable overriding the stream read limit.
pub const MAX_STREAM_READS_ENV: &str = "TACHELES_MAX_STREAM_READS";

/// Configuration for the chat client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the backend (e.g., "http://localhost:8000").
    #[serde(default = "ClientConfig::default_backend_url")]
    pub backend_url: String,

    /// Upper bound on reads from one response stream.
    #[serde(default = "ClientConfig::default_max_stream_reads")]
    pub max_stream_reads: u64,

    /// Connect timeout in seconds.
    #[serde(default = "ClientConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ClientConfig {
    fn default_backend_url() -> String {
        "http://localhost:8000".to_string()
    }

    const fn default_max_stream_reads() -> u64 {
        10_000_000
    }

    const fn default_request_timeout() -> u64 {
        10
    }

    /// Create a configuration for `backend_url` with default limits.
    #[must_use]
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            ..Self::default()
        }
    }

    /// Load the configuration from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                config.backend_url = url;
            }
        }

        if let Ok(raw) = std::env::var(MAX_STREAM_READS_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(limit) if limit > 0 => config.max_stream_reads = limit,
                _ => tracing::warn!(
                    value = %raw,
                    default = config.max_stream_reads,
                    "Ignoring invalid {MAX_STREAM_READS_ENV}"
                ),
            }
        }

        config
    }

    /// Override the stream read limit.
    #[must_use]
    pub fn with_max_stream_reads(mut self, limit: u64) -> Self {
        self.max_stream_reads = limit;
        self
    }

    /// Backend URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.backend_url.trim_end_matches('/')
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: Self::default_backend_url(),
            max_stream_reads: Self::default_max_stream_reads(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.backend_url, "http://localhost:8000");
        assert_eq!(config.max_stream_reads, 10_000_000);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let config = ClientConfig::new("http://chat.example.com/");
        assert_eq!(config.base_url(), "http://chat.example.com");
    }

    #[test]
    fn deserialize_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"backend_url": "http://backend:8000"}"#).unwrap();
        assert_eq!(config.backend_url, "http://backend:8000");
        assert_eq!(config.max_stream_reads, 10_000_000);
        assert_eq!(config.request_timeout_seconds, 10);
    }

    #[test]
    fn with_max_stream_reads_overrides() {
        let config = ClientConfig::default().with_max_stream_reads(5);
        assert_eq!(config.max_stream_reads, 5);
    }
}
