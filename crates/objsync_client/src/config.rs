//! Client configuration.

use crate::error::{ClientError, ClientResult};
use std::time::Duration;

/// Connection settings shared by every component of a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application id sent with every request.
    pub application_id: String,
    /// REST endpoint, e.g. `https://example.com/server`.
    pub server_url: String,
    /// Live query endpoint, e.g. `wss://example.com/server`.
    pub live_query_url: String,
    /// Client key, for servers that require one.
    pub client_key: Option<String>,
    /// How long to wait for `connected` after opening a connection.
    pub connect_timeout: Duration,
    /// How long to wait for a subscribe/unsubscribe reply or a REST response.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(application_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            server_url: server_url.into(),
            live_query_url: String::new(),
            client_key: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the live query endpoint.
    pub fn with_live_query_url(mut self, url: impl Into<String>) -> Self {
        self.live_query_url = url.into();
        self
    }

    /// Sets the client key.
    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the live query endpoint, falling back to the REST endpoint.
    pub fn effective_live_query_url(&self) -> &str {
        if self.live_query_url.is_empty() {
            &self.server_url
        } else {
            &self.live_query_url
        }
    }

    /// Checks that the settings needed to connect are present.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if the application id or both
    /// endpoints are empty.
    pub fn validate(&self) -> ClientResult<()> {
        if self.application_id.trim().is_empty() {
            return Err(ClientError::InvalidConfig("application id is empty".into()));
        }
        if self.effective_live_query_url().trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "server url is null or empty".into(),
            ));
        }
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ClientError::InvalidConfig("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("app", "https://example.com/server")
            .with_live_query_url("wss://example.com/server")
            .with_client_key("key")
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.application_id, "app");
        assert_eq!(config.effective_live_query_url(), "wss://example.com/server");
        assert_eq!(config.client_key.as_deref(), Some("key"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn live_query_url_falls_back_to_server_url() {
        let config = ClientConfig::new("app", "https://example.com");
        assert_eq!(config.effective_live_query_url(), "https://example.com");
    }

    #[test]
    fn validate_rejects_missing_settings() {
        assert!(matches!(
            ClientConfig::default().validate(),
            Err(ClientError::InvalidConfig(_))
        ));
        assert!(ClientConfig::new("app", "").validate().is_err());
        assert!(ClientConfig::new("app", "u")
            .with_connect_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
