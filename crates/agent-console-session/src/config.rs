//! Session configuration.

use std::time::Duration;

use agent_console_core::IndexOrder;
use serde::{Deserialize, Serialize};

/// Default backend WebSocket endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws";

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Summary shown for a conversation until the backend names it.
pub const DEFAULT_PLACEHOLDER_SUMMARY: &str = "New conversation";

/// Runtime configuration for a session.
///
/// Every field has a default, so partial documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Flat delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Base URL of the `POST /execute` fallback, if the backend offers one.
    pub http_base: Option<String>,
    /// Order in which the backend lists conversations.
    pub index_order: IndexOrder,
    /// Request the conversation index, and the active conversation's
    /// history, every time the connection opens.
    pub refresh_on_open: bool,
    /// Summary for conversations the backend has not named yet.
    pub placeholder_summary: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            http_base: None,
            index_order: IndexOrder::default(),
            refresh_on_open: true,
            placeholder_summary: DEFAULT_PLACEHOLDER_SUMMARY.to_string(),
        }
    }
}

impl SessionConfig {
    /// Default configuration for the given endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document.
    ///
    /// # Errors
    /// Returns error if the document is not valid JSON or a field has the
    /// wrong type.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.reconnect_delay(), Duration::from_millis(1000));
        assert_eq!(config.index_order, IndexOrder::OldestFirst);
        assert!(config.refresh_on_open);
        assert_eq!(config.http_base, None);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = tokio_test::assert_ok!(SessionConfig::from_json(
            r#"{"url": "ws://backend:9000/ws", "index_order": "newest_first"}"#,
        ));
        assert_eq!(config.url, "ws://backend:9000/ws");
        assert_eq!(config.index_order, IndexOrder::NewestFirst);
        assert_eq!(config.reconnect_delay_ms, DEFAULT_RECONNECT_DELAY_MS);
        assert_eq!(config.placeholder_summary, DEFAULT_PLACEHOLDER_SUMMARY);
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        assert!(SessionConfig::from_json(r#"{"reconnect_delay_ms": "soon"}"#).is_err());
    }
}
