use crate::backoff::ReconnectPolicy;
use crate::buffer::DEFAULT_HISTORY_CAPACITY;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Stream client configuration, supplied in the `initialize` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_credential_param")]
    pub credential_param: String,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Address for the HTTP read surface; `None` disables it.
    #[serde(default = "default_http_bind")]
    pub http_bind: Option<String>,
}

fn default_endpoint() -> String {
    "ws://localhost:3000".into()
}
fn default_credential_param() -> String {
    "apiKey".into()
}
fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_http_bind() -> Option<String> {
    Some("127.0.0.1:0".into())
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            credential_param: default_credential_param(),
            history_capacity: default_history_capacity(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            http_bind: default_http_bind(),
        }
    }
}

impl StreamConfig {
    /// Reject values the stream client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;
        if self.credential_param.is_empty() {
            return Err(ConfigError::EmptyCredentialParam);
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.base_delay_ms == 0 {
            return Err(ConfigError::ZeroBaseDelay);
        }
        Ok(())
    }

    /// Base endpoint, without the credential.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            source,
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: StreamConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.endpoint, "ws://localhost:3000");
        assert_eq!(config.credential_param, "apiKey");
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.http_bind.as_deref(), Some("127.0.0.1:0"));
        config.validate().unwrap();
    }

    #[test]
    fn http_surface_can_be_disabled() {
        let config: StreamConfig = serde_json::from_str(r#"{"http_bind":null}"#).unwrap();
        assert!(config.http_bind.is_none());
    }

    #[test]
    fn rejects_unusable_values() {
        let bad_scheme = StreamConfig {
            endpoint: "http://localhost:3000".into(),
            ..StreamConfig::default()
        };
        assert!(matches!(
            bad_scheme.validate(),
            Err(ConfigError::UnsupportedScheme(s)) if s == "http"
        ));

        let unparsable = StreamConfig {
            endpoint: "not a url".into(),
            ..StreamConfig::default()
        };
        assert!(matches!(
            unparsable.validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));

        let no_room = StreamConfig {
            history_capacity: 0,
            ..StreamConfig::default()
        };
        assert!(matches!(no_room.validate(), Err(ConfigError::ZeroCapacity)));

        let no_delay = StreamConfig {
            base_delay_ms: 0,
            ..StreamConfig::default()
        };
        assert!(matches!(no_delay.validate(), Err(ConfigError::ZeroBaseDelay)));
    }

    #[test]
    fn max_delay_never_below_base() {
        let config = StreamConfig {
            base_delay_ms: 500,
            max_delay_ms: 100,
            ..StreamConfig::default()
        };
        assert_eq!(config.reconnect_policy().max_delay, Duration::from_millis(500));
    }
}
