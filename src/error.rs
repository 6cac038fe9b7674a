use std::time::Duration;

use thiserror::Error;

/// Why an inbound frame was discarded instead of buffered.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
}

/// Failures of the physical push-feed connection. These drive the retry
/// policy and are never returned to stream consumers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("read failed: {0}")]
    Read(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint `{endpoint}`: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("endpoint scheme must be ws or wss, got `{0}`")]
    UnsupportedScheme(String),
    #[error("credential_param must not be empty")]
    EmptyCredentialParam,
    #[error("history_capacity must be at least 1")]
    ZeroCapacity,
    #[error("base_delay_ms must be at least 1")]
    ZeroBaseDelay,
}
