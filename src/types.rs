use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque access credential (the dashboard API key).
///
/// `Debug` and `Display` only ever show the fingerprint, so a credential
/// can be passed to `tracing` fields without leaking it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token, for embedding into the connection endpoint.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars of the SHA-256 of the token.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

/// Discriminant of an [`ActivityEvent`], taken from its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Info,
    DeliveryAttempt,
    DeliverySuccess,
    DeliveryFailed,
    DeliveryError,
    /// A `type` this client does not know yet. Still buffered.
    Unknown,
}

impl EventKind {
    pub fn from_discriminant(value: &str) -> Self {
        match value {
            "info" => Self::Info,
            "delivery_attempt" => Self::DeliveryAttempt,
            "delivery_success" => Self::DeliverySuccess,
            "delivery_failed" => Self::DeliveryFailed,
            "delivery_error" => Self::DeliveryError,
            _ => Self::Unknown,
        }
    }
}

/// One decoded push-feed message.
///
/// The payload is kept exactly as received: field shapes are not validated,
/// so the typed accessors below return `None` for absent or mistyped fields
/// rather than rejecting the event. Serializes back to the original object.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    kind: EventKind,
    payload: Map<String, Value>,
}

impl ActivityEvent {
    /// Caller guarantees `payload["type"]` is a string matching `kind`.
    pub(crate) fn new(kind: EventKind, payload: Map<String, Value>) -> Self {
        Self { kind, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The raw discriminant, including unrecognised ones.
    pub fn type_name(&self) -> &str {
        self.str_field("type").unwrap_or_default()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn delivery_id(&self) -> Option<&str> {
        self.str_field("deliveryId")
    }

    pub fn webhook_id(&self) -> Option<&str> {
        self.str_field("webhookId")
    }

    pub fn event_id(&self) -> Option<&str> {
        self.str_field("eventId")
    }

    pub fn message(&self) -> Option<&str> {
        self.str_field("message")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.str_field("eventType")
    }

    pub fn url(&self) -> Option<&str> {
        self.str_field("url")
    }

    pub fn attempt(&self) -> Option<u64> {
        self.payload.get("attempt").and_then(Value::as_u64)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.payload
            .get("statusCode")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
    }

    pub fn response(&self) -> Option<&Value> {
        self.payload.get("response")
    }

    pub fn reason(&self) -> Option<&str> {
        self.str_field("reason")
    }

    pub fn error(&self) -> Option<&str> {
        self.str_field("error")
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

impl Serialize for ActivityEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

/// An accepted event as it sits in the activity buffer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub event: ActivityEvent,
}

/// Connection status as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum StreamStatus {
    #[default]
    Uninstantiated,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninstantiated => "Uninstantiated",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        };
        f.write_str(label)
    }
}

/// Immutable `{status, history}` view handed to consumers. History is
/// newest first. Cloning is cheap: the history is shared.
#[derive(Debug, Clone, Serialize)]
pub struct StreamView {
    pub status: StreamStatus,
    pub history: Arc<[ActivityEntry]>,
}

impl Default for StreamView {
    fn default() -> Self {
        Self::new(StreamStatus::default(), Arc::from(Vec::new()))
    }
}

impl StreamView {
    pub fn new(status: StreamStatus, history: Arc<[ActivityEntry]>) -> Self {
        Self { status, history }
    }

    /// History entries for one webhook, newest first.
    pub fn for_webhook<'a>(
        &'a self,
        webhook_id: &'a str,
    ) -> impl Iterator<Item = &'a ActivityEntry> + 'a {
        self.history
            .iter()
            .filter(move |entry| entry.event.webhook_id() == Some(webhook_id))
    }
}
