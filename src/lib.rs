//! Live webhook-activity stream client.
//!
//! Keeps one push-feed connection per current credential, reconnects with
//! bounded exponential backoff, decodes inbound frames into
//! [`ActivityEvent`]s and publishes a bounded, newest-first `{status,
//! history}` view to any number of listeners.

pub mod backoff;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod credential;
pub mod error;
pub mod http_server;
pub mod machine;
pub mod manager;
pub mod publisher;
pub mod summary;
pub mod transport;
pub mod types;

pub use config::StreamConfig;
pub use credential::CredentialStore;
pub use manager::StreamManager;
pub use publisher::{StatePublisher, Subscription};
pub use summary::ActivitySummary;
pub use transport::{ActivitySocket, Connector, WsConnector};
pub use types::{ActivityEntry, ActivityEvent, Credential, EventKind, StreamStatus, StreamView};
