use crate::types::Credential;
use std::sync::Arc;
use tokio::sync::watch;

/// Holds the current credential and notifies subscribers on every `set`.
///
/// Each `set` is a notification even when the value is unchanged: applying
/// the same credential again restarts the stream session.
#[derive(Clone)]
pub struct CredentialStore {
    tx: Arc<watch::Sender<Option<Credential>>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CredentialStore {
    pub fn new(initial: Option<Credential>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    pub fn set(&self, credential: Option<Credential>) {
        self.tx.send_replace(credential);
    }

    pub fn clear(&self) {
        self.set(None);
    }

    /// Change feed. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }
}
