#![allow(dead_code)]

use async_trait::async_trait;
use nexus_activity_stream::error::TransportError;
use nexus_activity_stream::{
    ActivitySocket, Connector, StreamManager, StreamStatus, StreamView, Subscription,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use url::Url;

/// A connect call waiting for the test to decide its outcome.
pub struct PendingConnect {
    pub endpoint: Url,
    pub at: Instant,
    reply: oneshot::Sender<Result<Box<dyn ActivitySocket>, TransportError>>,
}

impl PendingConnect {
    /// Accept the connection and hand back the feed side of it.
    pub fn accept(self) -> FeedHandle {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let socket = ScriptedSocket {
            frames: frames_rx,
            closed: closed.clone(),
        };
        let accepted = self.reply.send(Ok(Box::new(socket))).is_ok();
        FeedHandle {
            frames: frames_tx,
            closed,
            accepted,
        }
    }

    pub fn refuse(self) {
        let _ = self
            .reply
            .send(Err(TransportError::Connect("connection refused".into())));
    }
}

/// Server side of an accepted scripted connection. Dropping it ends the
/// connection as if the peer went away.
pub struct FeedHandle {
    frames: mpsc::UnboundedSender<Result<String, TransportError>>,
    closed: Arc<AtomicBool>,
    pub accepted: bool,
}

impl FeedHandle {
    pub fn send(&self, text: impl Into<String>) {
        let _ = self.frames.send(Ok(text.into()));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.frames.send(Err(TransportError::Read(reason.into())));
    }

    /// Whether the client closed this connection from its side.
    pub fn closed_by_client(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedSocket {
    frames: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ActivitySocket for ScriptedSocket {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.frames.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector whose every connect attempt is surfaced to the test.
pub struct ScriptedConnector {
    requests: mpsc::UnboundedSender<PendingConnect>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PendingConnect>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { requests: tx }), rx)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn ActivitySocket>, TransportError> {
        let (reply, outcome) = oneshot::channel();
        let pending = PendingConnect {
            endpoint: endpoint.clone(),
            at: Instant::now(),
            reply,
        };
        if self.requests.send(pending).is_err() {
            return Err(TransportError::Connect("script finished".into()));
        }
        outcome
            .await
            .unwrap_or_else(|_| Err(TransportError::Connect("script dropped the attempt".into())))
    }
}

/// Every view the manager publishes, in order.
pub struct Views {
    rx: mpsc::UnboundedReceiver<StreamView>,
    _subscription: Subscription,
}

impl Views {
    pub fn attach(manager: &StreamManager) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = manager.subscribe(move |view| {
            let _ = tx.send(view.clone());
        });
        Self {
            rx,
            _subscription: subscription,
        }
    }

    pub async fn next(&mut self) -> StreamView {
        tokio::time::timeout(Duration::from_secs(600), self.rx.recv())
            .await
            .expect("no view published")
            .expect("publisher gone")
    }

    pub async fn next_status(&mut self) -> StreamStatus {
        self.next().await.status
    }

    /// Skip views until one matches.
    pub async fn until(&mut self, mut matches: impl FnMut(&StreamView) -> bool) -> StreamView {
        loop {
            let view = self.next().await;
            if matches(&view) {
                return view;
            }
        }
    }

    pub fn try_next(&mut self) -> Option<StreamView> {
        self.rx.try_recv().ok()
    }
}

pub async fn next_connect(
    requests: &mut mpsc::UnboundedReceiver<PendingConnect>,
) -> PendingConnect {
    tokio::time::timeout(Duration::from_secs(600), requests.recv())
        .await
        .expect("no connect attempt")
        .expect("connector gone")
}

pub fn delivery_success(n: u32) -> String {
    format!(
        r#"{{"type":"delivery_success","deliveryId":"d{n}","webhookId":"w1","eventId":"e{n}","statusCode":200}}"#
    )
}
