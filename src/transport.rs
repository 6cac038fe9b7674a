use crate::error::TransportError;
use crate::types::Credential;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

/// One open push-feed connection.
#[async_trait]
pub trait ActivitySocket: Send {
    /// Next text frame. `None` once the peer has closed the connection.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Close from our side. Errors are swallowed; the socket is gone either way.
    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn ActivitySocket>, TransportError>;
}

/// Embed `credential` as the `param` query parameter on `base`, replacing
/// any value already there.
pub fn endpoint_for(base: &Url, param: &str, credential: &Credential) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(param, credential.expose());
    }
    url
}

/// `endpoint` as a loggable string, with the credential parameter masked.
pub fn redact(endpoint: &Url, param: &str) -> String {
    let mut url = endpoint.clone();
    let pairs: Vec<(String, String)> = endpoint
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == param { "***".to_string() } else { value.into_owned() };
            (key.into_owned(), value)
        })
        .collect();
    if !pairs.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn ActivitySocket>, TransportError> {
        let handshake = connect_async(endpoint.as_str());
        let (stream, _) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ActivitySocket for WsSocket {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "push feed sent close frame");
                    return None;
                }
                // Control frames are answered by tungstenite; binary frames
                // are not part of the feed.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Read(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("close handshake failed: {e}");
        }
    }
}
