//! Text-frame transports.
//!
//! The connection manager only needs to open a socket, write text frames,
//! read text frames and close. [`Connector`] and [`Transport`] capture that;
//! [`WebSocketConnector`] is the real implementation and [`MemoryConnector`]
//! runs both ends in-process over channels.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::packets::ServerPacket;

/// Errors surfaced by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket protocol or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The other end is gone.
    #[error("transport closed")]
    Closed,
}

/// An open, bidirectional text channel.
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Read the next text frame. `None` means the peer closed cleanly.
    ///
    /// Must be cancel-safe: it is polled inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the channel.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports to a URL.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `url` (`ws://host:port` or `wss://host:port`).
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Opens [`WebSocketTransport`]s with tokio-tungstenite.
///
/// `wss://` needs the `tls` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(url, status = %response.status(), "websocket opened");
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

/// A client WebSocket carrying text frames.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::warn!("dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Connector whose transports are channel pairs.
///
/// Every successful [`open`](Connector::open) hands the server side to the
/// paired [`MemoryListener`] as a [`MemoryPeer`]. Once the listener is
/// dropped, opens fail with [`TransportError::Closed`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the listener that receives its connections.
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (Self { accept_tx }, MemoryListener { accept_rx })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            tx: Some(to_client_tx),
            rx: to_server_rx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Closed)?;
        Ok(Box::new(MemoryTransport {
            tx: Some(to_server_tx),
            rx: to_client_rx,
        }))
    }
}

/// Receives the server side of every [`MemoryConnector`] connection.
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take a connection if one was opened already.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

/// Server side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// URL the client opened.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a raw text frame to the client. Returns `false` if the client
    /// side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Push a JSON value as one frame.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Push packets as one frame.
    pub fn send_packets(&self, packets: &[ServerPacket]) -> bool {
        match serde_json::to_string(packets) {
            Ok(text) => self.send_text(text),
            Err(error) => {
                tracing::warn!(%error, "could not encode server packets");
                false
            }
        }
    }

    /// Next frame written by the client, `None` once it closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next frame as JSON. Non-JSON frames come back as a JSON string.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.rx.recv().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// A frame if one is already waiting.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Close the server side; the client reads end-of-stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

/// Client side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}
