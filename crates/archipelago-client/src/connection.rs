//! Connection lifecycle for one server link.
//!
//! [`ConnectionManager::connect`] validates the address, opens a transport
//! and spawns a link task that owns it. The link task multiplexes outbound
//! frames, inbound frames and the shutdown signal with `tokio::select!`,
//! decodes every inbound frame and publishes its packets on the
//! [`EventBus`] in order. State changes are broadcast via a [`watch`]
//! channel so any number of consumers can react without polling.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::address::ServerAddress;
use crate::error::SessionError;
use crate::events::{BusEvent, DisconnectReason, EventBus};
use crate::frame::{decode_frame, encode_frame};
use crate::packets::{ClientPacket, RoomInfo, ServerPacket};
use crate::transport::{Connector, Transport, TransportError};
use crate::types::NetworkVersion;

/// How long `connect` waits for `RoomInfo` by default.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a best-effort transport close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, waiting for `RoomInfo`.
    AwaitingHandshake,
    /// `RoomInfo` received; packets may be sent.
    Connected,
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current state, notifying subscribers only when it changes.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = ?*current, to = ?state, "connection state changed");
            *current = state;
            true
        });
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

struct OutboxInner {
    state: Arc<ConnectionStateWatch>,
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

/// Cloneable send handle onto the current link.
///
/// Trackers hold one so they can issue requests without owning the
/// connection. Sends never block and never queue while disconnected.
#[derive(Clone)]
pub struct Outbox {
    inner: Arc<OutboxInner>,
}

impl Outbox {
    /// An outbox with no link behind it; it follows `state` and sends once a
    /// link attaches.
    pub(crate) fn detached(state: Arc<ConnectionStateWatch>) -> Self {
        Self {
            inner: Arc::new(OutboxInner {
                state,
                tx: Mutex::new(None),
            }),
        }
    }

    /// Send an ordered batch of packets as one frame.
    ///
    /// Fails with [`SessionError::NotConnected`] unless the link is
    /// [`ConnectionState::Connected`]. An empty batch writes nothing.
    pub fn send(&self, packets: &[ClientPacket]) -> Result<(), SessionError> {
        if self.inner.state.current() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if packets.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(packets)?;
        let guard = self.inner.tx.lock();
        let tx = guard.as_ref().ok_or(SessionError::NotConnected)?;
        tx.send(frame).map_err(|_| SessionError::NotConnected)?;
        tracing::debug!(
            count = packets.len(),
            first = packets[0].cmd(),
            "queued outbound frame"
        );
        Ok(())
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.inner.tx.lock() = Some(tx);
    }

    fn detach(&self) {
        self.inner.tx.lock().take();
    }

    /// A connected outbox whose frames land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn loopback() -> (Self, mpsc::UnboundedReceiver<String>) {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connected);
        let outbox = Self::detached(state);
        let (tx, rx) = mpsc::unbounded_channel();
        outbox.attach(tx);
        (outbox, rx)
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

struct Link {
    shutdown: oneshot::Sender<DisconnectReason>,
    task: JoinHandle<()>,
}

/// Owns at most one live link and its lifecycle state.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    bus: EventBus,
    state: Arc<ConnectionStateWatch>,
    outbox: Outbox,
    handshake_timeout: Duration,
    link: Option<Link>,
    uri: Option<String>,
    server_version: Option<NetworkVersion>,
}

impl ConnectionManager {
    /// Create a manager that opens transports with `connector` and publishes
    /// on `bus`.
    pub fn new(connector: Arc<dyn Connector>, bus: EventBus) -> Self {
        let state = Arc::new(ConnectionStateWatch::new());
        let outbox = Outbox::detached(Arc::clone(&state));
        Self {
            connector,
            bus,
            state,
            outbox,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            link: None,
            uri: None,
            server_version: None,
        }
    }

    /// Override the `RoomInfo` wait.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Connect to `address` and wait for the server's `RoomInfo`.
    ///
    /// Any live link is disconnected first. The address is validated before
    /// any I/O.
    pub async fn connect(&mut self, address: &str) -> Result<RoomInfo, SessionError> {
        let address: ServerAddress = address.parse()?;
        self.disconnect().await;

        let url = address.url();
        self.uri = Some(url.clone());
        self.server_version = None;
        self.state.set(ConnectionState::Connecting);
        tracing::info!(%url, "connecting");

        let transport = match self.connector.open(&url).await {
            Ok(transport) => transport,
            Err(error) => {
                tracing::warn!(%url, %error, "could not open transport");
                self.state.set(ConnectionState::Disconnected);
                return Err(error.into());
            }
        };
        self.state.set(ConnectionState::AwaitingHandshake);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (handshake_tx, handshake_rx) = oneshot::channel();
        self.outbox.attach(outbound_tx);

        let task = tokio::spawn(run_link(LinkTask {
            transport,
            bus: self.bus.clone(),
            state: Arc::clone(&self.state),
            outbox: self.outbox.clone(),
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            handshake: Some(handshake_tx),
        }));
        self.link = Some(Link {
            shutdown: shutdown_tx,
            task,
        });

        match tokio::time::timeout(self.handshake_timeout, handshake_rx).await {
            Ok(Ok(Ok(room))) => {
                tracing::info!(
                    %url,
                    version = %room.version,
                    seed = %room.seed_name,
                    "handshake complete"
                );
                self.server_version = Some(room.version);
                Ok(room)
            }
            Ok(Ok(Err(error))) => {
                self.shutdown(DisconnectReason::Transport(error.to_string()))
                    .await;
                Err(error.into())
            }
            Ok(Err(_)) => {
                self.shutdown(DisconnectReason::ClosedByServer).await;
                Err(TransportError::Closed.into())
            }
            Err(_) => {
                tracing::warn!(%url, timeout = ?self.handshake_timeout, "no RoomInfo in time");
                self.shutdown(DisconnectReason::HandshakeTimeout).await;
                Err(SessionError::HandshakeTimeout)
            }
        }
    }

    /// Close the link. Does nothing when already disconnected.
    pub async fn disconnect(&mut self) {
        self.shutdown(DisconnectReason::Requested).await;
    }

    /// Send an ordered batch of packets as one frame.
    pub fn send(&self, packets: &[ClientPacket]) -> Result<(), SessionError> {
        self.outbox.send(packets)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Watch handle for state transitions.
    pub fn state_watch(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// URL of the most recent connection attempt.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Server version from the most recent successful handshake.
    pub fn server_version(&self) -> Option<NetworkVersion> {
        self.server_version
    }

    /// A send handle that follows this manager across reconnects.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// The bus this manager publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Stop the link task, if any, and wait for it to finish.
    ///
    /// The link task publishes `ConnectionLost` itself; when it already
    /// ended on its own the signal is simply ignored.
    async fn shutdown(&mut self, reason: DisconnectReason) {
        let Some(link) = self.link.take() else {
            return;
        };
        let _ = link.shutdown.send(reason);
        if let Err(error) = link.task.await {
            tracing::error!(%error, "link task failed");
            self.outbox.detach();
            self.state.set(ConnectionState::Disconnected);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.shutdown.send(DisconnectReason::Requested);
        }
    }
}

// ---------------------------------------------------------------------------
// Link task
// ---------------------------------------------------------------------------

struct LinkTask {
    transport: Box<dyn Transport>,
    bus: EventBus,
    state: Arc<ConnectionStateWatch>,
    outbox: Outbox,
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: oneshot::Receiver<DisconnectReason>,
    handshake: Option<oneshot::Sender<Result<RoomInfo, TransportError>>>,
}

enum LinkExit {
    Shutdown(DisconnectReason),
    Closed,
    Failed(TransportError),
}

async fn run_link(link: LinkTask) {
    let LinkTask {
        mut transport,
        bus,
        state,
        outbox,
        mut outbound,
        mut shutdown,
        mut handshake,
    } = link;

    let exit = loop {
        tokio::select! {
            reason = &mut shutdown => {
                break LinkExit::Shutdown(reason.unwrap_or(DisconnectReason::Requested));
            }
            Some(frame) = outbound.recv() => {
                if let Err(error) = transport.send(frame).await {
                    break LinkExit::Failed(error);
                }
            }
            inbound = transport.recv() => match inbound {
                None => break LinkExit::Closed,
                Some(Err(error)) => break LinkExit::Failed(error),
                Some(Ok(text)) => dispatch(&text, &bus, &state, &mut handshake),
            }
        }
    };

    let reason = match exit {
        LinkExit::Shutdown(reason) => reason,
        LinkExit::Closed => {
            if let Some(tx) = handshake.take() {
                let _ = tx.send(Err(TransportError::Closed));
            }
            DisconnectReason::ClosedByServer
        }
        LinkExit::Failed(error) => {
            tracing::warn!(%error, "transport failed");
            let reason = DisconnectReason::Transport(error.to_string());
            if let Some(tx) = handshake.take() {
                let _ = tx.send(Err(error));
            }
            reason
        }
    };

    outbox.detach();
    match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::debug!(%error, "transport close failed"),
        Err(_) => tracing::debug!("transport close timed out"),
    }
    state.set(ConnectionState::Disconnected);
    tracing::info!(%reason, "connection lost");
    bus.publish(BusEvent::ConnectionLost(reason));
}

/// Decode one inbound frame and publish its packets in order.
fn dispatch(
    text: &str,
    bus: &EventBus,
    state: &ConnectionStateWatch,
    handshake: &mut Option<oneshot::Sender<Result<RoomInfo, TransportError>>>,
) {
    let packets = match decode_frame(text) {
        Ok(packets) => packets,
        Err(error) => {
            tracing::warn!(%error, len = text.len(), "dropping malformed frame");
            return;
        }
    };

    for packet in packets {
        let handshake_room = match &packet {
            ServerPacket::RoomInfo(room) if handshake.is_some() => {
                state.set(ConnectionState::Connected);
                Some(room.clone())
            }
            _ => None,
        };
        tracing::debug!(kind = ?packet.kind(), "inbound packet");
        bus.publish(BusEvent::Packet(packet));
        if let Some(room) = handshake_room
            && let Some(tx) = handshake.take()
        {
            let _ = tx.send(Ok(room));
        }
    }
}
