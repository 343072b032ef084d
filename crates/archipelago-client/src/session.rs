//! Client session: one connection manager plus the state derived from it.
//!
//! A [`Session`] owns an [`EventBus`], a [`ConnectionManager`] and the
//! trackers fed by the bus. [`Session::connect`] runs the full handshake:
//!
//! ```text
//! open → RoomInfo → [GetDataPackage → DataPackage]
//!      → Connect → Connected | ConnectionRefused
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use crate::connection::{
    ConnectionManager, ConnectionState, ConnectionStateWatch, DEFAULT_HANDSHAKE_TIMEOUT, Outbox,
};
use crate::data_package::{DataPackageCache, DataPackageRetention};
use crate::data_storage::DataStorage;
use crate::error::SessionError;
use crate::events::{BusEvent, EventBus, EventHandler, Subscription, Topic};
use crate::items::ItemsTracker;
use crate::locations::LocationsTracker;
use crate::packets::{
    Bounce, ClientPacket, Connect, ConnectUpdate, Connected, GetDataPackage, PacketKind, RoomInfo,
    Say, ServerPacket, StatusUpdate,
};
use crate::room::RoomTracker;
use crate::transport::{Connector, WebSocketConnector};
use crate::types::{CLIENT_VERSION, ClientStatus, ItemsHandling, NetworkVersion};

/// Tag a client sets to take part in death links.
pub const DEATH_LINK_TAG: &str = "DeathLink";

/// Session-wide settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long each handshake step may take. Default: 10 s.
    pub handshake_timeout: Duration,
    /// What happens to cached data packages on disconnect. Default: retain.
    pub data_package_retention: DataPackageRetention,
    /// Whether `connect` requests data packages whose checksum changed.
    /// Default: true.
    pub fetch_data_package: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            data_package_retention: DataPackageRetention::Retain,
            fetch_data_package: true,
        }
    }
}

/// Slot credentials and capabilities sent in `Connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    /// Game name. May be empty with the `TextOnly` tag.
    pub game: String,
    /// Slot name.
    pub name: String,
    /// Room password.
    pub password: String,
    /// Identifier of this client install.
    pub uuid: String,
    /// Which items the server should forward.
    pub items_handling: ItemsHandling,
    /// Capability tags.
    pub tags: Vec<String>,
    /// Whether to ask for slot data.
    pub slot_data: bool,
    /// Protocol version to announce.
    pub version: NetworkVersion,
}

impl ConnectionInfo {
    /// Credentials for slot `name` playing `game`, with a fresh uuid.
    pub fn new(game: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            name: name.into(),
            password: String::new(),
            uuid: uuid::Uuid::new_v4().to_string(),
            items_handling: ItemsHandling::ALL,
            tags: Vec::new(),
            slot_data: true,
            version: CLIENT_VERSION,
        }
    }

    /// Set the room password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Replace the tag list.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set item handling flags.
    pub fn with_items_handling(mut self, items_handling: ItemsHandling) -> Self {
        self.items_handling = items_handling;
        self
    }

    /// Use a fixed uuid instead of a random one.
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Whether to ask for slot data.
    pub fn with_slot_data(mut self, slot_data: bool) -> Self {
        self.slot_data = slot_data;
        self
    }

    fn to_packet(&self) -> ClientPacket {
        ClientPacket::Connect(Connect {
            password: self.password.clone(),
            game: self.game.clone(),
            name: self.name.clone(),
            uuid: self.uuid.clone(),
            version: self.version,
            items_handling: self.items_handling,
            tags: self.tags.clone(),
            slot_data: self.slot_data,
        })
    }
}

/// A protocol client session.
pub struct Session {
    bus: EventBus,
    connection: ConnectionManager,
    config: SessionConfig,
    data_package: Arc<DataPackageCache>,
    locations: Arc<LocationsTracker>,
    items: Arc<ItemsTracker>,
    room: Arc<RoomTracker>,
    storage: Arc<DataStorage>,
    _subscriptions: Vec<Subscription>,
}

impl Session {
    /// Create a session with default settings.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_config(connector, SessionConfig::default())
    }

    /// Create a session over WebSockets.
    pub fn websocket(config: SessionConfig) -> Self {
        Self::with_config(Arc::new(WebSocketConnector), config)
    }

    /// Create a session with explicit settings.
    pub fn with_config(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let bus = EventBus::new();
        let connection = ConnectionManager::new(connector, bus.clone())
            .with_handshake_timeout(config.handshake_timeout);
        let outbox = connection.outbox().clone();

        let data_package = Arc::new(DataPackageCache::new());
        let locations = Arc::new(LocationsTracker::new(outbox.clone()));
        let items = Arc::new(ItemsTracker::new(outbox.clone()));
        let room = Arc::new(RoomTracker::new());
        let storage = Arc::new(DataStorage::new(outbox));

        let mut subscriptions = data_package.attach(&bus, config.data_package_retention);
        subscriptions.extend(room.attach(&bus));
        subscriptions.extend(locations.attach(&bus));
        subscriptions.extend(items.attach(&bus));
        subscriptions.extend(storage.attach(&bus));

        Self {
            bus,
            connection,
            config,
            data_package,
            locations,
            items,
            room,
            storage,
            _subscriptions: subscriptions,
        }
    }

    /// Connect to `address` and authenticate with `info`.
    ///
    /// Any existing connection is closed first. On refusal the link is
    /// closed and the server's reasons are returned.
    pub async fn connect(
        &mut self,
        address: &str,
        info: &ConnectionInfo,
    ) -> Result<Connected, SessionError> {
        let room = self.connection.connect(address).await?;
        match self.authenticate(&room, info).await {
            Ok(connected) => {
                tracing::info!(
                    team = connected.team,
                    slot = connected.slot,
                    missing = connected.missing_locations.len(),
                    "connected to slot"
                );
                Ok(connected)
            }
            Err(error) => {
                tracing::warn!(%error, "authentication failed");
                self.connection.disconnect().await;
                Err(error)
            }
        }
    }

    async fn authenticate(
        &self,
        room: &RoomInfo,
        info: &ConnectionInfo,
    ) -> Result<Connected, SessionError> {
        if self.config.fetch_data_package {
            let games = self
                .data_package
                .games_needing_refresh(&room.games, &room.datapackage_checksums);
            if !games.is_empty() {
                tracing::info!(?games, "requesting data packages");
                let request = ClientPacket::GetDataPackage(GetDataPackage { games: Some(games) });
                self.exchange(&[request], &[PacketKind::DataPackage]).await?;
            }
        }

        let reply = self
            .exchange(
                &[info.to_packet()],
                &[PacketKind::Connected, PacketKind::ConnectionRefused],
            )
            .await?;
        match reply {
            ServerPacket::Connected(connected) => Ok(connected),
            ServerPacket::ConnectionRefused(refused) => {
                Err(SessionError::ConnectionRefused(refused.errors))
            }
            other => {
                tracing::warn!(kind = ?other.kind(), "unexpected handshake reply");
                Err(SessionError::HandshakeTimeout)
            }
        }
    }

    /// Send `packets` and wait for the first packet of one of `expect`.
    async fn exchange(
        &self,
        packets: &[ClientPacket],
        expect: &[PacketKind],
    ) -> Result<ServerPacket, SessionError> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let expect = expect.to_vec();
        let waiter = self.bus.subscribe_all(
            &[Topic::AnyPacket, Topic::ConnectionLost],
            move |event: &BusEvent| {
                let outcome = match event {
                    BusEvent::Packet(packet) if expect.contains(&packet.kind()) => {
                        Ok(packet.clone())
                    }
                    BusEvent::ConnectionLost(reason) => {
                        Err(SessionError::Disconnected(reason.clone()))
                    }
                    BusEvent::Packet(_) => return,
                };
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(outcome);
                }
            },
        );

        let result = match self.connection.send(packets) {
            Err(error) => Err(error),
            Ok(()) => match tokio::time::timeout(self.config.handshake_timeout, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(SessionError::NotConnected),
                Err(_) => Err(SessionError::HandshakeTimeout),
            },
        };
        waiter.unsubscribe();
        result
    }

    /// Close the connection. Does nothing when already disconnected.
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
    }

    /// Send an ordered batch of packets as one frame.
    pub fn send(&self, packets: &[ClientPacket]) -> Result<(), SessionError> {
        self.connection.send(packets)
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<H: EventHandler + 'static>(&self, topic: Topic, handler: H) -> Subscription {
        self.bus.subscribe(topic, handler)
    }

    // --- Accessors ---

    /// Link state.
    pub fn status(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch handle for link state transitions.
    pub fn state_watch(&self) -> &Arc<ConnectionStateWatch> {
        self.connection.state_watch()
    }

    /// Whether `Connected` has been received on the current link.
    pub fn is_authenticated(&self) -> bool {
        self.status() == ConnectionState::Connected && self.room.is_authenticated()
    }

    /// URL of the most recent connection attempt.
    pub fn uri(&self) -> Option<&str> {
        self.connection.uri()
    }

    /// Server version from the most recent handshake.
    pub fn server_version(&self) -> Option<NetworkVersion> {
        self.connection.server_version()
    }

    /// The session's bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// A cloneable send handle.
    pub fn outbox(&self) -> Outbox {
        self.connection.outbox().clone()
    }

    /// Data package cache.
    pub fn data_package(&self) -> &Arc<DataPackageCache> {
        &self.data_package
    }

    /// Locations tracker.
    pub fn locations(&self) -> &Arc<LocationsTracker> {
        &self.locations
    }

    /// Received items.
    pub fn items(&self) -> &Arc<ItemsTracker> {
        &self.items
    }

    /// Room and slot state.
    pub fn room(&self) -> &Arc<RoomTracker> {
        &self.room
    }

    /// Data storage client.
    pub fn storage(&self) -> &Arc<DataStorage> {
        &self.storage
    }

    // --- Convenience senders ---

    /// Send chat text. Text starting with `!` is a server command.
    pub fn say(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(&[ClientPacket::Say(Say { text: text.into() })])
    }

    /// Report client progress.
    pub fn update_status(&self, status: ClientStatus) -> Result<(), SessionError> {
        self.send(&[ClientPacket::StatusUpdate(StatusUpdate { status })])
    }

    /// Ask for the full received-items list again.
    pub fn sync(&self) -> Result<(), SessionError> {
        self.send(&[ClientPacket::Sync])
    }

    /// Broadcast `bounce` to matching clients.
    pub fn bounce(&self, bounce: Bounce) -> Result<(), SessionError> {
        self.send(&[ClientPacket::Bounce(bounce)])
    }

    /// Announce a death to every `DeathLink` client.
    pub fn death_link(&self, source: &str, cause: Option<&str>) -> Result<(), SessionError> {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let mut data = json!({ "time": time, "source": source });
        if let Some(cause) = cause {
            data["cause"] = json!(cause);
        }
        self.bounce(Bounce {
            tags: Some(vec![DEATH_LINK_TAG.to_string()]),
            data,
            ..Default::default()
        })
    }

    /// Change tags or item handling on the live connection.
    pub fn update_connection(&self, update: ConnectUpdate) -> Result<(), SessionError> {
        self.send(&[ClientPacket::ConnectUpdate(update)])
    }

    /// Request data packages; `None` asks for every game.
    pub fn request_data_package(&self, games: Option<Vec<String>>) -> Result<(), SessionError> {
        self.send(&[ClientPacket::GetDataPackage(GetDataPackage { games })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_info_defaults() {
        let info = ConnectionInfo::new("Clique", "Player1");
        assert_eq!(info.items_handling, ItemsHandling::ALL);
        assert!(info.slot_data);
        assert_eq!(info.version, CLIENT_VERSION);
        assert!(uuid::Uuid::parse_str(&info.uuid).is_ok());

        let other = ConnectionInfo::new("Clique", "Player1");
        assert_ne!(info.uuid, other.uuid);
    }

    #[test]
    fn test_connect_packet_carries_info() {
        let info = ConnectionInfo::new("", "Watcher")
            .with_password("pw")
            .with_tags(["TextOnly"])
            .with_items_handling(ItemsHandling::NONE)
            .with_uuid("fixed")
            .with_slot_data(false);
        let value = serde_json::to_value(info.to_packet()).unwrap();
        assert_eq!(value["cmd"], "Connect");
        assert_eq!(value["password"], "pw");
        assert_eq!(value["tags"], json!(["TextOnly"]));
        assert_eq!(value["items_handling"], 0);
        assert_eq!(value["uuid"], "fixed");
        assert_eq!(value["slot_data"], false);
    }

    #[test]
    fn test_senders_fail_before_connect() {
        let (connector, _listener) = crate::transport::MemoryConnector::new();
        let session = Session::new(Arc::new(connector));
        assert_eq!(session.status(), ConnectionState::Disconnected);
        assert!(matches!(session.say("hi"), Err(SessionError::NotConnected)));
        assert!(matches!(
            session.death_link("me", None),
            Err(SessionError::NotConnected)
        ));
        assert!(!session.is_authenticated());
    }
}
