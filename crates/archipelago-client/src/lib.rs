//! Archipelago multiworld protocol client: packets, connection lifecycle,
//! event bus and the client-side state derived from server packets.

pub mod address;
pub mod connection;
pub mod data_package;
pub mod data_storage;
pub mod error;
pub mod events;
pub mod frame;
pub mod items;
pub mod locations;
pub mod packets;
pub mod reconnection;
pub mod room;
pub mod session;
pub mod transport;
pub mod types;

pub use address::{AddressError, ServerAddress};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStateWatch, Outbox};
pub use data_package::{DataPackageCache, DataPackageRetention, LookupError};
pub use data_storage::{DataStorage, SetBuilder};
pub use error::SessionError;
pub use events::{BusEvent, DisconnectReason, EventBus, EventHandler, Subscription, Topic};
pub use frame::{FrameError, decode_frame, encode_frame};
pub use items::{ItemsTracker, ItemsUpdate};
pub use locations::{LocationState, LocationsTracker};
pub use packets::{ClientPacket, PacketKind, ServerPacket};
pub use reconnection::{ReconnectConfig, ReconnectError, ReconnectState, reconnect_loop};
pub use room::RoomTracker;
pub use session::{ConnectionInfo, Session, SessionConfig};
pub use transport::{
    Connector, MemoryConnector, MemoryListener, MemoryPeer, Transport, TransportError,
    WebSocketConnector,
};
pub use types::{
    CLIENT_VERSION, ClientStatus, HintMode, ItemFlags, ItemsHandling, NetworkItem, NetworkVersion,
};
