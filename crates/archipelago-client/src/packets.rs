//! Wire packets, one tagged union per direction.
//!
//! Every packet is a JSON object discriminated by its `cmd` field. Server
//! packets are decoded per `cmd` by [`ServerPacket::from_value`]; the frame
//! layer maps anything it cannot decode onto [`ServerPacket::Unrecognized`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{
    ClientStatus, DataPackageObject, HintMode, ItemsHandling, JsonMessagePart, NetworkItem,
    NetworkPlayer, NetworkSlot, NetworkVersion, Permissions,
};

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Packets the client sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum ClientPacket {
    // --- Handshake ---
    /// Authenticate against a slot.
    Connect(Connect),
    /// Change tags or item handling after connecting.
    ConnectUpdate(ConnectUpdate),
    /// Request metadata for some or all games.
    GetDataPackage(GetDataPackage),

    // --- Gameplay ---
    /// Report checked locations.
    LocationChecks(LocationChecks),
    /// Ask what items sit at some locations.
    LocationScouts(LocationScouts),
    /// Report client progress.
    StatusUpdate(StatusUpdate),
    /// Ask the server to resend the full received-items list.
    Sync,

    // --- Messaging ---
    /// Chat text or server command.
    Say(Say),
    /// Broadcast arbitrary data to matching clients.
    Bounce(Bounce),

    // --- Data storage ---
    /// Read keys.
    Get(Get),
    /// Mutate a key.
    Set(Set),
    /// Subscribe to changes of keys.
    SetNotify(SetNotify),
}

impl ClientPacket {
    /// The `cmd` string this packet is sent under.
    pub fn cmd(&self) -> &'static str {
        match self {
            ClientPacket::Connect(_) => "Connect",
            ClientPacket::ConnectUpdate(_) => "ConnectUpdate",
            ClientPacket::GetDataPackage(_) => "GetDataPackage",
            ClientPacket::LocationChecks(_) => "LocationChecks",
            ClientPacket::LocationScouts(_) => "LocationScouts",
            ClientPacket::StatusUpdate(_) => "StatusUpdate",
            ClientPacket::Sync => "Sync",
            ClientPacket::Say(_) => "Say",
            ClientPacket::Bounce(_) => "Bounce",
            ClientPacket::Get(_) => "Get",
            ClientPacket::Set(_) => "Set",
            ClientPacket::SetNotify(_) => "SetNotify",
        }
    }
}

/// Slot authentication request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connect {
    /// Room password, empty when none.
    pub password: String,
    /// Game name; must match the slot's game unless tags allow otherwise.
    pub game: String,
    /// Slot name.
    pub name: String,
    /// Unique identifier of this client install.
    pub uuid: String,
    /// Client protocol version.
    pub version: NetworkVersion,
    /// Which items the server should forward.
    pub items_handling: ItemsHandling,
    /// Client capability tags such as `DeathLink` or `TextOnly`.
    pub tags: Vec<String>,
    /// Whether the server should include slot data in `Connected`.
    pub slot_data: bool,
}

/// Post-connect update of tags or item handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectUpdate {
    /// New item handling flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_handling: Option<ItemsHandling>,
    /// New tag list, replacing the old one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Data package request. `None` asks for every game.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GetDataPackage {
    /// Games to include.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub games: Option<Vec<String>>,
}

/// Locations the player has checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocationChecks {
    /// Location ids.
    pub locations: Vec<i64>,
}

/// Locations to preview.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocationScouts {
    /// Location ids.
    pub locations: Vec<i64>,
    /// Whether scouting also creates hints.
    pub create_as_hint: HintMode,
}

/// Client status report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    /// New status.
    pub status: ClientStatus,
}

/// Chat message. Text starting with `!` is a server command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Say {
    /// Message text.
    pub text: String,
}

/// Relayed broadcast. A client receives it if it matches any filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Bounce {
    /// Games to deliver to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub games: Option<Vec<String>>,
    /// Slots to deliver to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<u32>>,
    /// Tags to deliver to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Payload.
    #[serde(default)]
    pub data: Value,
}

/// Data storage read. Extra fields are echoed back in `Retrieved`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Get {
    /// Keys to read.
    pub keys: Vec<String>,
    /// Caller fields echoed by the server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One step of a data storage mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataStorageOperation {
    /// Operation name.
    pub operation: StorageOperation,
    /// Operand.
    pub value: Value,
}

/// Operations the server can apply to a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageOperation {
    /// Overwrite the value.
    Replace,
    /// Keep the current value, creating it from `default` if absent.
    Default,
    /// Add (numbers) or concatenate (lists).
    Add,
    /// Multiply.
    Mul,
    /// Raise to a power.
    Pow,
    /// Modulo.
    Mod,
    /// Round down.
    Floor,
    /// Round up.
    Ceil,
    /// Keep the larger value.
    Max,
    /// Keep the smaller value.
    Min,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Bitwise left shift.
    LeftShift,
    /// Bitwise right shift.
    RightShift,
    /// Remove the first occurrence of a list element.
    Remove,
    /// Remove a list index or dict key.
    Pop,
    /// Merge a dict into the stored dict.
    Update,
}

/// Data storage write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Set {
    /// Key to modify.
    pub key: String,
    /// Starting value when the key does not exist.
    pub default: Value,
    /// Whether the server should answer with `SetReply`.
    pub want_reply: bool,
    /// Operations applied left to right.
    pub operations: Vec<DataStorageOperation>,
    /// Caller fields echoed by the server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Subscribe to data storage changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SetNotify {
    /// Keys to watch.
    pub keys: Vec<String>,
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Packets the server sends.
///
/// Serializes with the `cmd` tag, which is how tests and in-process servers
/// build frames. Decoding goes through [`ServerPacket::from_value`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum ServerPacket {
    // --- Handshake ---
    /// Unauthenticated room description; first packet on every connection.
    RoomInfo(RoomInfo),
    /// `Connect` was rejected.
    ConnectionRefused(ConnectionRefused),
    /// `Connect` succeeded.
    Connected(Connected),
    /// Partial room state change.
    RoomUpdate(RoomUpdate),
    /// Requested game metadata.
    DataPackage(DataPackage),

    // --- Gameplay ---
    /// Items sent to this slot.
    ReceivedItems(ReceivedItems),
    /// Reply to `LocationScouts`.
    LocationInfo(LocationInfo),

    // --- Messaging ---
    /// Rich text message.
    #[serde(rename = "PrintJSON")]
    PrintJson(PrintJson),
    /// Relayed `Bounce`.
    Bounced(Bounced),
    /// The server could not process a packet.
    InvalidPacket(InvalidPacket),

    // --- Data storage ---
    /// Reply to `Get`.
    Retrieved(Retrieved),
    /// Reply to `Set` or a `SetNotify` notification.
    SetReply(SetReply),

    /// Anything the client could not classify.
    #[serde(skip)]
    Unrecognized(RawPacket),
}

/// Room description.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomInfo {
    /// Server protocol version.
    pub version: NetworkVersion,
    /// Version of the generator that produced the seed.
    #[serde(default)]
    pub generator_version: NetworkVersion,
    /// Server tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether a password is required.
    #[serde(default)]
    pub password: bool,
    /// Command permissions.
    #[serde(default)]
    pub permissions: Permissions,
    /// Percentage of locations a hint costs.
    #[serde(default)]
    pub hint_cost: u32,
    /// Hint points gained per checked location.
    #[serde(default)]
    pub location_check_points: u32,
    /// Games present in the multiworld.
    #[serde(default)]
    pub games: Vec<String>,
    /// Game name → data package checksum.
    #[serde(default)]
    pub datapackage_checksums: HashMap<String, String>,
    /// Seed identifier.
    #[serde(default)]
    pub seed_name: String,
    /// Server unix time.
    #[serde(default)]
    pub time: f64,
}

/// Reasons the server gives for refusing `Connect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionRefusedReason {
    /// No slot with that name.
    InvalidSlot,
    /// The slot plays a different game.
    InvalidGame,
    /// Client version is not supported.
    IncompatibleVersion,
    /// Wrong password.
    InvalidPassword,
    /// `items_handling` is not acceptable.
    InvalidItemsHandling,
    /// A reason this client does not know.
    Other(String),
}

impl From<String> for ConnectionRefusedReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "InvalidSlot" => Self::InvalidSlot,
            "InvalidGame" => Self::InvalidGame,
            "IncompatibleVersion" => Self::IncompatibleVersion,
            "InvalidPassword" => Self::InvalidPassword,
            "InvalidItemsHandling" => Self::InvalidItemsHandling,
            _ => Self::Other(value),
        }
    }
}

impl From<ConnectionRefusedReason> for String {
    fn from(value: ConnectionRefusedReason) -> Self {
        match value {
            ConnectionRefusedReason::InvalidSlot => "InvalidSlot".to_string(),
            ConnectionRefusedReason::InvalidGame => "InvalidGame".to_string(),
            ConnectionRefusedReason::IncompatibleVersion => "IncompatibleVersion".to_string(),
            ConnectionRefusedReason::InvalidPassword => "InvalidPassword".to_string(),
            ConnectionRefusedReason::InvalidItemsHandling => "InvalidItemsHandling".to_string(),
            ConnectionRefusedReason::Other(other) => other,
        }
    }
}

impl std::fmt::Display for ConnectionRefusedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

/// Refusal of `Connect`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionRefused {
    /// Why the connection was refused.
    #[serde(default)]
    pub errors: Vec<ConnectionRefusedReason>,
}

/// Successful authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Connected {
    /// Team of the connected slot.
    pub team: u32,
    /// Connected slot.
    pub slot: u32,
    /// Every player in the multiworld.
    #[serde(default)]
    pub players: Vec<NetworkPlayer>,
    /// Locations not yet checked.
    #[serde(default)]
    pub missing_locations: Vec<i64>,
    /// Locations already checked.
    #[serde(default)]
    pub checked_locations: Vec<i64>,
    /// Game-specific slot data.
    #[serde(default)]
    pub slot_data: Value,
    /// Slot number → slot description.
    #[serde(default)]
    pub slot_info: HashMap<u32, NetworkSlot>,
    /// Hint points available.
    #[serde(default)]
    pub hint_points: i64,
}

/// Incremental room change. Only present fields changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomUpdate {
    /// Newly checked locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_locations: Option<Vec<i64>>,
    /// Updated player list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<NetworkPlayer>>,
    /// New hint point total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_points: Option<i64>,
    /// New permissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// New hint cost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_cost: Option<u32>,
    /// New location check points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_check_points: Option<u32>,
    /// New server tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Requested game metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataPackage {
    /// Package contents.
    pub data: DataPackageObject,
}

/// Items sent to this slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReceivedItems {
    /// Position of the first item within the slot's full history.
    pub index: usize,
    /// Items in order.
    pub items: Vec<NetworkItem>,
}

/// Items at scouted locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocationInfo {
    /// One entry per scouted location.
    pub locations: Vec<NetworkItem>,
}

/// Rich text message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrintJson {
    /// Message fragments.
    pub data: Vec<JsonMessagePart>,
    /// Message kind (`ItemSend`, `Chat`, `Hint`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Receiving slot for item messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiving: Option<u32>,
    /// Item involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<NetworkItem>,
    /// Whether a hinted item was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<bool>,
    /// Team of the speaking player.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<u32>,
    /// Slot of the speaking player.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
    /// Raw chat text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Tags of the client that caused the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Countdown value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown: Option<i64>,
}

impl PrintJson {
    /// Concatenate the raw text of every fragment.
    pub fn plain_text(&self) -> String {
        self.data
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

/// Relayed `Bounce`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Bounced {
    /// Game filter the sender used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub games: Option<Vec<String>>,
    /// Slot filter the sender used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<u32>>,
    /// Tag filter the sender used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Payload.
    #[serde(default)]
    pub data: Value,
}

/// Server-side rejection of a single packet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InvalidPacket {
    /// `cmd` or `arguments`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// The `cmd` of the offending packet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_cmd: Option<String>,
    /// Human-readable explanation.
    #[serde(default)]
    pub text: String,
}

/// Reply to `Get`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Retrieved {
    /// Requested key → current value (`null` when unset).
    pub keys: Map<String, Value>,
    /// Echoed caller fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reply to `Set` or change notification for a watched key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SetReply {
    /// Key that changed.
    pub key: String,
    /// Value after the operations.
    pub value: Value,
    /// Value before the operations.
    #[serde(default)]
    pub original_value: Value,
    /// Slot that issued the `Set`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
    /// Echoed caller fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A server packet the client could not map onto a known shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPacket {
    /// The `cmd` field, if present and a string.
    pub cmd: Option<String>,
    /// The packet as received.
    pub body: Value,
}

// ---------------------------------------------------------------------------
// PacketKind
// ---------------------------------------------------------------------------

/// Routing key for server packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// `RoomInfo`.
    RoomInfo,
    /// `ConnectionRefused`.
    ConnectionRefused,
    /// `Connected`.
    Connected,
    /// `RoomUpdate`.
    RoomUpdate,
    /// `DataPackage`.
    DataPackage,
    /// `ReceivedItems`.
    ReceivedItems,
    /// `LocationInfo`.
    LocationInfo,
    /// `PrintJSON`.
    PrintJson,
    /// `Bounced`.
    Bounced,
    /// `InvalidPacket`.
    InvalidPacket,
    /// `Retrieved`.
    Retrieved,
    /// `SetReply`.
    SetReply,
    /// Anything else.
    Unrecognized,
}

impl PacketKind {
    /// Map a `cmd` string to a kind. Returns `None` for unknown commands.
    pub fn from_cmd(cmd: &str) -> Option<Self> {
        let kind = match cmd {
            "RoomInfo" => Self::RoomInfo,
            "ConnectionRefused" => Self::ConnectionRefused,
            "Connected" => Self::Connected,
            "RoomUpdate" => Self::RoomUpdate,
            "DataPackage" => Self::DataPackage,
            "ReceivedItems" => Self::ReceivedItems,
            "LocationInfo" => Self::LocationInfo,
            "PrintJSON" => Self::PrintJson,
            "Bounced" => Self::Bounced,
            "InvalidPacket" => Self::InvalidPacket,
            "Retrieved" => Self::Retrieved,
            "SetReply" => Self::SetReply,
            _ => return None,
        };
        Some(kind)
    }
}

impl ServerPacket {
    /// Decode a packet of a known `kind` from its JSON object.
    ///
    /// Unknown fields, including `cmd` itself, are ignored; fields that are
    /// present but of the wrong type fail.
    pub fn from_value(kind: PacketKind, value: &Value) -> Result<Self, serde_json::Error> {
        let packet = match kind {
            PacketKind::RoomInfo => Self::RoomInfo(RoomInfo::deserialize(value)?),
            PacketKind::ConnectionRefused => {
                Self::ConnectionRefused(ConnectionRefused::deserialize(value)?)
            }
            PacketKind::Connected => Self::Connected(Connected::deserialize(value)?),
            PacketKind::RoomUpdate => Self::RoomUpdate(RoomUpdate::deserialize(value)?),
            PacketKind::DataPackage => Self::DataPackage(DataPackage::deserialize(value)?),
            PacketKind::ReceivedItems => Self::ReceivedItems(ReceivedItems::deserialize(value)?),
            PacketKind::LocationInfo => Self::LocationInfo(LocationInfo::deserialize(value)?),
            PacketKind::PrintJson => Self::PrintJson(PrintJson::deserialize(value)?),
            PacketKind::Bounced => Self::Bounced(Bounced::deserialize(value)?),
            PacketKind::InvalidPacket => Self::InvalidPacket(InvalidPacket::deserialize(value)?),
            PacketKind::Retrieved => {
                let mut packet = Retrieved::deserialize(value)?;
                packet.extra.remove("cmd");
                Self::Retrieved(packet)
            }
            PacketKind::SetReply => {
                let mut packet = SetReply::deserialize(value)?;
                packet.extra.remove("cmd");
                Self::SetReply(packet)
            }
            PacketKind::Unrecognized => Self::Unrecognized(RawPacket {
                cmd: value.get("cmd").and_then(Value::as_str).map(str::to_owned),
                body: value.clone(),
            }),
        };
        Ok(packet)
    }

    /// Extract the routing kind without consuming the packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            ServerPacket::RoomInfo(_) => PacketKind::RoomInfo,
            ServerPacket::ConnectionRefused(_) => PacketKind::ConnectionRefused,
            ServerPacket::Connected(_) => PacketKind::Connected,
            ServerPacket::RoomUpdate(_) => PacketKind::RoomUpdate,
            ServerPacket::DataPackage(_) => PacketKind::DataPackage,
            ServerPacket::ReceivedItems(_) => PacketKind::ReceivedItems,
            ServerPacket::LocationInfo(_) => PacketKind::LocationInfo,
            ServerPacket::PrintJson(_) => PacketKind::PrintJson,
            ServerPacket::Bounced(_) => PacketKind::Bounced,
            ServerPacket::InvalidPacket(_) => PacketKind::InvalidPacket,
            ServerPacket::Retrieved(_) => PacketKind::Retrieved,
            ServerPacket::SetReply(_) => PacketKind::SetReply,
            ServerPacket::Unrecognized(_) => PacketKind::Unrecognized,
        }
    }
}
