//! Shared protocol data types carried inside packets.
//!
//! Field names follow the server's JSON verbatim. Integer-coded enums
//! (client status, hint mode, slot type) travel as plain numbers on the wire
//! and convert through `u8`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Protocol version this client announces in `Connect`.
pub const CLIENT_VERSION: NetworkVersion = NetworkVersion::new(0, 5, 1);

// ---------------------------------------------------------------------------
// NetworkVersion
// ---------------------------------------------------------------------------

/// Protocol compatibility triple. Serialized with `"class": "Version"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "TaggedVersion", from = "TaggedVersion")]
pub struct NetworkVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Build number.
    pub build: u32,
}

impl NetworkVersion {
    /// Construct a version triple.
    pub const fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }
}

impl std::fmt::Display for NetworkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[derive(Serialize, Deserialize)]
struct TaggedVersion {
    major: u32,
    minor: u32,
    build: u32,
    #[serde(default = "version_class")]
    class: String,
}

fn version_class() -> String {
    "Version".to_string()
}

impl From<NetworkVersion> for TaggedVersion {
    fn from(v: NetworkVersion) -> Self {
        Self {
            major: v.major,
            minor: v.minor,
            build: v.build,
            class: version_class(),
        }
    }
}

impl From<TaggedVersion> for NetworkVersion {
    fn from(v: TaggedVersion) -> Self {
        Self::new(v.major, v.minor, v.build)
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Classification bitfield attached to every [`NetworkItem`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemFlags(pub u8);

impl ItemFlags {
    /// Plain filler item.
    pub const FILLER: Self = Self(0);
    /// Item that can unlock logical progression.
    pub const PROGRESSION: Self = Self(0b001);
    /// Item that is useful but not required.
    pub const USEFUL: Self = Self(0b010);
    /// Item that is detrimental to the receiver.
    pub const TRAP: Self = Self(0b100);

    /// Whether every bit in `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One item placed at one location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkItem {
    /// Item id within the owning game's data package.
    pub item: i64,
    /// Location id the item was found at.
    pub location: i64,
    /// Slot of the player on the other side of the transfer (finder when
    /// receiving, receiver when scouting).
    pub player: u32,
    /// Classification flags.
    #[serde(default)]
    pub flags: ItemFlags,
}

/// Which item sources the server should forward to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemsHandling(pub u8);

impl ItemsHandling {
    /// No items are sent; the client only reports checks.
    pub const NONE: Self = Self(0b000);
    /// Items from other worlds.
    pub const OTHER_WORLDS: Self = Self(0b001);
    /// Items found in the client's own world.
    pub const OWN_WORLD: Self = Self(0b010);
    /// Starting inventory.
    pub const STARTING_INVENTORY: Self = Self(0b100);
    /// Everything: remote, local and starting items.
    pub const ALL: Self = Self(0b111);

    /// Combine two sets of flags.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl Default for ItemsHandling {
    fn default() -> Self {
        Self::ALL
    }
}

// ---------------------------------------------------------------------------
// Players and slots
// ---------------------------------------------------------------------------

/// A player seat within the multiworld.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlayer {
    /// Team number.
    pub team: u32,
    /// Slot number, unique within a team.
    pub slot: u32,
    /// Current display alias.
    pub alias: String,
    /// Slot name chosen at generation time.
    pub name: String,
}

/// Kind of seat a slot represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SlotType {
    /// Observer with no world of its own.
    Spectator,
    /// Regular player.
    #[default]
    Player,
    /// Item-link group.
    Group,
}

impl From<SlotType> for u8 {
    fn from(value: SlotType) -> Self {
        match value {
            SlotType::Spectator => 0,
            SlotType::Player => 1,
            SlotType::Group => 2,
        }
    }
}

impl TryFrom<u8> for SlotType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Spectator),
            1 => Ok(Self::Player),
            2 => Ok(Self::Group),
            other => Err(format!("unknown slot type {other}")),
        }
    }
}

/// Static information about a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSlot {
    /// Slot name.
    pub name: String,
    /// Game played in this slot.
    pub game: String,
    /// Seat kind.
    #[serde(rename = "type", default)]
    pub slot_type: SlotType,
    /// Member slots when this slot is a group.
    #[serde(default)]
    pub group_members: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Status and hints
// ---------------------------------------------------------------------------

/// Progress a client reports through `StatusUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ClientStatus {
    /// Nothing reported yet.
    Unknown,
    /// Connected but not in game.
    Connected,
    /// Ready to start.
    Ready,
    /// Currently playing.
    Playing,
    /// Goal completed.
    Goal,
}

impl From<ClientStatus> for u8 {
    fn from(value: ClientStatus) -> Self {
        match value {
            ClientStatus::Unknown => 0,
            ClientStatus::Connected => 5,
            ClientStatus::Ready => 10,
            ClientStatus::Playing => 20,
            ClientStatus::Goal => 30,
        }
    }
}

impl TryFrom<u8> for ClientStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            5 => Ok(Self::Connected),
            10 => Ok(Self::Ready),
            20 => Ok(Self::Playing),
            30 => Ok(Self::Goal),
            other => Err(format!("unknown client status {other}")),
        }
    }
}

/// `create_as_hint` value of `LocationScouts`.
///
/// Always the integer form: 0 = no hint, 1 = hint everything scouted,
/// 2 = hint only locations not hinted before.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum HintMode {
    /// Scout silently.
    #[default]
    NoHint,
    /// Create hints for every scouted location.
    Hint,
    /// Create hints and announce only those that are new.
    HintNewOnly,
}

impl From<HintMode> for u8 {
    fn from(value: HintMode) -> Self {
        match value {
            HintMode::NoHint => 0,
            HintMode::Hint => 1,
            HintMode::HintNewOnly => 2,
        }
    }
}

impl TryFrom<u8> for HintMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NoHint),
            1 => Ok(Self::Hint),
            2 => Ok(Self::HintNewOnly),
            other => Err(format!("unknown hint mode {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Room permissions
// ---------------------------------------------------------------------------

/// Permission bitfield for release/collect/remaining commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(pub u8);

impl Permission {
    /// Command is unavailable.
    pub const DISABLED: Self = Self(0b000);
    /// Command may be issued at any time.
    pub const ENABLED: Self = Self(0b001);
    /// Command may be issued after goal completion.
    pub const GOAL: Self = Self(0b010);
    /// Command runs automatically on goal completion.
    pub const AUTO: Self = Self(0b110);
    /// Runs automatically on goal and may also be issued manually.
    pub const AUTO_ENABLED: Self = Self(0b111);

    /// Whether the command may be issued manually right now.
    pub fn allows(self, goal_completed: bool) -> bool {
        self.0 & Self::ENABLED.0 != 0 || (goal_completed && self.0 & Self::GOAL.0 != 0)
    }
}

/// Permissions advertised in `RoomInfo`/`RoomUpdate`.
///
/// Older servers call `release` `forfeit`; both names are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Releasing remaining items to other players.
    #[serde(alias = "forfeit", default)]
    pub release: Permission,
    /// Collecting own items from other worlds.
    #[serde(default)]
    pub collect: Permission,
    /// Listing remaining items.
    #[serde(default)]
    pub remaining: Permission,
}

// ---------------------------------------------------------------------------
// Data package
// ---------------------------------------------------------------------------

/// Per-game metadata as sent in `DataPackage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameData {
    /// Item name → id.
    pub item_name_to_id: HashMap<String, i64>,
    /// Location name → id.
    pub location_name_to_id: HashMap<String, i64>,
    /// Item group name → member item names.
    #[serde(default)]
    pub item_name_groups: HashMap<String, Vec<String>>,
    /// Location group name → member location names.
    #[serde(default)]
    pub location_name_groups: HashMap<String, Vec<String>>,
    /// Content checksum.
    #[serde(default)]
    pub checksum: String,
}

/// The `data` object of a `DataPackage` packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPackageObject {
    /// Game name → game metadata.
    pub games: HashMap<String, GameData>,
}

// ---------------------------------------------------------------------------
// Text messages
// ---------------------------------------------------------------------------

/// Semantic type of a [`JsonMessagePart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonPartType {
    /// Plain text.
    Text,
    /// Player slot number in `text`.
    PlayerId,
    /// Player name in `text`.
    PlayerName,
    /// Item id in `text`, resolved in the game of `player`.
    ItemId,
    /// Item name in `text`.
    ItemName,
    /// Location id in `text`, resolved in the game of `player`.
    LocationId,
    /// Location name in `text`.
    LocationName,
    /// Entrance name in `text`.
    EntranceName,
    /// Hint status value.
    HintStatus,
    /// Colored text; see `color`.
    Color,
    /// Any type this client does not know.
    #[serde(other)]
    Other,
}

/// One fragment of a `PrintJSON` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonMessagePart {
    /// Fragment type; plain text when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub part_type: Option<JsonPartType>,
    /// Fragment payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Color name for `color` fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Item flags for item fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<ItemFlags>,
    /// Slot whose game resolves item/location ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<u32>,
}
