//! Room and slot information gathered from the handshake.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::events::{BusEvent, EventBus, Subscription, Topic};
use crate::packets::{Connected, PacketKind, RoomInfo, RoomUpdate, ServerPacket};
use crate::types::{NetworkPlayer, NetworkSlot, Permissions};

/// Identity of the authenticated slot.
#[derive(Debug, Clone, PartialEq)]
struct SlotInfo {
    team: u32,
    slot: u32,
    players: Vec<NetworkPlayer>,
    slot_info: HashMap<u32, NetworkSlot>,
    slot_data: Value,
    hint_points: i64,
}

#[derive(Debug, Default)]
struct RoomData {
    room_info: Option<RoomInfo>,
    slot: Option<SlotInfo>,
}

/// Last known room state, merged from `RoomInfo`, `Connected` and
/// `RoomUpdate`.
#[derive(Debug, Default)]
pub struct RoomTracker {
    data: RwLock<RoomData>,
}

impl RoomTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `RoomInfo`, with `RoomUpdate` changes applied.
    pub fn room_info(&self) -> Option<RoomInfo> {
        self.data.read().room_info.clone()
    }

    /// Whether `Connected` has been received on the current link.
    pub fn is_authenticated(&self) -> bool {
        self.data.read().slot.is_some()
    }

    /// Team of the connected slot.
    pub fn team(&self) -> Option<u32> {
        self.data.read().slot.as_ref().map(|s| s.team)
    }

    /// Connected slot number.
    pub fn slot(&self) -> Option<u32> {
        self.data.read().slot.as_ref().map(|s| s.slot)
    }

    /// Every player in the multiworld.
    pub fn players(&self) -> Vec<NetworkPlayer> {
        self.data
            .read()
            .slot
            .as_ref()
            .map(|s| s.players.clone())
            .unwrap_or_default()
    }

    /// Static description of `slot`.
    pub fn slot_info(&self, slot: u32) -> Option<NetworkSlot> {
        self.data
            .read()
            .slot
            .as_ref()
            .and_then(|s| s.slot_info.get(&slot).cloned())
    }

    /// Game-specific data the server sent for this slot.
    pub fn slot_data(&self) -> Value {
        self.data
            .read()
            .slot
            .as_ref()
            .map(|s| s.slot_data.clone())
            .unwrap_or(Value::Null)
    }

    /// Hint points available to this slot.
    pub fn hint_points(&self) -> Option<i64> {
        self.data.read().slot.as_ref().map(|s| s.hint_points)
    }

    /// Current command permissions.
    pub fn permissions(&self) -> Permissions {
        self.data
            .read()
            .room_info
            .as_ref()
            .map(|r| r.permissions)
            .unwrap_or_default()
    }

    /// Display alias of `slot` in `team`.
    pub fn player_alias(&self, team: u32, slot: u32) -> Option<String> {
        self.data.read().slot.as_ref().and_then(|s| {
            s.players
                .iter()
                .find(|p| p.team == team && p.slot == slot)
                .map(|p| p.alias.clone())
        })
    }

    /// Game played in `slot`.
    pub fn player_game(&self, slot: u32) -> Option<String> {
        self.slot_info(slot).map(|s| s.game)
    }

    /// Game played by the connected slot.
    pub fn own_game(&self) -> Option<String> {
        self.slot().and_then(|slot| self.player_game(slot))
    }

    /// Store a fresh `RoomInfo`; any slot data from an older link is dropped.
    pub fn set_room_info(&self, room: &RoomInfo) {
        let mut data = self.data.write();
        data.room_info = Some(room.clone());
        data.slot = None;
    }

    /// Store the authenticated slot.
    pub fn set_connected(&self, connected: &Connected) {
        self.data.write().slot = Some(SlotInfo {
            team: connected.team,
            slot: connected.slot,
            players: connected.players.clone(),
            slot_info: connected.slot_info.clone(),
            slot_data: connected.slot_data.clone(),
            hint_points: connected.hint_points,
        });
    }

    /// Merge the fields present in `update`.
    pub fn apply_update(&self, update: &RoomUpdate) {
        let mut data = self.data.write();
        if let Some(room) = data.room_info.as_mut() {
            if let Some(permissions) = update.permissions {
                room.permissions = permissions;
            }
            if let Some(hint_cost) = update.hint_cost {
                room.hint_cost = hint_cost;
            }
            if let Some(points) = update.location_check_points {
                room.location_check_points = points;
            }
            if let Some(tags) = &update.tags {
                room.tags.clone_from(tags);
            }
        }
        if let Some(slot) = data.slot.as_mut() {
            if let Some(points) = update.hint_points {
                slot.hint_points = points;
            }
            if let Some(players) = &update.players {
                slot.players.clone_from(players);
            }
        }
    }

    /// Forget everything.
    pub fn reset(&self) {
        *self.data.write() = RoomData::default();
    }

    /// Feed the tracker from the bus.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        let tracker = Arc::clone(self);
        let packets = bus.subscribe_all(
            &[
                Topic::Packet(PacketKind::RoomInfo),
                Topic::Packet(PacketKind::Connected),
                Topic::Packet(PacketKind::RoomUpdate),
            ],
            move |event: &BusEvent| match event.packet() {
                Some(ServerPacket::RoomInfo(room)) => tracker.set_room_info(room),
                Some(ServerPacket::Connected(connected)) => tracker.set_connected(connected),
                Some(ServerPacket::RoomUpdate(update)) => tracker.apply_update(update),
                _ => {}
            },
        );
        let tracker = Arc::clone(self);
        let lost = bus.subscribe(Topic::ConnectionLost, move |_: &BusEvent| tracker.reset());
        vec![packets, lost]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DisconnectReason;
    use crate::types::{Permission, SlotType};

    fn connected() -> Connected {
        Connected {
            team: 0,
            slot: 2,
            players: vec![
                NetworkPlayer {
                    team: 0,
                    slot: 1,
                    alias: "Alice".into(),
                    name: "Alice".into(),
                },
                NetworkPlayer {
                    team: 0,
                    slot: 2,
                    alias: "Bob".into(),
                    name: "Bob".into(),
                },
            ],
            slot_info: HashMap::from([(
                2,
                NetworkSlot {
                    name: "Bob".into(),
                    game: "Clique".into(),
                    slot_type: SlotType::Player,
                    group_members: vec![],
                },
            )]),
            slot_data: serde_json::json!({"color": "red"}),
            hint_points: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_connected_and_update_merge() {
        let bus = EventBus::new();
        let room = Arc::new(RoomTracker::new());
        let _subs = room.attach(&bus);

        bus.publish(BusEvent::Packet(ServerPacket::RoomInfo(RoomInfo {
            hint_cost: 10,
            ..Default::default()
        })));
        assert!(!room.is_authenticated());

        bus.publish(BusEvent::Packet(ServerPacket::Connected(connected())));
        assert!(room.is_authenticated());
        assert_eq!(room.player_alias(0, 1).as_deref(), Some("Alice"));
        assert_eq!(room.own_game().as_deref(), Some("Clique"));
        assert_eq!(room.slot_data()["color"], "red");

        bus.publish(BusEvent::Packet(ServerPacket::RoomUpdate(RoomUpdate {
            hint_points: Some(9),
            hint_cost: Some(5),
            permissions: Some(Permissions {
                release: Permission::ENABLED,
                ..Default::default()
            }),
            players: Some(vec![NetworkPlayer {
                team: 0,
                slot: 1,
                alias: "Al".into(),
                name: "Alice".into(),
            }]),
            ..Default::default()
        })));
        assert_eq!(room.hint_points(), Some(9));
        assert_eq!(room.room_info().unwrap().hint_cost, 5);
        assert!(room.permissions().release.allows(false));
        assert_eq!(room.player_alias(0, 1).as_deref(), Some("Al"));

        bus.publish(BusEvent::ConnectionLost(DisconnectReason::ClosedByServer));
        assert!(room.room_info().is_none());
        assert_eq!(room.slot(), None);
    }

    #[test]
    fn test_unknown_player_lookups() {
        let room = RoomTracker::new();
        room.set_connected(&connected());
        assert_eq!(room.player_alias(1, 1), None);
        assert_eq!(room.player_game(9), None);
    }
}
