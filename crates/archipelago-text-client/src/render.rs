//! Plain-text rendering of `PrintJSON` messages.

use archipelago_client::packets::PrintJson;
use archipelago_client::types::{JsonMessagePart, JsonPartType};
use archipelago_client::{DataPackageCache, RoomTracker};

/// Resolves ids in message fragments against the current room and data
/// package.
pub struct Renderer<'a> {
    room: &'a RoomTracker,
    data_package: &'a DataPackageCache,
}

impl<'a> Renderer<'a> {
    pub fn new(room: &'a RoomTracker, data_package: &'a DataPackageCache) -> Self {
        Self { room, data_package }
    }

    /// Render every fragment of `message` into one line.
    pub fn message(&self, message: &PrintJson) -> String {
        message.data.iter().map(|part| self.part(part)).collect()
    }

    /// Render one fragment. Unresolvable ids fall back to their raw text.
    pub fn part(&self, part: &JsonMessagePart) -> String {
        let text = part.text.clone().unwrap_or_default();
        match part.part_type {
            Some(JsonPartType::PlayerId) => text
                .parse()
                .ok()
                .and_then(|slot| self.player(slot))
                .unwrap_or(text),
            Some(JsonPartType::ItemId) => match text.parse() {
                Ok(id) => self.data_package.item_name(&self.game_of(part.player), id),
                Err(_) => text,
            },
            Some(JsonPartType::LocationId) => match text.parse() {
                Ok(id) => self
                    .data_package
                    .location_name(&self.game_of(part.player), id),
                Err(_) => text,
            },
            _ => text,
        }
    }

    /// Alias of `slot` on this client's team.
    pub fn player(&self, slot: u32) -> Option<String> {
        let team = self.room.team()?;
        self.room.player_alias(team, slot)
    }

    fn game_of(&self, slot: Option<u32>) -> String {
        slot.and_then(|slot| self.room.player_game(slot))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archipelago_client::packets::{Connected, RoomInfo};
    use archipelago_client::types::DataPackageObject;
    use serde_json::json;

    fn room() -> RoomTracker {
        let room = RoomTracker::default();
        let info: RoomInfo = serde_json::from_value(json!({
            "version": {"major": 0, "minor": 5, "build": 1, "class": "Version"}
        }))
        .unwrap();
        room.set_room_info(&info);
        let connected: Connected = serde_json::from_value(json!({
            "team": 0,
            "slot": 1,
            "players": [
                {"team": 0, "slot": 1, "alias": "Alice", "name": "Alice"},
                {"team": 0, "slot": 2, "alias": "Bobby", "name": "Bob"}
            ],
            "slot_info": {
                "1": {"name": "Alice", "game": "Clique", "type": 1},
                "2": {"name": "Bob", "game": "Other", "type": 1}
            }
        }))
        .unwrap();
        room.set_connected(&connected);
        room
    }

    fn data_package() -> DataPackageCache {
        let cache = DataPackageCache::default();
        let package: DataPackageObject = serde_json::from_value(json!({"games": {
            "Clique": {
                "item_name_to_id": {"Feeling of Satisfaction": 69696969},
                "location_name_to_id": {"The Big Red Button": 69696969},
                "checksum": "abc"
            }
        }}))
        .unwrap();
        cache.ingest(&package);
        cache
    }

    fn part(value: serde_json::Value) -> JsonMessagePart {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_item_send_message() {
        let (room, cache) = (room(), data_package());
        let renderer = Renderer::new(&room, &cache);
        let message: PrintJson = serde_json::from_value(json!({
            "type": "ItemSend",
            "data": [
                {"type": "player_id", "text": "2"},
                {"text": " found their "},
                {"type": "item_id", "text": "69696969", "player": 1, "flags": 1},
                {"text": " ("},
                {"type": "location_id", "text": "69696969", "player": 1},
                {"text": ")"}
            ]
        }))
        .unwrap();

        assert_eq!(
            renderer.message(&message),
            "Bobby found their Feeling of Satisfaction (The Big Red Button)"
        );
    }

    #[test]
    fn test_unknown_ids_fall_back() {
        let (room, cache) = (room(), data_package());
        let renderer = Renderer::new(&room, &cache);

        assert_eq!(renderer.part(&part(json!({"type": "player_id", "text": "9"}))), "9");
        assert_eq!(
            renderer.part(&part(json!({"type": "item_id", "text": "5", "player": 2}))),
            "Unknown Other Item: 5"
        );
        assert_eq!(
            renderer.part(&part(json!({"type": "location_id", "text": "abc", "player": 1}))),
            "abc"
        );
    }

    #[test]
    fn test_plain_and_colored_text() {
        let (room, cache) = (room(), data_package());
        let renderer = Renderer::new(&room, &cache);
        assert_eq!(renderer.part(&part(json!({"text": "hi"}))), "hi");
        assert_eq!(
            renderer.part(&part(json!({"type": "color", "color": "red", "text": "warn"}))),
            "warn"
        );
        assert_eq!(renderer.part(&part(json!({"type": "sparkles"}))), "");
    }

    #[test]
    fn test_player_lookup_needs_connected_slot() {
        let room = RoomTracker::default();
        let cache = DataPackageCache::default();
        assert_eq!(Renderer::new(&room, &cache).player(1), None);
    }
}
