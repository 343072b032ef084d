//! Per-game item and location name tables.
//!
//! The cache is filled from `DataPackage` packets one game at a time. Each
//! game entry is replaced wholesale, so lookups for a game see either the old
//! or the new tables, never a mix, and other games are untouched.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{BusEvent, EventBus, Subscription, Topic};
use crate::packets::{PacketKind, ServerPacket};
use crate::types::{DataPackageObject, GameData};

/// Errors from name → id lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// No data package is cached for the game.
    #[error("no data package cached for game `{0}`")]
    UnknownGame(String),
    /// The game is cached but has no entry with that name.
    #[error("game `{game}` has no entry named `{name}`")]
    UnknownName {
        /// Game that was searched.
        game: String,
        /// Name that was not found.
        name: String,
    },
}

/// What happens to cached data packages when the connection is lost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataPackageRetention {
    /// Keep them; the next connect only refreshes games whose checksum moved.
    #[default]
    Retain,
    /// Drop them together with the rest of the session state.
    Discard,
}

/// One game's tables with both lookup directions.
#[derive(Debug, Clone, Default)]
struct GamePackage {
    data: GameData,
    item_names: HashMap<i64, String>,
    location_names: HashMap<i64, String>,
}

impl GamePackage {
    fn build(data: GameData) -> Self {
        let item_names = invert(&data.item_name_to_id);
        let location_names = invert(&data.location_name_to_id);
        Self {
            data,
            item_names,
            location_names,
        }
    }
}

fn invert(forward: &HashMap<String, i64>) -> HashMap<i64, String> {
    forward
        .iter()
        .map(|(name, &id)| (id, name.clone()))
        .collect()
}

/// Shared data package store.
#[derive(Debug, Default)]
pub struct DataPackageCache {
    games: RwLock<HashMap<String, GamePackage>>,
}

impl DataPackageCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store every game in `package`, replacing existing entries.
    pub fn ingest(&self, package: &DataPackageObject) {
        for (game, data) in &package.games {
            self.ingest_game(game, data.clone());
        }
    }

    /// Store one game's tables, replacing any existing entry.
    pub fn ingest_game(&self, game: &str, data: GameData) {
        let entry = GamePackage::build(data);
        tracing::debug!(
            game,
            items = entry.item_names.len(),
            locations = entry.location_names.len(),
            checksum = %entry.data.checksum,
            "ingested data package"
        );
        self.games.write().insert(game.to_string(), entry);
    }

    /// Name of item `id` in `game`, or an `Unknown <game> Item: <id>`
    /// placeholder.
    pub fn item_name(&self, game: &str, id: i64) -> String {
        self.games
            .read()
            .get(game)
            .and_then(|g| g.item_names.get(&id).cloned())
            .unwrap_or_else(|| format!("Unknown {game} Item: {id}"))
    }

    /// Name of location `id` in `game`, or an
    /// `Unknown <game> Location: <id>` placeholder.
    pub fn location_name(&self, game: &str, id: i64) -> String {
        self.games
            .read()
            .get(game)
            .and_then(|g| g.location_names.get(&id).cloned())
            .unwrap_or_else(|| format!("Unknown {game} Location: {id}"))
    }

    /// Id of the item called `name` in `game`.
    pub fn item_id(&self, game: &str, name: &str) -> Result<i64, LookupError> {
        self.lookup_id(game, name, |g| &g.data.item_name_to_id)
    }

    /// Id of the location called `name` in `game`.
    pub fn location_id(&self, game: &str, name: &str) -> Result<i64, LookupError> {
        self.lookup_id(game, name, |g| &g.data.location_name_to_id)
    }

    fn lookup_id(
        &self,
        game: &str,
        name: &str,
        table: impl Fn(&GamePackage) -> &HashMap<String, i64>,
    ) -> Result<i64, LookupError> {
        let games = self.games.read();
        let entry = games
            .get(game)
            .ok_or_else(|| LookupError::UnknownGame(game.to_string()))?;
        table(entry)
            .get(name)
            .copied()
            .ok_or_else(|| LookupError::UnknownName {
                game: game.to_string(),
                name: name.to_string(),
            })
    }

    /// Members of item group `group`; empty when the game or group is absent.
    pub fn item_group(&self, game: &str, group: &str) -> Vec<String> {
        self.games
            .read()
            .get(game)
            .and_then(|g| g.data.item_name_groups.get(group).cloned())
            .unwrap_or_default()
    }

    /// Members of location group `group`; empty when the game or group is
    /// absent.
    pub fn location_group(&self, game: &str, group: &str) -> Vec<String> {
        self.games
            .read()
            .get(game)
            .and_then(|g| g.data.location_name_groups.get(group).cloned())
            .unwrap_or_default()
    }

    /// Cached checksum for `game`.
    pub fn checksum(&self, game: &str) -> Option<String> {
        self.games.read().get(game).map(|g| g.data.checksum.clone())
    }

    /// Whether anything is cached for `game`.
    pub fn contains_game(&self, game: &str) -> bool {
        self.games.read().contains_key(game)
    }

    /// Names of every cached game, sorted.
    pub fn games(&self) -> Vec<String> {
        let mut games: Vec<String> = self.games.read().keys().cloned().collect();
        games.sort();
        games
    }

    /// Games from `games` and `checksums` that should be requested again.
    ///
    /// A game needs a refresh when nothing is cached for it, or when the
    /// server advertises a checksum that differs from the cached one. This
    /// is advisory; [`ingest`](Self::ingest) always applies what it is given.
    pub fn games_needing_refresh(
        &self,
        games: &[String],
        checksums: &HashMap<String, String>,
    ) -> Vec<String> {
        let cached = self.games.read();
        let candidates: BTreeSet<&String> = games.iter().chain(checksums.keys()).collect();
        candidates
            .into_iter()
            .filter(|game| match (cached.get(game.as_str()), checksums.get(game.as_str())) {
                (None, _) => true,
                (Some(entry), Some(remote)) => entry.data.checksum != *remote,
                (Some(_), None) => false,
            })
            .cloned()
            .collect()
    }

    /// Copy of the whole cache, ready to serialize.
    pub fn export(&self) -> DataPackageObject {
        DataPackageObject {
            games: self
                .games
                .read()
                .iter()
                .map(|(game, entry)| (game.clone(), entry.data.clone()))
                .collect(),
        }
    }

    /// Load a previously exported package. Same as [`ingest`](Self::ingest).
    pub fn import(&self, package: &DataPackageObject) {
        self.ingest(package);
    }

    /// Drop every cached game.
    pub fn clear(&self) {
        self.games.write().clear();
    }

    /// Keep the cache fed from `DataPackage` packets and apply `retention`
    /// on connection loss.
    pub fn attach(
        self: &Arc<Self>,
        bus: &EventBus,
        retention: DataPackageRetention,
    ) -> Vec<Subscription> {
        let cache = Arc::clone(self);
        let mut subs = vec![bus.subscribe(
            Topic::Packet(PacketKind::DataPackage),
            move |event: &BusEvent| {
                if let Some(ServerPacket::DataPackage(packet)) = event.packet() {
                    cache.ingest(&packet.data);
                }
            },
        )];
        if retention == DataPackageRetention::Discard {
            let cache = Arc::clone(self);
            subs.push(bus.subscribe(Topic::ConnectionLost, move |_: &BusEvent| {
                cache.clear();
            }));
        }
        subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DisconnectReason;
    use crate::packets::DataPackage;

    fn game(items: &[(&str, i64)], locations: &[(&str, i64)], checksum: &str) -> GameData {
        GameData {
            item_name_to_id: items.iter().map(|(n, i)| (n.to_string(), *i)).collect(),
            location_name_to_id: locations.iter().map(|(n, i)| (n.to_string(), *i)).collect(),
            item_name_groups: HashMap::from([(
                "Everything".to_string(),
                items.iter().map(|(n, _)| n.to_string()).collect(),
            )]),
            location_name_groups: HashMap::new(),
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn test_lookup_round_trip_and_placeholders() {
        let cache = DataPackageCache::new();
        cache.ingest_game(
            "Clique",
            game(&[("Button", 69696969)], &[("The Button", 69696968)], "c1"),
        );

        assert_eq!(cache.item_name("Clique", 69696969), "Button");
        assert_eq!(cache.location_name("Clique", 69696968), "The Button");
        assert_eq!(cache.item_name("Clique", 1), "Unknown Clique Item: 1");
        assert_eq!(cache.location_name("Other", 7), "Unknown Other Location: 7");
        assert_eq!(cache.item_id("Clique", "Button"), Ok(69696969));
        assert_eq!(cache.location_id("Clique", "The Button"), Ok(69696968));
    }

    #[test]
    fn test_lookup_errors() {
        let cache = DataPackageCache::new();
        cache.ingest_game("Clique", game(&[("Button", 1)], &[], "c1"));

        assert_eq!(
            cache.item_id("Nope", "Button"),
            Err(LookupError::UnknownGame("Nope".into()))
        );
        assert_eq!(
            cache.location_id("Clique", "Button"),
            Err(LookupError::UnknownName {
                game: "Clique".into(),
                name: "Button".into()
            })
        );
    }

    #[test]
    fn test_reingest_replaces_only_that_game() {
        let cache = DataPackageCache::new();
        cache.ingest_game("A", game(&[("Sword", 1), ("Shield", 2)], &[], "a1"));
        cache.ingest_game("B", game(&[("Bow", 1)], &[], "b1"));

        cache.ingest_game("A", game(&[("Hammer", 3)], &[], "a2"));

        assert_eq!(cache.item_name("A", 3), "Hammer");
        assert_eq!(cache.item_name("A", 1), "Unknown A Item: 1");
        assert_eq!(cache.item_name("B", 1), "Bow");
        assert_eq!(cache.checksum("A").as_deref(), Some("a2"));
    }

    #[test]
    fn test_groups_default_to_empty() {
        let cache = DataPackageCache::new();
        cache.ingest_game("A", game(&[("Sword", 1)], &[], "a1"));
        assert_eq!(cache.item_group("A", "Everything"), vec!["Sword".to_string()]);
        assert!(cache.item_group("A", "Missing").is_empty());
        assert!(cache.location_group("Z", "Any").is_empty());
    }

    #[test]
    fn test_games_needing_refresh() {
        let cache = DataPackageCache::new();
        cache.ingest_game("Same", game(&[], &[], "s1"));
        cache.ingest_game("Moved", game(&[], &[], "m1"));
        cache.ingest_game("Unversioned", game(&[], &[], "u1"));

        let games = vec![
            "Same".to_string(),
            "Moved".to_string(),
            "Unversioned".to_string(),
            "New".to_string(),
        ];
        let checksums = HashMap::from([
            ("Same".to_string(), "s1".to_string()),
            ("Moved".to_string(), "m2".to_string()),
            ("Archipelago".to_string(), "ap".to_string()),
        ]);

        assert_eq!(
            cache.games_needing_refresh(&games, &checksums),
            vec!["Archipelago".to_string(), "Moved".to_string(), "New".to_string()]
        );
    }

    #[test]
    fn test_export_import() {
        let cache = DataPackageCache::new();
        cache.ingest_game("A", game(&[("Sword", 1)], &[("Cave", 10)], "a1"));
        let exported = serde_json::to_value(cache.export()).unwrap();

        let restored = DataPackageCache::new();
        restored.import(&serde_json::from_value(exported).unwrap());
        assert_eq!(restored.item_name("A", 1), "Sword");
        assert_eq!(restored.location_id("A", "Cave"), Ok(10));
        assert_eq!(restored.games(), vec!["A".to_string()]);
    }

    #[test]
    fn test_attach_ingests_and_applies_retention() {
        let bus = EventBus::new();
        let retained = Arc::new(DataPackageCache::new());
        let discarded = Arc::new(DataPackageCache::new());
        let _a = retained.attach(&bus, DataPackageRetention::Retain);
        let _b = discarded.attach(&bus, DataPackageRetention::Discard);

        let mut package = DataPackageObject::default();
        package.games.insert("A".into(), game(&[("Sword", 1)], &[], "a1"));
        bus.publish(BusEvent::Packet(ServerPacket::DataPackage(DataPackage {
            data: package,
        })));
        assert!(retained.contains_game("A"));
        assert!(discarded.contains_game("A"));

        bus.publish(BusEvent::ConnectionLost(DisconnectReason::ClosedByServer));
        assert!(retained.contains_game("A"));
        assert!(!discarded.contains_game("A"));
    }
}
