//! Checked and missing locations of the connected slot.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::connection::Outbox;
use crate::error::SessionError;
use crate::events::{BusEvent, EventBus, Subscription, Topic};
use crate::packets::{ClientPacket, LocationChecks, LocationScouts, PacketKind, ServerPacket};
use crate::types::HintMode;

/// Disjoint checked/missing sets. Ids only ever move from missing to checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationState {
    checked: HashSet<i64>,
    missing: HashSet<i64>,
}

impl LocationState {
    /// Build the state a `Connected` packet describes. Ids listed as both
    /// checked and missing count as checked.
    pub fn seed(
        checked: impl IntoIterator<Item = i64>,
        missing: impl IntoIterator<Item = i64>,
    ) -> Self {
        let checked: HashSet<i64> = checked.into_iter().collect();
        let missing = missing
            .into_iter()
            .filter(|id| !checked.contains(id))
            .collect();
        Self { checked, missing }
    }

    /// Move `ids` from missing to checked and return the ones that moved.
    ///
    /// Ids outside the seeded set are ignored, so `checked ∪ missing` never
    /// changes after seeding.
    pub fn mark_checked(&mut self, ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
        let mut newly = Vec::new();
        for id in ids {
            if self.missing.remove(&id) {
                self.checked.insert(id);
                newly.push(id);
            }
        }
        newly
    }

    /// Whether `id` belongs to the seeded set.
    pub fn is_known(&self, id: i64) -> bool {
        self.checked.contains(&id) || self.missing.contains(&id)
    }

    /// Checked ids.
    pub fn checked(&self) -> &HashSet<i64> {
        &self.checked
    }

    /// Missing ids.
    pub fn missing(&self) -> &HashSet<i64> {
        &self.missing
    }

    /// Whether `id` has been checked.
    pub fn is_checked(&self, id: i64) -> bool {
        self.checked.contains(&id)
    }

    /// Whether `id` is still missing.
    pub fn is_missing(&self, id: i64) -> bool {
        self.missing.contains(&id)
    }
}

fn sorted(ids: &HashSet<i64>) -> Vec<i64> {
    let mut out: Vec<i64> = ids.iter().copied().collect();
    out.sort_unstable();
    out
}

/// Tracks location state from `Connected`/`RoomUpdate` and issues
/// `LocationChecks`/`LocationScouts`.
///
/// Requests never touch local state; only server packets do.
#[derive(Debug)]
pub struct LocationsTracker {
    state: RwLock<LocationState>,
    outbox: Outbox,
}

impl LocationsTracker {
    /// Create an empty tracker sending through `outbox`.
    pub fn new(outbox: Outbox) -> Self {
        Self {
            state: RwLock::new(LocationState::default()),
            outbox,
        }
    }

    /// Report `ids` as checked.
    pub fn check(&self, ids: &[i64]) -> Result<(), SessionError> {
        if ids.is_empty() {
            return self.outbox.send(&[]);
        }
        self.outbox
            .send(&[ClientPacket::LocationChecks(LocationChecks {
                locations: ids.to_vec(),
            })])
    }

    /// Ask what items sit at `ids`. The answer arrives as `LocationInfo`.
    pub fn scout(&self, ids: &[i64], hint_mode: HintMode) -> Result<(), SessionError> {
        self.outbox
            .send(&[ClientPacket::LocationScouts(LocationScouts {
                locations: ids.to_vec(),
                create_as_hint: hint_mode,
            })])
    }

    /// Check every missing location in one packet. Returns the ids sent.
    pub fn release_all_missing(&self) -> Result<Vec<i64>, SessionError> {
        let ids = self.missing_locations();
        self.check(&ids)?;
        tracing::info!(count = ids.len(), "checked all missing locations");
        Ok(ids)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> LocationState {
        self.state.read().clone()
    }

    /// Checked ids, sorted.
    pub fn checked_locations(&self) -> Vec<i64> {
        sorted(self.state.read().checked())
    }

    /// Missing ids, sorted.
    pub fn missing_locations(&self) -> Vec<i64> {
        sorted(self.state.read().missing())
    }

    /// Whether `id` has been checked.
    pub fn is_checked(&self, id: i64) -> bool {
        self.state.read().is_checked(id)
    }

    /// Replace the state.
    pub fn seed(&self, checked: &[i64], missing: &[i64]) {
        let state = LocationState::seed(checked.iter().copied(), missing.iter().copied());
        tracing::debug!(
            checked = state.checked.len(),
            missing = state.missing.len(),
            "seeded locations"
        );
        *self.state.write() = state;
    }

    /// Apply server-confirmed checks.
    pub fn apply_checked(&self, ids: &[i64]) -> Vec<i64> {
        let mut state = self.state.write();
        let unknown: Vec<i64> = ids.iter().copied().filter(|id| !state.is_known(*id)).collect();
        if !unknown.is_empty() {
            tracing::warn!(?unknown, "ignoring checked locations outside this slot");
        }
        let newly = state.mark_checked(ids.iter().copied());
        drop(state);
        if !newly.is_empty() {
            tracing::debug!(count = newly.len(), "locations checked");
        }
        newly
    }

    /// Forget everything.
    pub fn reset(&self) {
        *self.state.write() = LocationState::default();
    }

    /// Feed the tracker from the bus.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        let tracker = Arc::clone(self);
        let packets = bus.subscribe_all(
            &[
                Topic::Packet(PacketKind::Connected),
                Topic::Packet(PacketKind::RoomUpdate),
            ],
            move |event: &BusEvent| match event.packet() {
                Some(ServerPacket::Connected(connected)) => {
                    tracker.seed(&connected.checked_locations, &connected.missing_locations);
                }
                Some(ServerPacket::RoomUpdate(update)) => {
                    if let Some(ids) = &update.checked_locations {
                        tracker.apply_checked(ids);
                    }
                }
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
    use crate::connection::ConnectionStateWatch;
    use crate::packets::{Connected, RoomUpdate};

    #[test]
    fn test_seed_removes_overlap() {
        let state = LocationState::seed([1, 2], [2, 3]);
        assert!(state.is_checked(2));
        assert!(!state.is_missing(2));
        assert!(state.is_missing(3));
    }

    #[test]
    fn test_updates_keep_sets_disjoint_and_union_stable() {
        let mut state = LocationState::seed([1, 2], 3..=20);
        let universe: HashSet<i64> = (1..=20).collect();

        for step in 0..40i64 {
            let batch = [(step * 7) % 20 + 1, (step * 3) % 20 + 1, 2];
            state.mark_checked(batch);

            assert!(state.checked().is_disjoint(state.missing()));
            let union: HashSet<i64> = state.checked().union(state.missing()).copied().collect();
            assert_eq!(union, universe);
        }
    }

    #[test]
    fn test_mark_checked_reports_only_new_ids() {
        let mut state = LocationState::seed([1], [2, 3]);
        assert_eq!(state.mark_checked([1, 2, 2]), vec![2]);
        assert_eq!(state.mark_checked([3]), vec![3]);
    }

    #[test]
    fn test_foreign_ids_leave_union_unchanged() {
        let mut state = LocationState::seed([1, 2], [3, 4]);
        assert_eq!(state.mark_checked([3, 99]), vec![3]);
        assert!(!state.is_checked(99));
        assert!(!state.is_known(99));

        let union: HashSet<i64> = state.checked().union(state.missing()).copied().collect();
        assert_eq!(union, HashSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn test_bus_driven_updates() {
        let bus = EventBus::new();
        let tracker = Arc::new(LocationsTracker::new(disconnected_outbox()));
        let _subs = tracker.attach(&bus);

        bus.publish(BusEvent::Packet(ServerPacket::Connected(Connected {
            checked_locations: vec![1, 2],
            missing_locations: vec![3, 4],
            ..Default::default()
        })));
        bus.publish(BusEvent::Packet(ServerPacket::RoomUpdate(RoomUpdate {
            checked_locations: Some(vec![3, 99]),
            ..Default::default()
        })));

        assert_eq!(tracker.checked_locations(), vec![1, 2, 3]);
        assert_eq!(tracker.missing_locations(), vec![4]);

        bus.publish(BusEvent::Packet(ServerPacket::Connected(Connected {
            checked_locations: vec![],
            missing_locations: vec![10],
            ..Default::default()
        })));
        assert!(tracker.checked_locations().is_empty());
        assert_eq!(tracker.missing_locations(), vec![10]);

        bus.publish(BusEvent::ConnectionLost(
            crate::events::DisconnectReason::ClosedByServer,
        ));
        assert_eq!(tracker.snapshot(), LocationState::default());
    }

    #[test]
    fn test_requests_fail_while_disconnected() {
        let tracker = LocationsTracker::new(disconnected_outbox());
        tracker.seed(&[], &[5]);

        assert!(matches!(tracker.check(&[5]), Err(SessionError::NotConnected)));
        assert!(matches!(
            tracker.scout(&[5], HintMode::NoHint),
            Err(SessionError::NotConnected)
        ));
        assert!(tracker.release_all_missing().is_err());
        assert_eq!(tracker.missing_locations(), vec![5]);
    }

    #[test]
    fn test_requests_are_single_packets() {
        let (outbox, mut frames) = Outbox::loopback();
        let tracker = LocationsTracker::new(outbox);
        tracker.seed(&[1], &[4, 2, 3]);

        tracker.scout(&[2], HintMode::HintNewOnly).unwrap();
        let scout: serde_json::Value = serde_json::from_str(&frames.try_recv().unwrap()).unwrap();
        assert_eq!(scout[0]["cmd"], "LocationScouts");
        assert_eq!(scout[0]["create_as_hint"], 2);

        assert_eq!(tracker.release_all_missing().unwrap(), vec![2, 3, 4]);
        let checks: serde_json::Value = serde_json::from_str(&frames.try_recv().unwrap()).unwrap();
        assert_eq!(checks, serde_json::json!([{"cmd": "LocationChecks", "locations": [2, 3, 4]}]));

        // Local state only moves when the server confirms.
        assert_eq!(tracker.missing_locations(), vec![2, 3, 4]);
        tracker.check(&[]).unwrap();
        assert!(frames.try_recv().is_err());
    }

    fn disconnected_outbox() -> Outbox {
        Outbox::detached(Arc::new(ConnectionStateWatch::new()))
    }
}
