//! Ordered history of items received by the connected slot.
//!
//! `ReceivedItems.index` is the position of the packet's first item in the
//! slot's full history. A packet that starts past the end of the local
//! history means something was missed; the tracker then asks for a full
//! resend with `Sync` instead of guessing.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::connection::Outbox;
use crate::events::{BusEvent, EventBus, Subscription, Topic};
use crate::packets::{ClientPacket, PacketKind, ReceivedItems, ServerPacket};
use crate::types::NetworkItem;

/// What a `ReceivedItems` packet did to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemsUpdate {
    /// Index 0: the history was replaced and now holds this many items.
    Replaced(usize),
    /// This many new items were appended.
    Appended(usize),
    /// The packet did not line up; history unchanged and `Sync` requested.
    Desync,
}

/// Tracks `ReceivedItems` in order.
#[derive(Debug)]
pub struct ItemsTracker {
    history: RwLock<Vec<NetworkItem>>,
    outbox: Outbox,
}

impl ItemsTracker {
    /// Create an empty tracker; `outbox` carries resync requests.
    pub fn new(outbox: Outbox) -> Self {
        Self {
            history: RwLock::new(Vec::new()),
            outbox,
        }
    }

    /// Merge one `ReceivedItems` packet.
    pub fn apply(&self, packet: &ReceivedItems) -> ItemsUpdate {
        let update = {
            let mut history = self.history.write();
            merge(&mut history, packet)
        };
        match update {
            ItemsUpdate::Desync => {
                tracing::warn!(
                    index = packet.index,
                    count = packet.items.len(),
                    have = self.len(),
                    "received items out of sequence, requesting sync"
                );
                if let Err(error) = self.outbox.send(&[ClientPacket::Sync]) {
                    tracing::debug!(%error, "could not request sync");
                }
            }
            ItemsUpdate::Replaced(n) => tracing::debug!(total = n, "item history replaced"),
            ItemsUpdate::Appended(n) => tracing::debug!(new = n, "items received"),
        }
        update
    }

    /// Copy of the history.
    pub fn received(&self) -> Vec<NetworkItem> {
        self.history.read().clone()
    }

    /// Number of items received.
    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    /// Whether nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    /// How many copies of `item` were received.
    pub fn count_of(&self, item: i64) -> usize {
        self.history.read().iter().filter(|i| i.item == item).count()
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.history.write().clear();
    }

    /// Feed the tracker from the bus.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        let tracker = Arc::clone(self);
        let packets = bus.subscribe(
            Topic::Packet(PacketKind::ReceivedItems),
            move |event: &BusEvent| {
                if let Some(ServerPacket::ReceivedItems(packet)) = event.packet() {
                    tracker.apply(packet);
                }
            },
        );
        let tracker = Arc::clone(self);
        let lost = bus.subscribe(Topic::ConnectionLost, move |_: &BusEvent| tracker.reset());
        vec![packets, lost]
    }
}

fn merge(history: &mut Vec<NetworkItem>, packet: &ReceivedItems) -> ItemsUpdate {
    if packet.index == 0 {
        history.clone_from(&packet.items);
        return ItemsUpdate::Replaced(history.len());
    }
    if packet.index > history.len() {
        return ItemsUpdate::Desync;
    }

    let overlap = (history.len() - packet.index).min(packet.items.len());
    if history[packet.index..packet.index + overlap] != packet.items[..overlap] {
        return ItemsUpdate::Desync;
    }
    let fresh = &packet.items[overlap..];
    history.extend_from_slice(fresh);
    ItemsUpdate::Appended(fresh.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DisconnectReason;
    use crate::types::ItemFlags;

    fn item(id: i64) -> NetworkItem {
        NetworkItem {
            item: id,
            location: id * 10,
            player: 1,
            flags: ItemFlags::PROGRESSION,
        }
    }

    fn packet(index: usize, ids: &[i64]) -> ReceivedItems {
        ReceivedItems {
            index,
            items: ids.iter().copied().map(item).collect(),
        }
    }

    #[test]
    fn test_index_zero_replaces() {
        let (outbox, _frames) = Outbox::loopback();
        let tracker = ItemsTracker::new(outbox);
        tracker.apply(&packet(0, &[1, 2, 3]));
        assert_eq!(tracker.apply(&packet(0, &[7])), ItemsUpdate::Replaced(1));
        assert_eq!(tracker.received(), vec![item(7)]);
    }

    #[test]
    fn test_append_and_overlap() {
        let (outbox, mut frames) = Outbox::loopback();
        let tracker = ItemsTracker::new(outbox);
        tracker.apply(&packet(0, &[1, 2]));

        assert_eq!(tracker.apply(&packet(2, &[3])), ItemsUpdate::Appended(1));
        assert_eq!(tracker.apply(&packet(1, &[2, 3, 4])), ItemsUpdate::Appended(1));
        assert_eq!(tracker.apply(&packet(3, &[4])), ItemsUpdate::Appended(0));

        let ids: Vec<i64> = tracker.received().iter().map(|i| i.item).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(frames.try_recv().is_err(), "no sync expected");
    }

    #[test]
    fn test_gap_requests_exactly_one_sync() {
        let (outbox, mut frames) = Outbox::loopback();
        let tracker = ItemsTracker::new(outbox);
        tracker.apply(&packet(0, &[1, 2]));

        assert_eq!(tracker.apply(&packet(5, &[6])), ItemsUpdate::Desync);
        assert_eq!(tracker.len(), 2);

        assert_eq!(frames.try_recv().unwrap(), r#"[{"cmd":"Sync"}]"#);
        assert!(frames.try_recv().is_err());
    }

    #[test]
    fn test_conflicting_overlap_is_desync() {
        let (outbox, mut frames) = Outbox::loopback();
        let tracker = ItemsTracker::new(outbox);
        tracker.apply(&packet(0, &[1, 2]));

        assert_eq!(tracker.apply(&packet(1, &[9, 3])), ItemsUpdate::Desync);
        assert!(frames.try_recv().is_ok());
        assert_eq!(tracker.count_of(9), 0);
    }

    #[test]
    fn test_count_and_reset_on_connection_lost() {
        let bus = EventBus::new();
        let (outbox, _frames) = Outbox::loopback();
        let tracker = Arc::new(ItemsTracker::new(outbox));
        let _subs = tracker.attach(&bus);

        bus.publish(BusEvent::Packet(ServerPacket::ReceivedItems(packet(
            0,
            &[5, 5, 6],
        ))));
        assert_eq!(tracker.count_of(5), 2);
        assert_eq!(tracker.len(), 3);

        bus.publish(BusEvent::ConnectionLost(DisconnectReason::Requested));
        assert!(tracker.is_empty());
    }
}
