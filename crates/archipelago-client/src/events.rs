//! Typed publish/subscribe for inbound packets and connection loss.
//!
//! The [`EventBus`] maps [`Topic`] values to [`EventHandler`]
//! implementations. Every packet is delivered to the handlers of its
//! [`PacketKind`] topic first and then to the [`Topic::AnyPacket`] handlers,
//! each group in registration order. Delivery is synchronous on the
//! publishing task; a panicking handler is logged and skipped without
//! affecting the others.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::packets::{PacketKind, ServerPacket};

// ---------------------------------------------------------------------------
// Topic and events
// ---------------------------------------------------------------------------

/// What a handler subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Packets of one kind.
    Packet(PacketKind),
    /// Every packet, including unrecognized ones.
    AnyPacket,
    /// The connection went away.
    ConnectionLost,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local side called `disconnect`.
    Requested,
    /// No `RoomInfo` arrived within the handshake window.
    HandshakeTimeout,
    /// The server closed the socket.
    ClosedByServer,
    /// The transport failed.
    Transport(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str("disconnect requested"),
            DisconnectReason::HandshakeTimeout => f.write_str("handshake timed out"),
            DisconnectReason::ClosedByServer => f.write_str("closed by server"),
            DisconnectReason::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Payload delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A decoded server packet.
    Packet(ServerPacket),
    /// The connection ended.
    ConnectionLost(DisconnectReason),
}

impl BusEvent {
    /// The packet carried by this event, if any.
    pub fn packet(&self) -> Option<&ServerPacket> {
        match self {
            BusEvent::Packet(packet) => Some(packet),
            BusEvent::ConnectionLost(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Trait for event handlers. Usually a closure.
///
/// Handlers run on the connection task and must not block; anything slow
/// should be spawned.
pub trait EventHandler: Send + Sync {
    /// Process one event.
    fn handle(&self, event: &BusEvent);
}

/// Blanket implementation for closures.
impl<F> EventHandler for F
where
    F: Fn(&BusEvent) + Send + Sync,
{
    fn handle(&self, event: &BusEvent) {
        self(event);
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

struct Registration {
    id: u64,
    topic: Topic,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct BusInner {
    handlers: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) {
        self.handlers.write().retain(|r| r.id != id);
    }
}

/// Fan-out hub shared by the connection task, the trackers and callers.
///
/// Cloning is cheap; all clones publish to the same handler set.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<H: EventHandler + 'static>(&self, topic: Topic, handler: H) -> Subscription {
        self.subscribe_all(&[topic], handler)
    }

    /// Register one handler under several topics. A single
    /// [`Subscription::unsubscribe`] removes all of them.
    ///
    /// Subscribing to both a packet kind and [`Topic::AnyPacket`] delivers
    /// those packets twice.
    pub fn subscribe_all<H: EventHandler + 'static>(
        &self,
        topics: &[Topic],
        handler: H,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        let mut handlers = self.inner.handlers.write();
        for &topic in topics {
            handlers.push(Registration {
                id,
                topic,
                handler: Arc::clone(&handler),
            });
        }
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `event` to every interested handler.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while being called.
    pub fn publish(&self, event: BusEvent) {
        let targets = self.matching_handlers(&event);
        for handler in targets {
            let result = catch_unwind(AssertUnwindSafe(|| handler.handle(&event)));
            if result.is_err() {
                tracing::error!(event = ?event_label(&event), "event handler panicked");
            }
        }
    }

    /// Number of live registrations, counting each topic separately.
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    fn matching_handlers(&self, event: &BusEvent) -> Vec<Arc<dyn EventHandler>> {
        let handlers = self.inner.handlers.read();
        let mut out = Vec::new();
        let mut pick = |topic: Topic| {
            out.extend(
                handlers
                    .iter()
                    .filter(|r| r.topic == topic)
                    .map(|r| Arc::clone(&r.handler)),
            );
        };
        match event {
            BusEvent::Packet(packet) => {
                let kind = packet.kind();
                if kind != PacketKind::Unrecognized {
                    pick(Topic::Packet(kind));
                }
                pick(Topic::AnyPacket);
            }
            BusEvent::ConnectionLost(_) => pick(Topic::ConnectionLost),
        }
        out
    }
}

fn event_label(event: &BusEvent) -> Topic {
    match event {
        BusEvent::Packet(packet) => Topic::Packet(packet.kind()),
        BusEvent::ConnectionLost(_) => Topic::ConnectionLost,
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the handler. Calling this more than once does nothing.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel)
            && let Some(bus) = self.bus.upgrade()
        {
            bus.remove(self.id);
        }
    }

    /// Whether the handler is still registered through this handle.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.bus.strong_count() > 0
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{RawPacket, RoomUpdate};
    use std::sync::atomic::AtomicU32;

    fn room_update() -> BusEvent {
        BusEvent::Packet(ServerPacket::RoomUpdate(RoomUpdate::default()))
    }

    fn unknown() -> BusEvent {
        BusEvent::Packet(ServerPacket::Unrecognized(RawPacket {
            cmd: Some("TotallyUnknownType".into()),
            body: serde_json::json!({"cmd": "TotallyUnknownType"}),
        }))
    }

    fn counter(bus: &EventBus, topic: Topic) -> (Arc<AtomicU32>, Subscription) {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let sub = bus.subscribe(topic, move |_: &BusEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_packet_routed_to_kind_and_wildcard() {
        let bus = EventBus::new();
        let (kind_hits, _a) = counter(&bus, Topic::Packet(PacketKind::RoomUpdate));
        let (other_hits, _b) = counter(&bus, Topic::Packet(PacketKind::Connected));
        let (any_hits, _c) = counter(&bus, Topic::AnyPacket);

        bus.publish(room_update());

        assert_eq!(kind_hits.load(Ordering::SeqCst), 1);
        assert_eq!(other_hits.load(Ordering::SeqCst), 0);
        assert_eq!(any_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unrecognized_only_reaches_wildcard() {
        let bus = EventBus::new();
        let (unrecognized_hits, _a) = counter(&bus, Topic::Packet(PacketKind::Unrecognized));
        let (any_hits, _b) = counter(&bus, Topic::AnyPacket);

        bus.publish(unknown());

        assert_eq!(unrecognized_hits.load(Ordering::SeqCst), 0);
        assert_eq!(any_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            subs.push(bus.subscribe(
                Topic::Packet(PacketKind::RoomUpdate),
                move |_: &BusEvent| order.lock().push(i),
            ));
        }
        let any_order = Arc::clone(&order);
        subs.push(bus.subscribe(Topic::AnyPacket, move |_: &BusEvent| {
            any_order.lock().push(99)
        }));

        bus.publish(room_update());

        assert_eq!(*order.lock(), vec![0, 1, 2, 99]);
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let _bad = bus.subscribe(Topic::AnyPacket, |event: &BusEvent| {
            if event.packet().is_some() {
                panic!("handler failure");
            }
        });
        let (hits, _good) = counter(&bus, Topic::AnyPacket);

        bus.publish(room_update());
        bus.publish(room_update());

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (hits, sub) = counter(&bus, Topic::AnyPacket);
        let (_other, _keep) = counter(&bus, Topic::AnyPacket);

        sub.unsubscribe();
        sub.unsubscribe();
        bus.publish(room_update());

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!sub.is_active());
        assert_eq!(bus.handler_count(), 1);
    }

    #[test]
    fn test_unsubscribe_inside_handler() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU32::new(0));
        let slot: Arc<parking_lot::Mutex<Option<Subscription>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let h = Arc::clone(&hits);
        let s = Arc::clone(&slot);
        let sub = bus.subscribe(Topic::AnyPacket, move |_: &BusEvent| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = s.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        bus.publish(room_update());
        bus.publish(room_update());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_lost_topic() {
        let bus = EventBus::new();
        let (lost, _a) = counter(&bus, Topic::ConnectionLost);
        let (any, _b) = counter(&bus, Topic::AnyPacket);

        bus.publish(BusEvent::ConnectionLost(DisconnectReason::ClosedByServer));

        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert_eq!(any.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscribe_all_single_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let sub = bus.subscribe_all(
            &[Topic::AnyPacket, Topic::ConnectionLost],
            move |_: &BusEvent| {
                h.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(bus.handler_count(), 2);

        bus.publish(room_update());
        bus.publish(BusEvent::ConnectionLost(DisconnectReason::Requested));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        assert_eq!(bus.handler_count(), 0);
    }
}
