//! Server-side key/value storage.
//!
//! Writes are built with [`SetBuilder`]: operations are applied by the
//! server left to right, so the builder keeps them in call order. Replies are
//! matched to requests through a `request_id` field the server echoes back
//! verbatim in `Retrieved` and `SetReply`.
//!
//! Values are never computed locally. The mirror only holds what the server
//! reported.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::connection::Outbox;
use crate::error::SessionError;
use crate::events::{BusEvent, DisconnectReason, EventBus, Subscription, Topic};
use crate::packets::{
    ClientPacket, DataStorageOperation, Get, PacketKind, Retrieved, ServerPacket, Set, SetNotify,
    SetReply, StorageOperation,
};

/// Echoed field used to correlate replies with requests.
pub const REQUEST_ID_FIELD: &str = "request_id";

/// Key holding the race mode flag.
pub const RACE_MODE_KEY: &str = "_read_race_mode";

/// Key holding the hints for `slot` in `team`.
pub fn hints_key(team: u32, slot: u32) -> String {
    format!("_read_hints_{team}_{slot}")
}

/// Key holding the client status of `slot` in `team`.
pub fn client_status_key(team: u32, slot: u32) -> String {
    format!("_read_client_status_{team}_{slot}")
}

// ---------------------------------------------------------------------------
// SetBuilder
// ---------------------------------------------------------------------------

/// Builds a `Set` packet one operation at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct SetBuilder {
    key: String,
    default: Value,
    want_reply: bool,
    operations: Vec<DataStorageOperation>,
    extra: Map<String, Value>,
}

impl SetBuilder {
    /// Start a write to `key`, which takes `default` if it does not exist.
    pub fn new(key: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            default: default.into(),
            want_reply: false,
            operations: Vec::new(),
            extra: Map::new(),
        }
    }

    fn push(mut self, operation: StorageOperation, value: Value) -> Self {
        self.operations.push(DataStorageOperation { operation, value });
        self
    }

    /// Overwrite the value.
    pub fn replace(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Replace, value.into())
    }

    /// Create the key from the default if absent, otherwise keep it.
    pub fn default(self) -> Self {
        self.push(StorageOperation::Default, Value::Null)
    }

    /// Add a number or concatenate a list.
    pub fn add(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Add, value.into())
    }

    /// Multiply.
    pub fn multiply(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Mul, value.into())
    }

    /// Raise to the power of `value`.
    pub fn power(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Pow, value.into())
    }

    /// Remainder of division by `value`.
    pub fn modulo(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Mod, value.into())
    }

    /// Round down to an integer.
    pub fn floor(self) -> Self {
        self.push(StorageOperation::Floor, Value::Null)
    }

    /// Round up to an integer.
    pub fn ceil(self) -> Self {
        self.push(StorageOperation::Ceil, Value::Null)
    }

    /// Keep the larger of the stored value and `value`.
    pub fn max(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Max, value.into())
    }

    /// Keep the smaller of the stored value and `value`.
    pub fn min(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Min, value.into())
    }

    /// Bitwise and.
    pub fn and(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::And, value.into())
    }

    /// Bitwise or.
    pub fn or(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Or, value.into())
    }

    /// Bitwise xor.
    pub fn xor(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Xor, value.into())
    }

    /// Shift left by `value` bits.
    pub fn left_shift(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::LeftShift, value.into())
    }

    /// Shift right by `value` bits.
    pub fn right_shift(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::RightShift, value.into())
    }

    /// Remove the first list element equal to `value`.
    pub fn remove(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Remove, value.into())
    }

    /// Remove list index or dict key `value`.
    pub fn pop(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Pop, value.into())
    }

    /// Merge dict `value` into the stored dict.
    pub fn update(self, value: impl Into<Value>) -> Self {
        self.push(StorageOperation::Update, value.into())
    }

    /// Ask the server for a `SetReply`.
    pub fn want_reply(mut self, want_reply: bool) -> Self {
        self.want_reply = want_reply;
        self
    }

    /// Attach a field the server echoes back in `SetReply`.
    pub fn extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Key being written.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Finish the packet.
    pub fn build(self) -> Set {
        Set {
            key: self.key,
            default: self.default,
            want_reply: self.want_reply,
            operations: self.operations,
            extra: self.extra,
        }
    }
}

// ---------------------------------------------------------------------------
// DataStorage
// ---------------------------------------------------------------------------

/// Removes a request's pending entry when dropped.
struct PendingSlot<'a> {
    pending: &'a Mutex<PendingMap>,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.pending.lock().remove(&self.id).is_some() {
            tracing::debug!(request_id = self.id, "storage request abandoned");
        }
    }
}

enum Reply {
    Retrieved(Map<String, Value>),
    Set(SetReply),
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Reply, SessionError>>>;

/// Data storage requests, reply correlation and the value mirror.
pub struct DataStorage {
    outbox: Outbox,
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    mirror: RwLock<HashMap<String, Value>>,
}

impl DataStorage {
    /// Create a client sending through `outbox`.
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            mirror: RwLock::new(HashMap::new()),
        }
    }

    /// Start building a write to `key`.
    pub fn prepare(&self, key: impl Into<String>, default: impl Into<Value>) -> SetBuilder {
        SetBuilder::new(key, default)
    }

    /// Read `keys`. The answer arrives as `Retrieved`.
    pub fn get<I, K>(&self, keys: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.outbox.send(&[ClientPacket::Get(Get {
            keys: keys.into_iter().map(Into::into).collect(),
            extra: Map::new(),
        })])
    }

    /// Subscribe to changes of `keys`. Changes arrive as `SetReply`.
    pub fn notify<I, K>(&self, keys: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.outbox.send(&[ClientPacket::SetNotify(SetNotify {
            keys: keys.into_iter().map(Into::into).collect(),
        })])
    }

    /// Send a built `Set`.
    pub fn set(&self, packet: Set) -> Result<(), SessionError> {
        self.outbox.send(&[ClientPacket::Set(packet)])
    }

    /// Read `keys` and wait for the matching `Retrieved`.
    pub async fn fetch<I, K>(&self, keys: I) -> Result<Map<String, Value>, SessionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let (slot, rx) = self.register();
        let mut extra = Map::new();
        extra.insert(REQUEST_ID_FIELD.to_string(), Value::from(slot.id));
        let packet = ClientPacket::Get(Get {
            keys: keys.into_iter().map(Into::into).collect(),
            extra,
        });
        match self.request(slot, rx, packet).await? {
            Reply::Retrieved(keys) => Ok(keys),
            Reply::Set(_) => Err(SessionError::Disconnected(DisconnectReason::Requested)),
        }
    }

    /// Send `builder` with a reply requested and wait for the matching
    /// `SetReply`.
    pub async fn commit(&self, builder: SetBuilder) -> Result<SetReply, SessionError> {
        let (slot, rx) = self.register();
        let packet = builder
            .want_reply(true)
            .extra(REQUEST_ID_FIELD, slot.id)
            .build();
        match self.request(slot, rx, ClientPacket::Set(packet)).await? {
            Reply::Set(reply) => Ok(reply),
            Reply::Retrieved(_) => Err(SessionError::Disconnected(DisconnectReason::Requested)),
        }
    }

    /// Last value the server reported for `key`.
    pub fn cached(&self, key: &str) -> Option<Value> {
        self.mirror.read().get(key).cloned()
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    fn register(&self) -> (PendingSlot<'_>, oneshot::Receiver<Result<Reply, SessionError>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let slot = PendingSlot {
            pending: &self.pending,
            id,
        };
        (slot, rx)
    }

    /// Send `packet` and wait for its reply. `slot` is released however this
    /// future ends, including when the caller drops it.
    async fn request(
        &self,
        slot: PendingSlot<'_>,
        rx: oneshot::Receiver<Result<Reply, SessionError>>,
        packet: ClientPacket,
    ) -> Result<Reply, SessionError> {
        self.outbox.send(&[packet])?;
        tracing::debug!(request_id = slot.id, "data storage request sent");
        let reply = rx
            .await
            .unwrap_or(Err(SessionError::Disconnected(DisconnectReason::Requested)));
        drop(slot);
        reply
    }

    fn resolve(&self, extra: &Map<String, Value>, reply: Reply) {
        let Some(id) = extra.get(REQUEST_ID_FIELD).and_then(Value::as_u64) else {
            return;
        };
        match self.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(Ok(reply));
            }
            None => tracing::debug!(request_id = id, "reply for unknown request"),
        }
    }

    /// Record a `Retrieved` and complete the request it answers.
    pub fn handle_retrieved(&self, packet: &Retrieved) {
        {
            let mut mirror = self.mirror.write();
            for (key, value) in &packet.keys {
                mirror.insert(key.clone(), value.clone());
            }
        }
        self.resolve(&packet.extra, Reply::Retrieved(packet.keys.clone()));
    }

    /// Record a `SetReply` and complete the request it answers.
    pub fn handle_set_reply(&self, packet: &SetReply) {
        self.mirror
            .write()
            .insert(packet.key.clone(), packet.value.clone());
        self.resolve(&packet.extra, Reply::Set(packet.clone()));
    }

    /// Fail every outstanding request and clear the mirror.
    pub fn fail_pending(&self, reason: &DisconnectReason) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), %reason, "dropping pending storage requests");
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(SessionError::Disconnected(reason.clone())));
        }
        self.mirror.write().clear();
    }

    /// Feed replies from the bus and fail requests on connection loss.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        let storage = Arc::clone(self);
        let replies = bus.subscribe_all(
            &[
                Topic::Packet(PacketKind::Retrieved),
                Topic::Packet(PacketKind::SetReply),
            ],
            move |event: &BusEvent| match event.packet() {
                Some(ServerPacket::Retrieved(packet)) => storage.handle_retrieved(packet),
                Some(ServerPacket::SetReply(packet)) => storage.handle_set_reply(packet),
                _ => {}
            },
        );
        let storage = Arc::clone(self);
        let lost = bus.subscribe(Topic::ConnectionLost, move |event: &BusEvent| {
            if let BusEvent::ConnectionLost(reason) = event {
                storage.fail_pending(reason);
            }
        });
        vec![replies, lost]
    }
}

impl std::fmt::Debug for DataStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStorage")
            .field("pending", &self.pending_requests())
            .field("mirrored", &self.mirror.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_builder_keeps_operation_order() {
        let set = SetBuilder::new("score", 0).add(5).multiply(2).build();
        let value = serde_json::to_value(ClientPacket::Set(set)).unwrap();
        assert_eq!(
            value,
            json!({
                "cmd": "Set",
                "key": "score",
                "default": 0,
                "want_reply": false,
                "operations": [
                    {"operation": "add", "value": 5},
                    {"operation": "mul", "value": 2}
                ]
            })
        );
    }

    #[test]
    fn test_builder_covers_every_operation() {
        let set = SetBuilder::new("k", json!({}))
            .replace(1)
            .default()
            .power(2)
            .modulo(7)
            .floor()
            .ceil()
            .max(3)
            .min(9)
            .and(6)
            .or(1)
            .xor(4)
            .left_shift(1)
            .right_shift(2)
            .remove("x")
            .pop(0)
            .update(json!({"a": 1}))
            .want_reply(true)
            .extra("tag", "mine")
            .build();
        let names: Vec<StorageOperation> = set.operations.iter().map(|o| o.operation).collect();
        assert_eq!(names.len(), 16);
        assert_eq!(names[0], StorageOperation::Replace);
        assert_eq!(names[15], StorageOperation::Update);
        assert_eq!(set.operations[4].value, Value::Null);
        assert!(set.want_reply);
        assert_eq!(set.extra["tag"], "mine");
    }

    #[test]
    fn test_key_helpers() {
        assert_eq!(hints_key(0, 3), "_read_hints_0_3");
        assert_eq!(client_status_key(1, 2), "_read_client_status_1_2");
    }

    #[test]
    fn test_requests_need_connection() {
        let outbox = Outbox::detached(Arc::new(crate::connection::ConnectionStateWatch::new()));
        let storage = DataStorage::new(outbox);
        assert!(matches!(storage.get(["a"]), Err(SessionError::NotConnected)));
        assert!(matches!(
            storage.set(storage.prepare("a", 0).add(1).build()),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_nothing_pending() {
        let outbox = Outbox::detached(Arc::new(crate::connection::ConnectionStateWatch::new()));
        let storage = DataStorage::new(outbox);
        assert!(matches!(
            storage.fetch(["a"]).await,
            Err(SessionError::NotConnected)
        ));
        assert_eq!(storage.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_fetch_matches_echoed_request_id() {
        let (outbox, mut frames) = Outbox::loopback();
        let bus = EventBus::new();
        let storage = Arc::new(DataStorage::new(outbox));
        let _subs = storage.attach(&bus);

        let s = Arc::clone(&storage);
        let fetch = tokio::spawn(async move { s.fetch(["score"]).await });

        let frame: Value = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(frame[0]["cmd"], "Get");
        let id = frame[0][REQUEST_ID_FIELD].as_u64().unwrap();

        let retrieved = |id: u64, value: i64| {
            let mut keys = Map::new();
            keys.insert("score".into(), json!(value));
            let mut extra = Map::new();
            extra.insert(REQUEST_ID_FIELD.into(), json!(id));
            BusEvent::Packet(ServerPacket::Retrieved(Retrieved { keys, extra }))
        };
        bus.publish(retrieved(id + 100, 1));
        bus.publish(retrieved(id, 42));

        let keys = fetch.await.unwrap().unwrap();
        assert_eq!(keys["score"], 42);
        assert_eq!(storage.cached("score"), Some(json!(42)));
        assert_eq!(storage.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_commit_resolves_with_set_reply() {
        let (outbox, mut frames) = Outbox::loopback();
        let bus = EventBus::new();
        let storage = Arc::new(DataStorage::new(outbox));
        let _subs = storage.attach(&bus);

        let s = Arc::clone(&storage);
        let commit = tokio::spawn(async move { s.commit(s.prepare("score", 0).add(5)).await });

        let frame: Value = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(frame[0]["want_reply"], true);
        let mut extra = Map::new();
        extra.insert(REQUEST_ID_FIELD.into(), frame[0][REQUEST_ID_FIELD].clone());
        bus.publish(BusEvent::Packet(ServerPacket::SetReply(SetReply {
            key: "score".into(),
            value: json!(5),
            original_value: json!(0),
            slot: Some(1),
            extra,
        })));

        let reply = commit.await.unwrap().unwrap();
        assert_eq!(reply.value, 5);
        assert_eq!(reply.original_value, 0);
    }

    #[tokio::test]
    async fn test_pending_fetch_fails_on_connection_lost() {
        let (outbox, mut frames) = Outbox::loopback();
        let bus = EventBus::new();
        let storage = Arc::new(DataStorage::new(outbox));
        let _subs = storage.attach(&bus);
        storage.handle_set_reply(&SetReply {
            key: "seen".into(),
            value: json!(true),
            ..Default::default()
        });

        let s = Arc::clone(&storage);
        let fetch = tokio::spawn(async move { s.fetch(["a", "b"]).await });
        frames.recv().await.unwrap();

        bus.publish(BusEvent::ConnectionLost(DisconnectReason::ClosedByServer));

        let err = fetch.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Disconnected(DisconnectReason::ClosedByServer)
        ));
        assert_eq!(storage.cached("seen"), None);
    }

    #[tokio::test]
    async fn test_cancelled_requests_release_their_slot() {
        let (outbox, mut frames) = Outbox::loopback();
        let storage = DataStorage::new(outbox);

        for _ in 0..3 {
            let result =
                tokio::time::timeout(Duration::from_millis(5), storage.fetch(["a"])).await;
            assert!(result.is_err(), "no reply was sent");
        }
        let commit = storage.commit(storage.prepare("b", 0).add(1));
        assert!(tokio::time::timeout(Duration::from_millis(5), commit).await.is_err());

        assert_eq!(storage.pending_requests(), 0);
        for _ in 0..4 {
            frames.try_recv().unwrap();
        }
    }
}
