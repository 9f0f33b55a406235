use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::ContentStore;
use crate::models::{MessageType, UserStatus, WsMessage};

/// Capacity of each connection's outbound frame queue. A connection that
/// falls this far behind on the content path is evicted rather than buffered.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Initial content for a document with no stored content: a valid empty
/// Quill delta, matching what the REST create path writes.
pub const EMPTY_DELTA: &str = r#"{"ops":[]}"#;

/// Registration record for one live socket. The sender is the only
/// long-lived handle to the connection's outbound queue; the hub dropping it
/// is what closes the queue, and that happens exactly once, after the
/// connection has been removed from its room.
pub struct Connection {
    pub conn_id: Uuid,
    pub doc_id: String,
    pub user_id: String,
    pub title: String,
    pub sender: mpsc::Sender<String>,
}

enum HubCommand {
    Register(Connection),
    Unregister { doc_id: String, conn_id: Uuid },
    Broadcast(WsMessage),
    RemoveDocument { doc_id: String },
}

/// Cloneable handle exposing the four hub operations. Connections and the
/// REST layer hold this instead of the hub itself.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn register(&self, conn: Connection) {
        let _ = self.tx.send(HubCommand::Register(conn));
    }

    pub fn unregister(&self, doc_id: &str, conn_id: Uuid) {
        let _ = self.tx.send(HubCommand::Unregister {
            doc_id: doc_id.to_string(),
            conn_id,
        });
    }

    pub fn broadcast(&self, msg: WsMessage) {
        let _ = self.tx.send(HubCommand::Broadcast(msg));
    }

    /// Tear down all room state for a document and drop its live
    /// connections without saving. Used when a document is deleted.
    pub fn remove_document(&self, doc_id: &str) {
        let _ = self.tx.send(HubCommand::RemoveDocument {
            doc_id: doc_id.to_string(),
        });
    }
}

struct Member {
    user_id: String,
    sender: mpsc::Sender<String>,
}

#[derive(Default)]
struct HubState {
    /// doc_id -> live connections viewing that document
    rooms: HashMap<String, HashMap<Uuid, Member>>,
    /// doc_id -> most recently seen content payload (JSON text)
    cache: HashMap<String, String>,
    /// doc_id -> modified since the last successful persist
    dirty: HashMap<String, bool>,
    /// doc_id -> user_id -> status; tabs of one user coalesce to one entry
    presence: HashMap<String, HashMap<String, UserStatus>>,
}

/// The singleton coordinator for all document rooms.
///
/// All mutation of shared state happens on one command loop, under one
/// mutex shared only with the save worker. The mutex is never held across
/// an await: store I/O and queue writes always work on snapshots taken
/// while it was held.
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    store: Arc<dyn ContentStore>,
    handle: HubHandle,
    rx: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            store,
            handle: HubHandle { tx },
            rx,
        }
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Start the command loop and the periodic save worker, returning the
    /// handle the rest of the process uses to reach the hub.
    pub fn spawn(store: Arc<dyn ContentStore>, save_interval: Duration) -> HubHandle {
        let hub = Hub::new(store.clone());
        let handle = hub.handle();
        tokio::spawn(run_save_worker(hub.state.clone(), store, save_interval));
        tokio::spawn(hub.run());
        handle
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                HubCommand::Register(conn) => self.handle_register(conn).await,
                HubCommand::Unregister { doc_id, conn_id } => {
                    self.handle_unregister(&doc_id, conn_id).await
                }
                HubCommand::Broadcast(msg) => self.handle_broadcast(msg),
                HubCommand::RemoveDocument { doc_id } => self.handle_remove_document(&doc_id),
            }
        }
    }

    async fn handle_register(&self, conn: Connection) {
        // This loop is the only room creator, so the existence check cannot
        // race with another register between the two lock sections.
        let needs_load = !self.state.lock().rooms.contains_key(&conn.doc_id);

        let loaded = if needs_load {
            let content = match self.store.read_content_and_title(&conn.doc_id).await {
                Ok(Some((content, _title))) => content,
                Ok(None) => {
                    debug!(doc_id = %conn.doc_id, "no stored content, starting empty");
                    EMPTY_DELTA.to_string()
                }
                Err(e) => {
                    error!(doc_id = %conn.doc_id, error = %e, "failed to load document, starting empty");
                    EMPTY_DELTA.to_string()
                }
            };
            Some(content)
        } else {
            None
        };

        let snapshot = {
            let mut state = self.state.lock();
            if let Some(content) = loaded {
                state.cache.insert(conn.doc_id.clone(), content);
            }
            state.rooms.entry(conn.doc_id.clone()).or_default().insert(
                conn.conn_id,
                Member {
                    user_id: conn.user_id.clone(),
                    sender: conn.sender.clone(),
                },
            );
            state.presence.entry(conn.doc_id.clone()).or_default().insert(
                conn.user_id.clone(),
                UserStatus {
                    user_id: conn.user_id.clone(),
                    cursor_pos: 0,
                    last_seen: Utc::now(),
                },
            );
            state
                .cache
                .get(&conn.doc_id)
                .cloned()
                .unwrap_or_else(|| EMPTY_DELTA.to_string())
        };

        info!(doc_id = %conn.doc_id, user_id = %conn.user_id, "connection registered");

        // The joining connection gets the current document state first, then
        // the title. Both go out before any presence frame.
        let initial = WsMessage::server(
            MessageType::Update,
            &conn.doc_id,
            raw_content(snapshot, &conn.doc_id),
        );
        let metadata = match serde_json::value::to_raw_value(&serde_json::json!({
            "title": conn.title,
        })) {
            Ok(payload) => Some(WsMessage::server(MessageType::Metadata, &conn.doc_id, payload)),
            Err(e) => {
                error!(doc_id = %conn.doc_id, error = %e, "failed to build metadata payload");
                None
            }
        };
        for msg in std::iter::once(initial).chain(metadata) {
            match serde_json::to_string(&msg) {
                Ok(frame) => {
                    if conn.sender.try_send(frame).is_err() {
                        debug!(user_id = %conn.user_id, "connection went away before join frames were delivered");
                    }
                }
                Err(e) => error!(error = %e, "failed to serialize join frame"),
            }
        }

        self.broadcast_presence(&conn.doc_id);
    }

    async fn handle_unregister(&self, doc_id: &str, conn_id: Uuid) {
        let (removed, room_survives, flush) = {
            let mut state = self.state.lock();
            let member = state
                .rooms
                .get_mut(doc_id)
                .and_then(|room| room.remove(&conn_id));
            let mut flush = None;
            if let Some(member) = &member {
                // Dropping the member drops the hub's sender, which is what
                // closes this connection's outbound queue.
                if let Some(presence) = state.presence.get_mut(doc_id) {
                    presence.remove(&member.user_id);
                }
                if state.rooms.get(doc_id).is_some_and(|room| room.is_empty()) {
                    let dirty = state.dirty.remove(doc_id).unwrap_or(false);
                    let content = state.cache.remove(doc_id);
                    state.presence.remove(doc_id);
                    state.rooms.remove(doc_id);
                    info!(%doc_id, "room emptied, cleaning up");
                    if dirty {
                        flush = content;
                    }
                }
            }
            (member.is_some(), state.rooms.contains_key(doc_id), flush)
        };

        // Final flush for a room that emptied while dirty. The in-memory
        // content is gone either way, so a failure is logged, not retried.
        if let Some(content) = flush {
            if let Err(e) = self.store.update_content(doc_id, &content).await {
                error!(%doc_id, error = %e, "final flush failed, content lost");
            }
        }

        if removed && room_survives {
            self.broadcast_presence(doc_id);
        }
    }

    fn handle_broadcast(&self, msg: WsMessage) {
        let recipients = {
            let mut state = self.state.lock();
            // Content only lives while its room does; a broadcast for an
            // absent room (e.g. a REST save with nobody connected) has no
            // recipients and must not create an orphan cache entry.
            if !state.rooms.contains_key(&msg.document_id) {
                return;
            }
            if msg.kind == MessageType::Update {
                state
                    .cache
                    .insert(msg.document_id.clone(), msg.payload.get().to_string());
                state.dirty.insert(msg.document_id.clone(), true);
            }
            state.rooms[&msg.document_id]
                .iter()
                .filter(|(_, member)| member.user_id != msg.user_id)
                .map(|(conn_id, member)| (*conn_id, member.user_id.clone(), member.sender.clone()))
                .collect::<Vec<_>>()
        };

        let frame = match serde_json::to_string(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to serialize broadcast frame");
                return;
            }
        };

        for (conn_id, user_id, sender) in recipients {
            match sender.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // A lagging receiver must not stall the room.
                    warn!(%user_id, doc_id = %msg.document_id, "outbound queue full, evicting slow connection");
                    self.handle.unregister(&msg.document_id, conn_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(%user_id, "outbound queue already closed");
                }
            }
        }
    }

    fn handle_remove_document(&self, doc_id: &str) {
        let removed = {
            let mut state = self.state.lock();
            // Cache and dirty flag go first so the save worker cannot write
            // the document back after deletion.
            state.cache.remove(doc_id);
            state.dirty.remove(doc_id);
            state.presence.remove(doc_id);
            state.rooms.remove(doc_id)
        };
        if let Some(room) = removed {
            info!(%doc_id, connections = room.len(), "document removed, dropping live connections");
            // Dropping the room drops every member's sender; each write pump
            // closes its socket, and the read pumps unregister into an
            // absent room, which is a no-op.
        }
    }

    /// Send the full presence list for a document to everyone in its room.
    /// Presence is informational and lossy: a full queue is logged, never
    /// grounds for eviction.
    fn broadcast_presence(&self, doc_id: &str) {
        let (statuses, recipients) = {
            let state = self.state.lock();
            let statuses: Vec<UserStatus> = match state.presence.get(doc_id) {
                Some(presence) => presence.values().cloned().collect(),
                None => return,
            };
            let recipients: Vec<(String, mpsc::Sender<String>)> = state
                .rooms
                .get(doc_id)
                .map(|room| {
                    room.values()
                        .map(|m| (m.user_id.clone(), m.sender.clone()))
                        .collect()
                })
                .unwrap_or_default();
            (statuses, recipients)
        };
        if recipients.is_empty() {
            return;
        }

        let payload = match serde_json::value::to_raw_value(&statuses) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%doc_id, error = %e, "failed to serialize presence list");
                return;
            }
        };
        let msg = WsMessage::server(MessageType::PresenceUpdate, doc_id, payload);
        let frame = match serde_json::to_string(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to serialize presence frame");
                return;
            }
        };

        for (user_id, sender) in recipients {
            if sender.try_send(frame.clone()).is_err() {
                warn!(%user_id, %doc_id, "outbound queue full during presence update");
            }
        }
    }
}

fn raw_content(content: String, doc_id: &str) -> Box<RawValue> {
    match RawValue::from_string(content) {
        Ok(raw) => raw,
        Err(e) => {
            error!(%doc_id, error = %e, "cached content is not valid JSON, sending empty delta");
            RawValue::from_string(EMPTY_DELTA.to_string()).expect("EMPTY_DELTA is valid JSON")
        }
    }
}

/// Periodic write-back of dirty documents.
///
/// Each tick snapshots every dirty document's content under the lock, writes
/// the snapshots back outside it, and clears a dirty flag only when the
/// cache still equals the written snapshot. The equality re-check is what
/// keeps an update that raced the write from losing its "modified since
/// last save" signal.
async fn run_save_worker(
    state: Arc<Mutex<HubState>>,
    store: Arc<dyn ContentStore>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;

        let snapshots: Vec<(String, String)> = {
            let state = state.lock();
            state
                .dirty
                .iter()
                .filter(|(_, dirty)| **dirty)
                .filter_map(|(doc_id, _)| {
                    state
                        .cache
                        .get(doc_id)
                        .map(|content| (doc_id.clone(), content.clone()))
                })
                .collect()
        };

        for (doc_id, snapshot) in snapshots {
            if let Err(e) = store.update_content(&doc_id, &snapshot).await {
                // Dirty flag stays set; the next tick retries.
                error!(%doc_id, error = %e, "autosave failed, will retry");
                continue;
            }
            {
                let mut state = state.lock();
                if state
                    .cache
                    .get(&doc_id)
                    .is_some_and(|current| *current == snapshot)
                {
                    if let Some(flag) = state.dirty.get_mut(&doc_id) {
                        *flag = false;
                    }
                }
            }
            debug!(%doc_id, "autosaved document");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::time::sleep;

    /// In-memory content store capturing every write; `update_content` can
    /// be gated on a Notify to hold a save in flight, or told to fail.
    #[derive(Default)]
    struct MemStore {
        docs: Mutex<HashMap<String, (String, String)>>,
        updates: Mutex<Vec<(String, String)>>,
        gate: Option<Notify>,
        fail_updates: Mutex<u32>,
    }

    impl MemStore {
        fn with_doc(doc_id: &str, content: &str, title: &str) -> Arc<Self> {
            let store = MemStore::default();
            store
                .docs
                .lock()
                .insert(doc_id.to_string(), (content.to_string(), title.to_string()));
            Arc::new(store)
        }

        fn gated(doc_id: &str, content: &str, title: &str) -> Arc<Self> {
            let mut store = MemStore::default();
            store.gate = Some(Notify::new());
            store
                .docs
                .lock()
                .insert(doc_id.to_string(), (content.to_string(), title.to_string()));
            Arc::new(store)
        }

        fn updates(&self) -> Vec<(String, String)> {
            self.updates.lock().clone()
        }
    }

    #[async_trait]
    impl ContentStore for MemStore {
        async fn read_content_and_title(
            &self,
            doc_id: &str,
        ) -> Result<Option<(String, String)>, sqlx::Error> {
            Ok(self.docs.lock().get(doc_id).cloned())
        }

        async fn update_content(&self, doc_id: &str, content: &str) -> Result<(), sqlx::Error> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            {
                let mut remaining = self.fail_updates.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(sqlx::Error::PoolClosed);
                }
            }
            if let Some(doc) = self.docs.lock().get_mut(doc_id) {
                doc.0 = content.to_string();
            }
            self.updates
                .lock()
                .push((doc_id.to_string(), content.to_string()));
            Ok(())
        }
    }

    struct TestHub {
        handle: HubHandle,
        state: Arc<Mutex<HubState>>,
    }

    fn start_hub(store: Arc<MemStore>, save_interval: Duration) -> TestHub {
        let hub = Hub::new(store.clone());
        let handle = hub.handle();
        let state = hub.state.clone();
        tokio::spawn(run_save_worker(state.clone(), store, save_interval));
        tokio::spawn(hub.run());
        TestHub { handle, state }
    }

    struct TestClient {
        conn_id: Uuid,
        rx: mpsc::Receiver<String>,
    }

    fn join(hub: &TestHub, doc_id: &str, user_id: &str) -> TestClient {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let conn_id = Uuid::new_v4();
        hub.handle.register(Connection {
            conn_id,
            doc_id: doc_id.to_string(),
            user_id: user_id.to_string(),
            title: "Test Doc".to_string(),
            sender: tx,
        });
        TestClient { conn_id, rx }
    }

    fn update_from(user_id: &str, doc_id: &str, payload: &str) -> WsMessage {
        WsMessage {
            kind: MessageType::Update,
            document_id: doc_id.to_string(),
            user_id: user_id.to_string(),
            payload: RawValue::from_string(payload.to_string()).unwrap(),
        }
    }

    /// Let the hub loop drain its queued commands.
    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    async fn recv(client: &mut TestClient) -> WsMessage {
        let frame = tokio::time::timeout(Duration::from_secs(1), client.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed");
        serde_json::from_str(&frame).expect("invalid frame")
    }

    fn presence_users(msg: &WsMessage) -> Vec<String> {
        assert_eq!(msg.kind, MessageType::PresenceUpdate);
        let statuses: Vec<UserStatus> = serde_json::from_str(msg.payload.get()).unwrap();
        let mut users: Vec<String> = statuses.into_iter().map(|s| s.user_id).collect();
        users.sort();
        users
    }

    #[tokio::test(start_paused = true)]
    async fn register_sends_snapshot_metadata_then_presence() {
        let content = r#"{"ops":[{"insert":"Hello"}]}"#;
        let store = MemStore::with_doc("d1", content, "T");
        let hub = start_hub(store, Duration::from_secs(600));

        let mut a = join(&hub, "d1", "u1");
        settle().await;

        let first = recv(&mut a).await;
        assert_eq!(first.kind, MessageType::Update);
        assert_eq!(first.document_id, "d1");
        assert_eq!(first.payload.get(), content);
        assert!(first.user_id.is_empty());

        let second = recv(&mut a).await;
        assert_eq!(second.kind, MessageType::Metadata);
        assert_eq!(second.payload.get(), r#"{"title":"Test Doc"}"#);

        let third = recv(&mut a).await;
        assert_eq!(presence_users(&third), vec!["u1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn register_unknown_document_starts_with_empty_delta() {
        let store = Arc::new(MemStore::default());
        let hub = start_hub(store, Duration::from_secs(600));

        let mut a = join(&hub, "missing", "u1");
        settle().await;

        let first = recv(&mut a).await;
        assert_eq!(first.kind, MessageType::Update);
        assert_eq!(first.payload.get(), EMPTY_DELTA);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_fans_out_to_everyone_but_the_sender() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store, Duration::from_secs(600));

        let mut a = join(&hub, "d1", "u1");
        let mut b = join(&hub, "d1", "u2");
        settle().await;
        // a: UPDATE, METADATA, presence(u1), presence(u1,u2); b: UPDATE, METADATA, presence(u1,u2)
        for _ in 0..4 {
            recv(&mut a).await;
        }
        for _ in 0..3 {
            recv(&mut b).await;
        }

        let payload = r#"{"ops":[{"retain":5},{"insert":"!"}]}"#;
        hub.handle.broadcast(update_from("u2", "d1", payload));
        settle().await;

        let got = recv(&mut a).await;
        assert_eq!(got.kind, MessageType::Update);
        assert_eq!(got.user_id, "u2");
        assert_eq!(got.document_id, "d1");
        assert_eq!(got.payload.get(), payload);

        // the sender never receives its own echo
        assert!(b.rx.try_recv().is_err());

        let state = hub.state.lock();
        assert_eq!(state.cache["d1"], payload);
        assert!(state.dirty["d1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_broadcast_bypasses_the_cache() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store, Duration::from_secs(600));

        let mut a = join(&hub, "d1", "u1");
        let _b = join(&hub, "d1", "u2");
        settle().await;
        for _ in 0..4 {
            recv(&mut a).await;
        }

        hub.handle.broadcast(WsMessage {
            kind: MessageType::Cursor,
            document_id: "d1".to_string(),
            user_id: "u2".to_string(),
            payload: RawValue::from_string(r#"{"pos":7}"#.to_string()).unwrap(),
        });
        settle().await;

        let got = recv(&mut a).await;
        assert_eq!(got.kind, MessageType::Cursor);

        let state = hub.state.lock();
        assert_eq!(state.cache["d1"], EMPTY_DELTA);
        assert!(!state.dirty.contains_key("d1"));
    }

    #[tokio::test(start_paused = true)]
    async fn tabs_of_one_user_coalesce_to_one_presence_entry() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store, Duration::from_secs(600));

        let mut a1 = join(&hub, "d1", "u1");
        let _a2 = join(&hub, "d1", "u1");
        settle().await;

        recv(&mut a1).await; // UPDATE
        recv(&mut a1).await; // METADATA
        recv(&mut a1).await; // presence after first register
        let presence = recv(&mut a1).await; // presence after second register
        assert_eq!(presence_users(&presence), vec!["u1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_unregister_flushes_dirty_content_and_drops_the_room() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store.clone(), Duration::from_secs(600));

        let a = join(&hub, "d1", "u1");
        settle().await;

        let payload = r#"{"ops":[{"insert":"final"}]}"#;
        hub.handle.broadcast(update_from("u1", "d1", payload));
        settle().await;

        hub.handle.unregister("d1", a.conn_id);
        settle().await;

        assert_eq!(store.updates(), vec![("d1".to_string(), payload.to_string())]);
        let state = hub.state.lock();
        assert!(state.rooms.is_empty());
        assert!(state.cache.is_empty());
        assert!(state.dirty.is_empty());
        assert!(state.presence.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_with_survivors_broadcasts_presence() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store.clone(), Duration::from_secs(600));

        let mut a = join(&hub, "d1", "u1");
        let b = join(&hub, "d1", "u2");
        settle().await;
        for _ in 0..4 {
            recv(&mut a).await;
        }

        hub.handle.unregister("d1", b.conn_id);
        settle().await;

        let presence = recv(&mut a).await;
        assert_eq!(presence_users(&presence), vec!["u1"]);
        // room was not dirty, so no flush happened
        assert!(store.updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_document_closes_connections_without_saving() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store.clone(), Duration::from_secs(600));

        let mut a = join(&hub, "d1", "u1");
        settle().await;
        hub.handle
            .broadcast(update_from("u1", "d1", r#"{"ops":[{"insert":"x"}]}"#));
        settle().await;

        hub.handle.remove_document("d1");
        settle().await;

        // drain the join frames, then observe the closed queue
        while a.rx.try_recv().is_ok() {}
        assert!(a.rx.recv().await.is_none());

        // a dirty flag was set, but forced removal never flushes
        assert!(store.updates().is_empty());
        {
            let state = hub.state.lock();
            assert!(state.rooms.is_empty());
            assert!(state.dirty.is_empty());
        }

        // the read pump's eventual unregister finds nothing to do
        hub.handle.unregister("d1", a.conn_id);
        settle().await;
        assert!(store.updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn save_worker_writes_each_dirty_document_once() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store.clone(), Duration::from_secs(10));

        let _a = join(&hub, "d1", "u1");
        settle().await;

        let payload = r#"{"ops":[{"insert":"tick"}]}"#;
        hub.handle.broadcast(update_from("u1", "d1", payload));
        settle().await;

        sleep(Duration::from_secs(11)).await;
        assert_eq!(store.updates(), vec![("d1".to_string(), payload.to_string())]);

        // nothing changed; the next tick must not write again
        sleep(Duration::from_secs(10)).await;
        assert_eq!(store.updates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn save_worker_retries_after_a_failed_write() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        *store.fail_updates.lock() = 1;
        let hub = start_hub(store.clone(), Duration::from_secs(10));

        let _a = join(&hub, "d1", "u1");
        settle().await;
        hub.handle
            .broadcast(update_from("u1", "d1", r#"{"ops":[{"insert":"keep"}]}"#));
        settle().await;

        sleep(Duration::from_secs(11)).await;
        // the first write failed, so the flag must still be set
        assert!(store.updates().is_empty());
        assert!(hub.state.lock().dirty["d1"]);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(store.updates().len(), 1);
        assert!(!hub.state.lock().dirty["d1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn update_racing_a_save_keeps_the_dirty_flag() {
        let store = MemStore::gated("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store.clone(), Duration::from_secs(10));

        let _a = join(&hub, "d1", "u1");
        settle().await;

        let old = r#"{"ops":[{"insert":"old"}]}"#;
        let new = r#"{"ops":[{"insert":"new"}]}"#;
        hub.handle.broadcast(update_from("u1", "d1", old));
        settle().await;

        // first tick: the worker snapshots `old` and blocks inside the store
        sleep(Duration::from_secs(11)).await;

        // a newer update lands while the write is in flight
        hub.handle.broadcast(update_from("u1", "d1", new));
        settle().await;

        store.gate.as_ref().unwrap().notify_one();
        settle().await;

        // the write of `old` completed, but the cache moved on: still dirty
        assert_eq!(store.updates(), vec![("d1".to_string(), old.to_string())]);
        assert!(hub.state.lock().dirty["d1"]);

        // the next tick persists the newer content and only then cleans up
        sleep(Duration::from_secs(10)).await;
        store.gate.as_ref().unwrap().notify_one();
        settle().await;
        assert_eq!(
            store.updates(),
            vec![
                ("d1".to_string(), old.to_string()),
                ("d1".to_string(), new.to_string())
            ]
        );
        assert!(!hub.state.lock().dirty["d1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connection_is_evicted_and_the_room_keeps_flowing() {
        let store = MemStore::with_doc("d1", EMPTY_DELTA, "T");
        let hub = start_hub(store, Duration::from_secs(600));

        let mut a = join(&hub, "d1", "u1");
        let b = join(&hub, "d1", "u2"); // never drained
        settle().await;
        for _ in 0..4 {
            recv(&mut a).await;
        }

        // b's queue already holds its join frames; fill the rest and
        // overflow it
        for i in 0..OUTBOUND_CAPACITY + 1 {
            let payload = format!(r#"{{"ops":[{{"insert":"{i}"}}]}}"#);
            hub.handle.broadcast(update_from("u1", "d1", &payload));
        }
        settle().await;

        {
            let state = hub.state.lock();
            let room = &state.rooms["d1"];
            assert_eq!(room.len(), 1, "slow connection should have been evicted");
            assert!(!room.contains_key(&b.conn_id));
        }

        // the survivor still receives fanout afterwards
        let payload = r#"{"ops":[{"insert":"after"}]}"#;
        hub.handle.broadcast(update_from("u2", "d1", payload));
        settle().await;
        loop {
            let msg = recv(&mut a).await;
            if msg.kind == MessageType::Update && msg.payload.get() == payload {
                break;
            }
        }
    }
}
