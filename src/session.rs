use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::hub::{BroadcastHub, clock_reading};
use crate::metrics::{REJECTED_MESSAGES, STORE_ERRORS};
use crate::models::{ClientMessage, MessageType};
use crate::visit_log::VisitLog;

// Per-connection lifecycle: connect, client requests, disconnect
#[derive(Clone)]
pub struct SessionTracker {
    log: Arc<VisitLog>,
    hub: Arc<BroadcastHub>,
}

impl SessionTracker {
    pub fn new(log: Arc<VisitLog>, hub: Arc<BroadcastHub>) -> Self {
        Self { log, hub }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    // Record the visit, refresh everyone's visitor list, then greet the
    // newcomer with the current counter. Returns the session's outbound queue.
    pub async fn on_connect(&self, session_id: &str, address: &str) -> mpsc::Receiver<String> {
        let rx = self.hub.register(session_id);
        let arrived_at = Utc::now();
        info!(session_id, ip = address, %arrived_at, "client connected");

        match self.log.record_visit(session_id, address, arrived_at).await {
            Ok(visit) => info!(session_id, slot = visit.slot, overwrote = visit.overwrote, "visit recorded"),
            Err(e) => {
                STORE_ERRORS.inc();
                error!(session_id, error = %e, "failed to record visit");
            }
        }

        self.broadcast_visitors().await;
        self.hub
            .send_one(session_id, MessageType::GlobalCounter, self.hub.counter());
        rx
    }

    // Stamp the departure and refresh everyone's visitor list.
    // Store failures are logged and swallowed; the socket is gone either way.
    pub async fn on_disconnect(&self, session_id: &str) {
        self.hub.unregister(session_id);
        let departed_at = Utc::now();

        if let Err(e) = self.stamp_departure(session_id, departed_at).await {
            STORE_ERRORS.inc();
            error!(session_id, error = %e, "failed to record departure");
        }

        self.broadcast_visitors().await;
    }

    // Dispatch one text frame from a client. Returns false when the frame
    // was rejected; the connection stays open and nothing is sent back.
    pub fn handle_message(&self, session_id: &str, raw: &str) -> bool {
        let message: ClientMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                REJECTED_MESSAGES.inc();
                error!(session_id, error = %e, "malformed client message");
                return false;
            }
        };

        match MessageType::from_tag(message.kind) {
            Some(MessageType::Time) => {
                self.hub
                    .send_one(session_id, MessageType::Time, clock_reading(Utc::now()));
                true
            }
            Some(MessageType::GlobalCounter) => {
                let value = self.hub.increment_counter();
                info!(session_id, value, "counter incremented");
                true
            }
            Some(MessageType::IpAddresses) | None => {
                REJECTED_MESSAGES.inc();
                error!(session_id, kind = message.kind, "unrecognized message type");
                false
            }
        }
    }

    // The `end IS NULL` guard lives in the store's update, so a rotation
    // racing this call can never get its new entry stamped.
    async fn stamp_departure(&self, session_id: &str, departed_at: DateTime<Utc>) -> Result<bool> {
        let store = self.log.store();
        if store.mark_departed(session_id, departed_at).await? {
            info!(session_id, %departed_at, "client disconnected");
            return Ok(true);
        }
        match store.find_by_session(session_id).await? {
            Some(entry) => info!(session_id, slot = entry.slot_id, "client disconnected, departure already stamped"),
            None => info!(session_id, "client disconnected, slot already reused"),
        }
        Ok(false)
    }

    async fn broadcast_visitors(&self) {
        match self.log.store().list_all().await {
            Ok(entries) => {
                self.hub.broadcast_all(MessageType::IpAddresses, &entries);
            }
            Err(e) => {
                STORE_ERRORS.inc();
                warn!(error = %e, "failed to load visitor list");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::VisitorEntry;
    use crate::store::{MemoryStore, RecordStore};
    use async_trait::async_trait;
    use serde_json::Value;

    fn tracker(capacity: u64) -> SessionTracker {
        let log = Arc::new(VisitLog::new(Arc::new(MemoryStore::new()), capacity));
        SessionTracker::new(log, Arc::new(BroadcastHub::new(64)))
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn connect_broadcasts_list_then_counter() {
        let t = tracker(10);
        let mut rx = t.on_connect("s1", "1.2.3.4").await;

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["type"], 2);
        let list = msgs[0]["data"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["ipId"], 0);
        assert_eq!(list[0]["ip"], "1.2.3.X");
        assert_eq!(list[0]["end"], Value::Null);
        assert_eq!(msgs[1], serde_json::json!({"type": 1, "data": 0}));
    }

    #[tokio::test]
    async fn counter_scenario_and_departure() {
        let t = tracker(10);
        let mut a = t.on_connect("a", "1.2.3.4").await;
        let mut b = t.on_connect("b", "5.6.7.8").await;
        drain(&mut a);
        drain(&mut b);

        assert!(t.handle_message("a", r#"{"type":1,"data":null}"#));
        assert!(t.handle_message("a", r#"{"type":1}"#));
        for rx in [&mut a, &mut b] {
            let values: Vec<Value> = drain(rx).into_iter().map(|m| m["data"].clone()).collect();
            assert_eq!(values, vec![Value::from(1), Value::from(2)]);
        }

        t.on_disconnect("a").await;
        let msgs = drain(&mut b);
        assert_eq!(msgs.len(), 1);
        let list = msgs[0]["data"].as_array().unwrap();
        assert!(list[0]["end"].is_string());
        assert_eq!(list[1]["end"], Value::Null);
    }

    #[tokio::test]
    async fn time_request_answers_only_the_sender() {
        let t = tracker(10);
        let mut a = t.on_connect("a", "1.2.3.4").await;
        let mut b = t.on_connect("b", "5.6.7.8").await;
        drain(&mut a);
        drain(&mut b);

        assert!(t.handle_message("a", r#"{"type":0}"#));
        let msgs = drain(&mut a);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], 0);
        assert_eq!(msgs[0]["data"].as_str().unwrap().len(), 8);
        assert!(drain(&mut b).is_empty());
    }

    #[tokio::test]
    async fn bad_messages_get_no_reply() {
        let t = tracker(10);
        let mut a = t.on_connect("a", "1.2.3.4").await;
        drain(&mut a);

        assert!(!t.handle_message("a", r#"{"type":9}"#));
        assert!(!t.handle_message("a", r#"{"type":2}"#));
        assert!(!t.handle_message("a", "not json"));
        assert!(drain(&mut a).is_empty());
        assert_eq!(t.hub().counter(), 0);
    }

    #[tokio::test]
    async fn disconnect_after_rotation_leaves_others_alone() {
        let t = tracker(2);
        let mut keep = Vec::new();
        for id in ["s0", "s1", "s2"] {
            keep.push(t.on_connect(id, "10.0.0.1").await);
        }
        // s2 took slot 0 from s0
        let before = t.log.store().list_all().await.unwrap();
        t.on_disconnect("s0").await;
        let after = t.log.store().list_all().await.unwrap();
        assert_eq!(before, after);
        assert!(after.iter().all(|e| e.departed_at.is_none()));
    }

    #[tokio::test]
    async fn departure_is_stamped_only_while_the_slot_is_ours() {
        let t = tracker(1);
        let _a = t.on_connect("a", "10.0.0.1").await;
        let first = Utc::now();
        assert!(t.stamp_departure("a", first).await.unwrap());
        // second stamp for the same session changes nothing
        assert!(!t.stamp_departure("a", Utc::now()).await.unwrap());
        let entry = t.log.store().find_by_session("a").await.unwrap().unwrap();
        assert_eq!(entry.departed_at.map(|at| at.timestamp_millis()), Some(first.timestamp_millis()));

        // rotation hands the only slot to b; a late stamp for a must miss it
        let _b = t.on_connect("b", "10.0.0.2").await;
        assert!(!t.stamp_departure("a", Utc::now()).await.unwrap());
        let slot0 = &t.log.store().list_all().await.unwrap()[0];
        assert_eq!(slot0.session_id, "b");
        assert!(slot0.departed_at.is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn upsert(&self, _: VisitorEntry) -> Result<()> {
            Err(StoreError::CorruptRow { slot: 0, reason: "offline".into() })
        }
        async fn find_by_session(&self, _: &str) -> Result<Option<VisitorEntry>> {
            Err(StoreError::CorruptRow { slot: 0, reason: "offline".into() })
        }
        async fn list_all(&self) -> Result<Vec<VisitorEntry>> {
            Ok(Vec::new())
        }
        async fn mark_departed(&self, _: &str, _: DateTime<Utc>) -> Result<bool> {
            Err(StoreError::CorruptRow { slot: 0, reason: "offline".into() })
        }
        async fn count(&self) -> Result<u64> {
            Ok(0)
        }
        async fn truncate(&self, _: u64) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn store_failures_do_not_break_the_session() {
        let log = Arc::new(VisitLog::new(Arc::new(BrokenStore), 10));
        let t = SessionTracker::new(log, Arc::new(BroadcastHub::new(8)));
        let mut a = t.on_connect("a", "1.2.3.4").await;
        let mut b = t.on_connect("b", "1.2.3.5").await;
        drain(&mut a);
        drain(&mut b);

        t.on_disconnect("a").await;
        assert_eq!(t.hub().connection_count(), 1);
        let msgs = drain(&mut b);
        assert_eq!(msgs[0], serde_json::json!({"type": 2, "data": []}));
    }
}
