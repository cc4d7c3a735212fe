//! Fan-out of server messages to connected clients.
//!
//! Every session owns a bounded queue that its socket writer drains. Sending
//! never waits: a client whose queue is full or closed simply misses the
//! message.

use chrono::{DateTime, Utc};
use chrono_tz::Europe::Berlin;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::COUNTER_INCREMENTS;
use crate::models::{MessageType, ServerMessage};

/// Server clock reading as a German locale time string, e.g. `14:05:09`.
pub fn clock_reading(now: DateTime<Utc>) -> String {
    now.with_timezone(&Berlin).format("%H:%M:%S").to_string()
}

pub struct BroadcastHub {
    clients: DashMap<String, mpsc::Sender<String>>,
    queue_size: usize,
    // Held while broadcasting so clients see values in increment order
    counter: Mutex<i64>,
}

impl BroadcastHub {
    pub fn new(queue_size: usize) -> Self {
        Self {
            clients: DashMap::new(),
            queue_size: queue_size.max(1),
            counter: Mutex::new(0),
        }
    }

    /// Register a session and hand back the receiving end of its queue.
    pub fn register(&self, session_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.queue_size);
        self.clients.insert(session_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        self.clients.remove(session_id);
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Push one message to every connected client. Returns how many accepted it.
    pub fn broadcast_all(&self, kind: MessageType, payload: impl Serialize) -> usize {
        let Some(json) = encode(kind, payload) else {
            return 0;
        };
        let mut delivered = 0;
        for client in self.clients.iter() {
            if push(client.key(), client.value(), json.clone()) {
                delivered += 1;
            }
        }
        debug!(kind = kind.tag(), delivered, "broadcast");
        delivered
    }

    /// Push one message to a single client.
    pub fn send_one(&self, session_id: &str, kind: MessageType, payload: impl Serialize) -> bool {
        let Some(json) = encode(kind, payload) else {
            return false;
        };
        match self.clients.get(session_id) {
            Some(tx) => push(session_id, tx.value(), json),
            None => false,
        }
    }

    pub fn counter(&self) -> i64 {
        *self.counter.lock()
    }

    /// Bump the shared counter and tell everyone the new value.
    pub fn increment_counter(&self) -> i64 {
        let mut counter = self.counter.lock();
        *counter = counter.wrapping_add(1);
        COUNTER_INCREMENTS.inc();
        self.broadcast_all(MessageType::GlobalCounter, *counter);
        *counter
    }
}

fn encode(kind: MessageType, payload: impl Serialize) -> Option<String> {
    match ServerMessage::new(kind, payload).and_then(|msg| serde_json::to_string(&msg)) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(kind = kind.tag(), error = %e, "failed to serialize message");
            None
        }
    }
}

fn push(session_id: &str, tx: &mpsc::Sender<String>, json: String) -> bool {
    match tx.try_send(json) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(msg)) => {
            warn!(session_id, msg_len = msg.len(), "send queue full, dropping message");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
