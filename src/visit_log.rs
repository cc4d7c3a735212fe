use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::{SLOT_OVERWRITES, VISITS_RECORDED};
use crate::models::VisitorEntry;
use crate::store::RecordStore;

const MASK: char = 'X';

// Replace the last character of an address with the mask.
// An empty address has nothing to hide and is returned as-is.
pub fn mask_address(address: &str) -> String {
    let mut chars = address.chars();
    if chars.next_back().is_none() {
        return String::new();
    }
    let mut masked = chars.as_str().to_string();
    masked.push(MASK);
    masked
}

// Where a visit ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedVisit {
    pub slot: u64,
    pub overwrote: bool,
}

// Fixed-size ring of visitor entries. Slot = visit number mod capacity.
pub struct VisitLog {
    store: Arc<dyn RecordStore>,
    capacity: u64,
    // Held across the store write so slot choice and write are one step
    total_visits: Mutex<u64>,
}

impl VisitLog {
    pub fn new(store: Arc<dyn RecordStore>, capacity: u64) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            total_visits: Mutex::new(0),
        }
    }

    // Continue from whatever the store already holds. Slots left over from a
    // larger capacity are dropped first.
    pub async fn restore(&self) -> Result<u64> {
        let mut total = self.total_visits.lock().await;
        let dropped = self.store.truncate(self.capacity).await?;
        if dropped > 0 {
            warn!(dropped, capacity = self.capacity, "dropped slots beyond capacity");
        }
        let stored = self.store.count().await?;
        *total = stored;
        info!(stored, capacity = self.capacity, "visit log restored");
        Ok(stored)
    }

    pub async fn record_visit(
        &self,
        session_id: &str,
        address: &str,
        arrived_at: DateTime<Utc>,
    ) -> Result<RecordedVisit> {
        let mut total = self.total_visits.lock().await;

        let slot = *total % self.capacity;
        let overwrote = *total >= self.capacity;
        let entry = VisitorEntry {
            slot_id: slot,
            session_id: session_id.to_string(),
            masked_address: mask_address(address),
            arrived_at,
            departed_at: None,
        };
        debug!(session_id, slot, overwrote, "recording visit");
        self.store.upsert(entry).await?;

        *total = total.wrapping_add(1);
        VISITS_RECORDED.inc();
        if overwrote {
            SLOT_OVERWRITES.inc();
        }
        Ok(RecordedVisit { slot, overwrote })
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}
