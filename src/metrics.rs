use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, register_counter, register_gauge};


lazy_static! {
    pub static ref CONNECTIONS_TOTAL: Counter =
        register_counter!("visitor_connections_total", "Total WebSocket connections accepted").unwrap();
    pub static ref ACTIVE_CONNECTIONS: Gauge =
        register_gauge!("visitor_active_connections", "Currently connected clients").unwrap();
    pub static ref VISITS_RECORDED: Counter =
        register_counter!("visitor_visits_recorded_total", "Visits written to the visitor log").unwrap();
    pub static ref SLOT_OVERWRITES: Counter =
        register_counter!("visitor_slot_overwrites_total", "Visits that replaced an older slot").unwrap();
    pub static ref COUNTER_INCREMENTS: Counter =
        register_counter!("visitor_counter_increments_total", "Shared counter increments").unwrap();
    pub static ref REJECTED_MESSAGES: Counter =
        register_counter!("visitor_rejected_messages_total", "Malformed or unknown client messages").unwrap();
    pub static ref STORE_ERRORS: Counter =
        register_counter!("visitor_store_errors_total", "Record store failures").unwrap();
}
