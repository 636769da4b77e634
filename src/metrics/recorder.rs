//! Metrics recorder for relay operations
//!
//! Records intake, delivery and presence activity. Without an installed
//! recorder every call is a no-op.

use crate::relay::Outcome;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    describe_counter!(
        "rfmail_messages_received_total",
        "Inbound messages by intake outcome"
    );
    describe_counter!(
        "rfmail_deliveries_total",
        "Outbox delivery attempts by result"
    );
    describe_counter!(
        "rfmail_presence_sent_total",
        "Presence announcements sent by result"
    );

    describe_gauge!("rfmail_outbox_pending", "Records waiting in the outbox");
    describe_gauge!("rfmail_routes_known", "Entries in the route table");
}

/// How a delivery attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Sent,
    Retry,
    Failed,
}

impl DeliveryResult {
    fn as_str(&self) -> &'static str {
        match self {
            DeliveryResult::Sent => "sent",
            DeliveryResult::Retry => "retry",
            DeliveryResult::Failed => "failed",
        }
    }
}

// ============== Intake ==============

/// Record one inbound message
pub fn record_intake(outcome: Outcome, presence: bool) {
    let kind = if presence { "presence" } else { "data" };
    counter!("rfmail_messages_received_total", "outcome" => outcome.as_str(), "kind" => kind)
        .increment(1);
}

// ============== Delivery ==============

/// Record the end of one delivery attempt
pub fn record_delivery(result: DeliveryResult) {
    counter!("rfmail_deliveries_total", "result" => result.as_str()).increment(1);
}

/// Record one presence announcement
pub fn record_presence(online: bool) {
    let result = if online { "online" } else { "offline" };
    counter!("rfmail_presence_sent_total", "result" => result).increment(1);
}

// ============== Gauges ==============

pub fn set_outbox_pending(depth: usize) {
    gauge!("rfmail_outbox_pending").set(depth as f64);
}

pub fn set_routes_known(count: usize) {
    gauge!("rfmail_routes_known").set(count as f64);
}
