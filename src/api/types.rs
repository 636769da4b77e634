use crate::relay::Outcome;
use crate::store::{DeliveryState, DeliveryStatus, OutboxRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reply to an inbound envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeResponse {
    /// `saved`, `duplicate`, `expired` or `ack`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msgid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<bool>,
}

impl IntakeResponse {
    /// Presence acknowledgement
    pub fn ack() -> Self {
        Self {
            status: "ack".to_string(),
            msgid: None,
            forwarded: None,
        }
    }

    /// Reply for a data message
    pub fn for_data(msgid: String, outcome: Outcome) -> Self {
        let status = match outcome {
            Outcome::Accepted | Outcome::Forwarded => "saved",
            Outcome::Duplicate => "duplicate",
            Outcome::Expired => "expired",
        };
        Self {
            status: status.to_string(),
            msgid: Some(msgid),
            forwarded: Some(outcome == Outcome::Forwarded),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub status: String,
    pub msgid: String,
    pub outcome: Outcome,
}

/// Delivery state of one message, with retry schedule while still queued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResponse {
    pub msgid: String,
    pub state: DeliveryState,
    pub attempts: u32,
    pub last_error: String,
    pub updated: DateTime<Utc>,
    /// Unix seconds of the next attempt, while the record is queued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_at: Option<i64>,
}

impl DeliveryResponse {
    pub fn new(msgid: &str, status: DeliveryStatus, queued: Option<OutboxRecord>) -> Self {
        Self {
            msgid: msgid.to_string(),
            state: status.state,
            attempts: status.attempts,
            last_error: status.last_error,
            updated: status.updated,
            next_at: queued.map(|r| r.next_at),
        }
    }
}
