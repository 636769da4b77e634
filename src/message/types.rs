//! Envelope types and boundary validation

use crate::message::error::{MessageError, MessageResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Wire value of the `type` field for presence announcements
pub const PRESENCE_TYPE: &str = "HELLO";

/// A data message relayed hop by hop toward `dest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Unique identifier, fixed at origination
    pub msgid: String,

    /// Destination node id, if the sender knew one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,

    /// Remaining hop budget
    pub ttl: i64,

    /// Every other envelope field, carried verbatim
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl DataMessage {
    /// Create a data message with an empty payload
    pub fn new(msgid: impl Into<String>, dest: Option<String>, ttl: i64) -> Self {
        Self {
            msgid: msgid.into(),
            dest,
            ttl,
            payload: Map::new(),
        }
    }

    /// Attach payload fields
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Copy of this message with the hop budget reduced by one
    ///
    /// Saturates at `i64::MIN`, so a spent budget never wraps around.
    pub fn decremented(&self) -> Self {
        let mut next = self.clone();
        next.ttl = next.ttl.saturating_sub(1);
        next
    }

    /// Flat JSON envelope as sent on the wire
    pub fn to_envelope(&self) -> Value {
        let mut obj = self.payload.clone();
        obj.insert("msgid".into(), Value::String(self.msgid.clone()));
        if let Some(dest) = &self.dest {
            obj.insert("dest".into(), Value::String(dest.clone()));
        }
        obj.insert("ttl".into(), Value::from(self.ttl));
        Value::Object(obj)
    }

    fn from_object(mut obj: Map<String, Value>, default_ttl: i64) -> MessageResult<Self> {
        let msgid = match obj.remove("msgid") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return Err(MessageError::MissingField("msgid")),
        };

        let dest = match obj.remove("dest") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };

        let ttl = obj
            .remove("ttl")
            .and_then(|v| v.as_i64())
            .unwrap_or(default_ttl);

        Ok(Self {
            msgid,
            dest,
            ttl,
            payload: obj,
        })
    }
}

/// A single-hop presence announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMessage {
    /// Announcing node
    pub node: String,

    /// Where the announcing node accepts messages, if it said
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Time declared by the origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PresenceMessage {
    pub fn new(node: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            address: Some(address.into()),
            version: None,
            timestamp: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Flat JSON envelope as sent on the wire
    pub fn to_envelope(&self) -> Value {
        let mut value = json!({
            "type": PRESENCE_TYPE,
            "node": self.node,
        });
        if let Some(address) = &self.address {
            value["address"] = Value::String(address.clone());
        }
        if let Some(version) = &self.version {
            value["version"] = Value::String(version.clone());
        }
        if let Some(ts) = &self.timestamp {
            value["timestamp"] = Value::String(ts.to_rfc3339());
        }
        value
    }

    fn from_object(mut obj: Map<String, Value>) -> MessageResult<Self> {
        let node = match obj.remove("node") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return Err(MessageError::MissingField("node")),
        };

        let address = match obj.remove("address") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };

        let version = match obj.remove("version") {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let timestamp = obj.remove("timestamp").as_ref().and_then(parse_timestamp);

        Ok(Self {
            node,
            address,
            version,
            timestamp,
        })
    }
}

/// A validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Presence(PresenceMessage),
    Data(DataMessage),
}

impl Message {
    /// Parse a raw request body
    ///
    /// `default_ttl` applies when a data message has no integer `ttl`.
    pub fn parse(body: &[u8], default_ttl: i64) -> MessageResult<Self> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value, default_ttl)
    }

    /// Validate an already-decoded JSON envelope
    pub fn from_value(value: Value, default_ttl: i64) -> MessageResult<Self> {
        let Value::Object(obj) = value else {
            return Err(MessageError::NotAnObject);
        };

        let is_presence = obj
            .get("type")
            .and_then(Value::as_str)
            .map(|t| t.eq_ignore_ascii_case(PRESENCE_TYPE))
            .unwrap_or(false);

        if is_presence {
            PresenceMessage::from_object(obj).map(Message::Presence)
        } else {
            DataMessage::from_object(obj, default_ttl).map(Message::Data)
        }
    }

    /// Message id, for data messages
    pub fn msgid(&self) -> Option<&str> {
        match self {
            Message::Data(m) => Some(&m.msgid),
            Message::Presence(_) => None,
        }
    }

    pub fn to_envelope(&self) -> Value {
        match self {
            Message::Presence(m) => m.to_envelope(),
            Message::Data(m) => m.to_envelope(),
        }
    }
}

/// Accepts RFC 3339 strings and unix seconds (integer or fractional)
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                Utc.timestamp_opt(secs, 0).single()
            } else {
                let f = n.as_f64()?;
                let secs = f.trunc() as i64;
                let nanos = ((f - f.trunc()) * 1e9) as u32;
                Utc.timestamp_opt(secs, nanos).single()
            }
        }
        _ => None,
    }
}
