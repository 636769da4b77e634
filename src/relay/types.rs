//! Relay types and configuration

use crate::message::MessageError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Version announced in presence messages and status output
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Relay-specific errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] MessageError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for a relay node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Unique identifier for this node
    pub node_id: String,

    /// Address the HTTP intake listens on
    pub listen_addr: SocketAddr,

    /// URL other nodes should use to reach this one
    pub advertise_url: String,

    /// Directory holding routes, seen ids, inbox and outbox; in-memory if unset
    pub state_dir: Option<PathBuf>,

    /// Where messages go when no route to their destination is known
    pub default_peer: Option<String>,

    /// Peers that receive presence announcements
    pub peers: Vec<PeerSpec>,

    /// Hop budget for messages that do not carry a usable `ttl`
    pub default_ttl: i64,

    /// How often the retry worker scans the outbox
    pub retry_interval: Duration,

    /// How often presence is announced
    pub presence_interval: Duration,

    /// Routes not refreshed within this window are dropped
    pub route_max_age: Duration,

    /// Per-send network timeout
    pub send_timeout: Duration,

    /// How long finished deliveries stay in the delivery index
    pub index_retention: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            advertise_url: "http://localhost:8080/".to_string(),
            state_dir: None,
            default_peer: None,
            peers: Vec::new(),
            default_ttl: 5,
            retry_interval: Duration::from_secs(15),
            presence_interval: Duration::from_secs(60),
            route_max_age: Duration::from_secs(900),
            send_timeout: Duration::from_secs(5),
            index_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl RelayConfig {
    /// Reject configurations the background loops cannot run with
    pub fn validate(&self) -> RelayResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(RelayError::InvalidConfig("node id is empty".into()));
        }
        if self.retry_interval.is_zero() || self.presence_interval.is_zero() {
            return Err(RelayError::InvalidConfig(
                "loop intervals must be non-zero".into(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(RelayError::InvalidConfig("send timeout must be non-zero".into()));
        }
        if self.route_max_age <= self.presence_interval {
            return Err(RelayError::InvalidConfig(format!(
                "route max age ({:?}) must exceed the presence interval ({:?})",
                self.route_max_age, self.presence_interval
            )));
        }
        if let Some(peer) = self.peers.iter().find(|p| p.node_id == self.node_id) {
            return Err(RelayError::InvalidConfig(format!(
                "peer {} has this node's own id",
                peer.url
            )));
        }
        Ok(())
    }
}

/// A configured neighbour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSpec {
    pub node_id: String,
    pub url: String,
}

impl PeerSpec {
    pub fn new(node_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            url: url.into(),
        }
    }
}

impl FromStr for PeerSpec {
    type Err = RelayError;

    /// `ID=URL`, or a bare URL whose host becomes the id
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((id, url)) = s.split_once('=') {
            let (id, url) = (id.trim(), url.trim());
            if id.is_empty() || url.is_empty() {
                return Err(RelayError::InvalidConfig(format!("bad peer spec: {s}")));
            }
            return Ok(PeerSpec::new(id, url));
        }

        let host = s
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(s)
            .split(['/', ':'])
            .next()
            .unwrap_or("");
        if host.is_empty() {
            return Err(RelayError::InvalidConfig(format!("bad peer spec: {s}")));
        }
        Ok(PeerSpec::new(host, s))
    }
}

/// Result of handing a message to the intake path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Taken in and kept here: presence applied, or addressed to this node
    Accepted,
    /// Already seen; nothing changed
    Duplicate,
    /// Stored, but out of hops
    Expired,
    /// Stored and staged for the next hop
    Forwarded,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Duplicate => "duplicate",
            Outcome::Expired => "expired",
            Outcome::Forwarded => "forwarded",
        }
    }
}

/// Statistics for a relay node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Data messages accepted for the first time
    pub messages_received: u64,

    /// Re-deliveries of already seen ids
    pub duplicates: u64,

    /// Messages that ran out of hops here
    pub expired: u64,

    /// Messages staged for the next hop
    pub forwarded: u64,

    /// Outbox records delivered
    pub delivered: u64,

    /// Outbox records abandoned
    pub failed: u64,

    /// Presence messages applied to the route table
    pub presence_received: u64,
}

impl RelayStats {
    /// Share of finished deliveries that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let total = self.delivered + self.failed;
        if total == 0 {
            return 100.0;
        }
        self.delivered as f64 / total as f64 * 100.0
    }
}

impl std::fmt::Display for RelayStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Relay: {} recv, {} dup, {} exp, {} fwd, {} delivered, {} failed ({:.1}% success)",
            self.messages_received,
            self.duplicates,
            self.expired,
            self.forwarded,
            self.delivered,
            self.failed,
            self.success_rate()
        )
    }
}
