//! Relay node implementation
//!
//! The relay node owns all durable state and is the intake path for
//! inbound messages: dedup, store, TTL check, then stage for the next hop.
//! Actual delivery happens later in the retry worker.

use crate::message::{DataMessage, Message, MessageError, PresenceMessage};
use crate::metrics;
use crate::relay::types::{
    Outcome, PeerSpec, RelayConfig, RelayResult, RelayStats, VERSION,
};
use crate::store::outbox::OutboxStats;
use crate::store::{
    DeliveryCounts, DeliveryIndex, DeliveryState, DeliveryStatus, MessageStore, OutboxQueue, RouteEntry,
    RouteStatus, RouteTable, SeenRegistry,
};
use crate::transport::PeerTransport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const SEEN_FILE: &str = "seen.json";
const ROUTES_FILE: &str = "routes.json";
const INDEX_FILE: &str = "index.json";
const INBOX_DIR: &str = "inbox";
const OUTBOX_DIR: &str = "outbox";

/// A store-and-forward relay node
pub struct RelayNode {
    /// Node configuration
    config: RelayConfig,

    seen: SeenRegistry,
    routes: RouteTable,
    inbox: MessageStore,
    outbox: OutboxQueue,
    index: DeliveryIndex,

    transport: Arc<dyn PeerTransport>,

    /// Node statistics
    stats: RelayStatsInner,

    /// Event sender for async operations
    event_tx: Option<mpsc::UnboundedSender<RelayEvent>>,
}

#[derive(Default)]
pub(crate) struct RelayStatsInner {
    messages_received: AtomicU64,
    duplicates: AtomicU64,
    expired: AtomicU64,
    forwarded: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) failed: AtomicU64,
    presence_received: AtomicU64,
}

/// Events emitted by the relay node
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Message staged in the outbox
    Staged { msgid: String },

    /// Outbox record delivered to the next hop
    Delivered { msgid: String, target: String },

    /// Outbox record abandoned
    Abandoned { msgid: String, reason: String },

    /// Route table entry written from a presence message
    RouteLearned { node_id: String, address: String },
}

/// Request to originate a message at this node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginateRequest {
    #[serde(default)]
    pub msgid: Option<String>,
    #[serde(default)]
    pub dest: Option<String>,
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// Point-in-time view of a node for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub version: String,
    pub routes: Vec<RouteView>,
    pub seen: usize,
    pub inbox: usize,
    pub outbox: OutboxStats,
    pub deliveries: DeliveryCounts,
    pub stats: RelayStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteView {
    pub node_id: String,
    #[serde(flatten)]
    pub entry: RouteEntry,
}

impl RelayNode {
    /// Create a relay node, opening its state directory if one is configured
    pub fn new(config: RelayConfig, transport: Arc<dyn PeerTransport>) -> RelayResult<Self> {
        config.validate()?;

        let (seen, routes, inbox, outbox, index) = match config.state_dir {
            Some(ref dir) => {
                std::fs::create_dir_all(dir).map_err(crate::store::StoreError::from)?;
                (
                    SeenRegistry::open(dir.join(SEEN_FILE)),
                    RouteTable::open(dir.join(ROUTES_FILE)),
                    MessageStore::open(dir.join(INBOX_DIR))?,
                    OutboxQueue::open(dir.join(OUTBOX_DIR))?,
                    DeliveryIndex::open(dir.join(INDEX_FILE)),
                )
            }
            None => (
                SeenRegistry::new_in_memory(),
                RouteTable::new_in_memory(),
                MessageStore::new_in_memory(),
                OutboxQueue::new_in_memory(),
                DeliveryIndex::new_in_memory(),
            ),
        };

        tracing::info!(
            "Relay node {} ready: {} seen, {} routes, {} stored, {} pending",
            config.node_id,
            seen.len(),
            routes.len(),
            inbox.len(),
            outbox.len()
        );

        Ok(Self {
            config,
            seen,
            routes,
            inbox,
            outbox,
            index,
            transport,
            stats: RelayStatsInner::default(),
            event_tx: None,
        })
    }

    /// Create with an event channel for monitoring and worker wake-ups
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RelayEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Get the node ID
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn seen(&self) -> &SeenRegistry {
        &self.seen
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn inbox(&self) -> &MessageStore {
        &self.inbox
    }

    pub fn outbox(&self) -> &OutboxQueue {
        &self.outbox
    }

    pub fn index(&self) -> &DeliveryIndex {
        &self.index
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub(crate) fn counters(&self) -> &RelayStatsInner {
        &self.stats
    }

    /// Take in one inbound message
    ///
    /// `sender_hint` is the address the transport saw the message come
    /// from; it stands in for a presence message's missing `address`.
    pub fn accept(&self, message: Message, sender_hint: Option<&str>) -> RelayResult<Outcome> {
        match message {
            Message::Presence(presence) => self.accept_presence(presence, sender_hint),
            Message::Data(data) => self.accept_data(data),
        }
    }

    /// Presence updates the route table and goes no further
    fn accept_presence(
        &self,
        presence: PresenceMessage,
        sender_hint: Option<&str>,
    ) -> RelayResult<Outcome> {
        let address = presence
            .address
            .or_else(|| sender_hint.filter(|h| !h.is_empty()).map(str::to_string))
            .ok_or_else(|| MessageError::NoAddress(presence.node.clone()))?;

        if presence.node == self.config.node_id {
            tracing::debug!("Ignoring presence carrying our own id from {}", address);
            return Ok(Outcome::Accepted);
        }

        let entry = RouteEntry {
            address: address.clone(),
            updated: Utc::now(),
            status: RouteStatus::Online,
            version: presence.version,
            announced: presence.timestamp,
        };
        self.routes.upsert_entry(&presence.node, entry)?;

        self.stats.presence_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_intake(Outcome::Accepted, true);
        metrics::set_routes_known(self.routes.len());
        tracing::info!("Route learned: {} -> {}", presence.node, address);

        self.emit_event(RelayEvent::RouteLearned {
            node_id: presence.node,
            address,
        });

        Ok(Outcome::Accepted)
    }

    fn accept_data(&self, message: DataMessage) -> RelayResult<Outcome> {
        let msgid = message.msgid.clone();

        if !self.seen.add(&msgid)? {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            metrics::record_intake(Outcome::Duplicate, false);
            tracing::debug!("Duplicate {} ignored", msgid);
            return Ok(Outcome::Duplicate);
        }

        if let Err(e) = self.inbox.save(&message) {
            self.revoke_seen(&msgid);
            return Err(e.into());
        }
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        if message.dest.as_deref() == Some(self.config.node_id.as_str()) {
            metrics::record_intake(Outcome::Accepted, false);
            tracing::info!("Message {} delivered to this node", msgid);
            return Ok(Outcome::Accepted);
        }

        if message.ttl <= 0 {
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            metrics::record_intake(Outcome::Expired, false);
            tracing::info!("Message {} stored, TTL exhausted", msgid);
            return Ok(Outcome::Expired);
        }

        if let Err(e) = self.stage(message.decremented()) {
            self.revoke_seen(&msgid);
            return Err(e);
        }

        metrics::record_intake(Outcome::Forwarded, false);
        Ok(Outcome::Forwarded)
    }

    /// Originate a message at this node
    ///
    /// The message is marked seen so its echoes come back as duplicates,
    /// stored, and staged with its TTL intact: it has not made a hop yet.
    pub fn originate(&self, request: OriginateRequest) -> RelayResult<(String, Outcome)> {
        let msgid = match request.msgid {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            Some(_) => return Err(MessageError::MissingField("msgid").into()),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let dest = request.dest.filter(|d| !d.trim().is_empty());
        let ttl = request.ttl.unwrap_or(self.config.default_ttl);
        let message = DataMessage::new(msgid.clone(), dest, ttl).with_payload(request.payload);

        if !self.seen.add(&msgid)? {
            return Ok((msgid, Outcome::Duplicate));
        }

        if let Err(e) = self.inbox.save(&message) {
            self.revoke_seen(&msgid);
            return Err(e.into());
        }

        if message.dest.as_deref() == Some(self.config.node_id.as_str()) {
            return Ok((msgid, Outcome::Accepted));
        }

        if message.ttl <= 0 {
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            return Ok((msgid, Outcome::Expired));
        }

        if let Err(e) = self.stage(message) {
            self.revoke_seen(&msgid);
            return Err(e);
        }

        Ok((msgid, Outcome::Forwarded))
    }

    /// Put a message in the outbox for the retry worker
    fn stage(&self, message: DataMessage) -> RelayResult<()> {
        let now = Utc::now();
        let msgid = message.msgid.clone();
        let target = self.resolve_target(message.dest.as_deref());

        self.outbox.stage(message, now)?;
        if let Err(e) = self.index.mark(&msgid, DeliveryState::New, 0, "", now) {
            tracing::warn!("Failed to index {}: {}", msgid, e);
        }

        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        metrics::set_outbox_pending(self.outbox.len());
        tracing::info!(
            "Staged {} for {}",
            msgid,
            target.as_deref().unwrap_or("<no route>")
        );

        self.emit_event(RelayEvent::Staged { msgid });
        Ok(())
    }

    /// Next-hop URL for `dest`: known route, else the default peer
    pub fn resolve_target(&self, dest: Option<&str>) -> Option<String> {
        dest.and_then(|d| self.routes.lookup(d))
            .or_else(|| self.config.default_peer.clone())
    }

    fn revoke_seen(&self, msgid: &str) {
        if let Err(e) = self.seen.revoke(msgid) {
            tracing::warn!("Failed to revoke seen id {}: {}", msgid, e);
        }
    }

    /// Delivery state of a message staged at this node
    pub fn delivery_status(&self, msgid: &str) -> Option<DeliveryStatus> {
        self.index.get(msgid)
    }

    /// Get current statistics
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            duplicates: self.stats.duplicates.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            forwarded: self.stats.forwarded.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            presence_received: self.stats.presence_received.load(Ordering::Relaxed),
        }
    }

    /// Stored messages addressed to this node
    pub fn local_messages(&self) -> Vec<DataMessage> {
        self.inbox.for_destination(&self.config.node_id)
    }

    pub fn status(&self, now: DateTime<Utc>) -> NodeStatus {
        NodeStatus {
            node_id: self.config.node_id.clone(),
            version: VERSION.to_string(),
            routes: self
                .routes
                .snapshot()
                .into_iter()
                .map(|(node_id, entry)| RouteView { node_id, entry })
                .collect(),
            seen: self.seen.len(),
            inbox: self.inbox.len(),
            outbox: self.outbox.stats(now),
            deliveries: self.index.counts(),
            stats: self.stats(),
        }
    }

    /// Emit an event if there's a listener
    pub(crate) fn emit_event(&self, event: RelayEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Builder for relay nodes
pub struct RelayNodeBuilder {
    config: RelayConfig,
}

impl RelayNodeBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = id.into();
        self
    }

    pub fn advertise_url(mut self, url: impl Into<String>) -> Self {
        self.config.advertise_url = url.into();
        self
    }

    pub fn state_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.state_dir = Some(dir.into());
        self
    }

    pub fn default_peer(mut self, url: impl Into<String>) -> Self {
        self.config.default_peer = Some(url.into());
        self
    }

    pub fn add_peer(mut self, peer: PeerSpec) -> Self {
        self.config.peers.push(peer);
        self
    }

    pub fn default_ttl(mut self, ttl: i64) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn build(self, transport: Arc<dyn PeerTransport>) -> RelayResult<RelayNode> {
        RelayNode::new(self.config, transport)
    }
}

impl Default for RelayNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayError;
    use crate::transport::ScriptedTransport;

    fn create_test_node() -> RelayNode {
        RelayNodeBuilder::new()
            .node_id("A")
            .advertise_url("http://a:8080/")
            .default_peer("http://hub:8080/")
            .build(Arc::new(ScriptedTransport::new()))
            .unwrap()
    }

    fn data(body: &str) -> Message {
        Message::parse(body.as_bytes(), 5).unwrap()
    }

    #[test]
    fn test_forwarded_message_is_staged_with_decremented_ttl() {
        let node = create_test_node();

        let outcome = node
            .accept(data(r#"{"msgid":"m1","dest":"B","ttl":2}"#), None)
            .unwrap();
        assert_eq!(outcome, Outcome::Forwarded);

        let record = node.outbox().get("m1").unwrap();
        assert_eq!(record.attempts, 0);
        assert_eq!(record.message.ttl, 1);
        assert_eq!(node.inbox().get("m1").unwrap().ttl, 2);
        assert_eq!(
            node.delivery_status("m1").unwrap().state,
            DeliveryState::New
        );
    }

    #[test]
    fn test_duplicate_changes_nothing() {
        let node = create_test_node();
        node.accept(data(r#"{"msgid":"m1","dest":"B","ttl":2}"#), None)
            .unwrap();

        let outcome = node
            .accept(data(r#"{"msgid":"m1","dest":"B","ttl":9,"x":1}"#), None)
            .unwrap();
        assert_eq!(outcome, Outcome::Duplicate);
        assert_eq!(node.seen().len(), 1);
        assert_eq!(node.outbox().len(), 1);
        assert_eq!(node.inbox().get("m1").unwrap().ttl, 2);
        assert_eq!(node.stats().duplicates, 1);
    }

    #[test]
    fn test_zero_ttl_is_stored_but_not_staged() {
        let node = create_test_node();
        for (id, ttl) in [("m0", 0), ("mneg", -3)] {
            let body = format!(r#"{{"msgid":"{id}","dest":"B","ttl":{ttl}}}"#);
            assert_eq!(node.accept(data(&body), None).unwrap(), Outcome::Expired);
            assert!(node.inbox().contains(id));
            assert!(node.outbox().get(id).is_none());
        }
        assert_eq!(node.stats().expired, 2);
    }

    #[test]
    fn test_minimum_ttl_expires_without_wrapping() {
        let node = create_test_node();
        let body = format!(r#"{{"msgid":"m1","dest":"B","ttl":{}}}"#, i64::MIN);
        let message = data(&body);
        assert!(matches!(message, Message::Data(ref m) if m.ttl == i64::MIN));

        assert_eq!(node.accept(message, None).unwrap(), Outcome::Expired);
        assert!(node.outbox().is_empty());
        assert!(node.inbox().contains("m1"));
    }

    #[test]
    fn test_message_for_this_node_is_not_forwarded() {
        let node = create_test_node();
        let outcome = node
            .accept(data(r#"{"msgid":"m1","dest":"A","ttl":0}"#), None)
            .unwrap();
        assert_eq!(outcome, Outcome::Accepted);
        assert!(node.inbox().contains("m1"));
        assert!(node.outbox().is_empty());
    }

    #[test]
    fn test_presence_updates_route_and_is_not_queued() {
        let node = create_test_node();
        let msg = data(r#"{"type":"HELLO","node":"B","address":"http://b:8080"}"#);

        assert_eq!(node.accept(msg, None).unwrap(), Outcome::Accepted);
        assert_eq!(node.routes().lookup("B").as_deref(), Some("http://b:8080"));
        assert_eq!(node.routes().get("B").unwrap().status, RouteStatus::Online);
        assert!(node.outbox().is_empty());
        assert!(node.seen().is_empty());
    }

    #[test]
    fn test_presence_uses_sender_hint() {
        let node = create_test_node();
        let msg = data(r#"{"type":"HELLO","node":"C"}"#);
        node.accept(msg.clone(), Some("http://10.0.0.3:8080")).unwrap();
        assert_eq!(
            node.routes().lookup("C").as_deref(),
            Some("http://10.0.0.3:8080")
        );

        let err = node.accept(msg, None).unwrap_err();
        assert!(matches!(err, RelayError::Malformed(MessageError::NoAddress(_))));
    }

    #[test]
    fn test_resolve_target_prefers_route() {
        let node = create_test_node();
        assert_eq!(
            node.resolve_target(Some("B")).as_deref(),
            Some("http://hub:8080/")
        );
        assert_eq!(node.resolve_target(None).as_deref(), Some("http://hub:8080/"));

        node.routes()
            .upsert("B", "http://b:8080/", Utc::now(), RouteStatus::Online)
            .unwrap();
        assert_eq!(
            node.resolve_target(Some("B")).as_deref(),
            Some("http://b:8080/")
        );
    }

    #[test]
    fn test_originate() {
        let node = create_test_node();

        let (msgid, outcome) = node
            .originate(OriginateRequest {
                dest: Some("B".into()),
                ttl: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Forwarded);
        assert_eq!(node.outbox().get(&msgid).unwrap().message.ttl, 3);

        // The echo of our own message is a duplicate
        let echo = format!(r#"{{"msgid":"{msgid}","dest":"B","ttl":2}}"#);
        assert_eq!(node.accept(data(&echo), None).unwrap(), Outcome::Duplicate);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let node = create_test_node().with_events(tx);

        node.accept(data(r#"{"msgid":"m1","dest":"B","ttl":2}"#), None)
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            RelayEvent::Staged { msgid: "m1".into() }
        );
    }

    #[test]
    fn test_status_snapshot() {
        let node = create_test_node();
        node.accept(data(r#"{"msgid":"m1","dest":"B","ttl":2}"#), None)
            .unwrap();
        node.accept(
            data(r#"{"type":"HELLO","node":"B","address":"http://b:8080"}"#),
            None,
        )
        .unwrap();

        let status = node.status(Utc::now());
        assert_eq!(status.node_id, "A");
        assert_eq!(status.seen, 1);
        assert_eq!(status.inbox, 1);
        assert_eq!(status.outbox.pending, 1);
        assert_eq!(status.routes.len(), 1);
        assert_eq!(status.stats.presence_received, 1);
        assert_eq!(status.deliveries.new, 1);
        assert_eq!(status.deliveries.sent, 0);
    }

    #[test]
    fn test_local_messages_only_lists_own_destination() {
        let node = create_test_node();
        node.accept(data(r#"{"msgid":"m2","dest":"A","ttl":1}"#), None)
            .unwrap();
        node.accept(data(r#"{"msgid":"m1","dest":"A","ttl":1}"#), None)
            .unwrap();
        node.accept(data(r#"{"msgid":"m3","dest":"B","ttl":1}"#), None)
            .unwrap();

        let ids: Vec<String> = node
            .local_messages()
            .into_iter()
            .map(|m| m.msgid)
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }
}
