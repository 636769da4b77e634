//! Presence broadcaster
//!
//! Announces this node to every configured peer and records how each
//! announcement went in the route table. Peers that do not answer are kept
//! as offline; only expiry removes routes.

use crate::message::PresenceMessage;
use crate::metrics;
use crate::relay::{RelayNode, VERSION};
use crate::store::{RouteEntry, RouteStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// What one broadcast round did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceReport {
    pub online: Vec<String>,
    pub offline: Vec<String>,
    pub expired: Vec<String>,
}

pub struct PresenceBroadcaster {
    node: Arc<RelayNode>,
}

impl PresenceBroadcaster {
    pub fn new(node: Arc<RelayNode>) -> Self {
        Self { node }
    }

    /// The presence message this node sends at `now`
    pub fn announcement(&self, now: DateTime<Utc>) -> PresenceMessage {
        PresenceMessage::new(self.node.node_id(), &self.node.config().advertise_url)
            .with_version(VERSION)
            .with_timestamp(now)
    }

    /// Run one broadcast round
    pub async fn tick(&self, now: DateTime<Utc>) -> PresenceReport {
        let mut report = PresenceReport::default();
        let config = self.node.config();
        let routes = self.node.routes();

        let own = RouteEntry {
            version: Some(VERSION.to_string()),
            announced: Some(now),
            ..RouteEntry::new(&config.advertise_url, now, RouteStatus::Online)
        };
        if let Err(e) = routes.upsert_entry(self.node.node_id(), own) {
            tracing::warn!("Failed to record own route: {}", e);
        }

        let envelope = self.announcement(now).to_envelope();

        for peer in &config.peers {
            let status = match self.node.transport().send(&peer.url, &envelope).await {
                Ok(()) => {
                    tracing::debug!("Presence sent to {} ({})", peer.node_id, peer.url);
                    report.online.push(peer.node_id.clone());
                    RouteStatus::Online
                }
                Err(e) => {
                    tracing::warn!("Presence to {} ({}) failed: {}", peer.node_id, peer.url, e);
                    report.offline.push(peer.node_id.clone());
                    RouteStatus::Offline
                }
            };
            metrics::record_presence(status == RouteStatus::Online);

            // Keep what the peer told us about itself, refresh the rest
            let refreshed = routes.update(&peer.node_id, |current| {
                let mut entry = current
                    .cloned()
                    .unwrap_or_else(|| RouteEntry::new(&peer.url, now, status));
                entry.address = peer.url.clone();
                entry.updated = now;
                entry.status = status;
                entry
            });

            if let Err(e) = refreshed {
                tracing::warn!("Failed to record route for {}: {}", peer.node_id, e);
            }
        }

        match routes.expire(now, config.route_max_age) {
            Ok(expired) => {
                for node_id in &expired {
                    tracing::info!("Route to {} expired", node_id);
                }
                report.expired = expired;
            }
            Err(e) => tracing::warn!("Failed to expire routes: {}", e),
        }

        metrics::set_routes_known(routes.len());
        report
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.node.config().presence_interval;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Presence broadcaster started ({:?} interval, {} peers)",
            interval,
            self.node.config().peers.len()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let report = self.tick(Utc::now()).await;
            tracing::debug!(
                "Presence round: {} online, {} offline, {} expired",
                report.online.len(),
                report.offline.len(),
                report.expired.len()
            );
        }

        tracing::info!("Presence broadcaster stopped");
    }
}
