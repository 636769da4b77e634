//! Outbox retry worker
//!
//! Each tick walks the due outbox records one at a time. A record is
//! claimed for the duration of its attempt, the target is resolved afresh
//! from the route table, and the outcome moves the record to SENT, RETRY
//! or FAILED.

use crate::metrics::{self, DeliveryResult};
use crate::relay::{RelayEvent, RelayNode};
use crate::store::{DeliveryState, OutboxRecord};
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Error recorded when a staged message has no hops left
pub const TTL_EXPIRED: &str = "TTL_EXPIRED";

/// Error recorded when neither a route nor a default peer is known
pub const NO_ROUTE: &str = "no route";

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    /// Records held by another attempt or no longer due
    pub skipped: usize,
}

enum Attempt {
    Delivered,
    Retry,
    Failed,
    Skipped,
}

pub struct RetryWorker {
    node: Arc<RelayNode>,
}

impl RetryWorker {
    pub fn new(node: Arc<RelayNode>) -> Self {
        Self { node }
    }

    /// Process every record due at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> RetryReport {
        let mut report = RetryReport::default();

        for msgid in self.node.outbox().due(now) {
            match self.attempt(&msgid, now).await {
                Attempt::Delivered => report.delivered += 1,
                Attempt::Retry => report.retried += 1,
                Attempt::Failed => report.failed += 1,
                Attempt::Skipped => {
                    report.skipped += 1;
                    continue;
                }
            }
            report.attempted += 1;
        }

        match self.node.index().prune(now, self.node.config().index_retention) {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Pruned {} finished deliveries from the index", n),
            Err(e) => tracing::warn!("Failed to prune delivery index: {}", e),
        }

        metrics::set_outbox_pending(self.node.outbox().len());
        report
    }

    async fn attempt(&self, msgid: &str, now: DateTime<Utc>) -> Attempt {
        let outbox = self.node.outbox();
        let Some(mut claim) = outbox.claim(msgid) else {
            tracing::debug!("Outbox record {} already in flight", msgid);
            return Attempt::Skipped;
        };
        if !claim.record().is_due(now) {
            return Attempt::Skipped;
        }

        if claim.record().message.ttl <= 0 {
            let record = claim.record().clone();
            self.abandon(&record, TTL_EXPIRED, now);
            return Attempt::Failed;
        }

        let wire = claim.record().message.decremented();
        let result = match self.node.resolve_target(wire.dest.as_deref()) {
            Some(target) => self
                .node
                .transport()
                .send(&target, &wire.to_envelope())
                .await
                .map(|_| target)
                .map_err(|e| e.to_string()),
            None => Err(NO_ROUTE.to_string()),
        };

        match result {
            Ok(target) => {
                let record = claim.record_mut();
                record.record_success(now);
                let record = record.clone();
                self.finish_sent(&record, target, now);
                Attempt::Delivered
            }
            Err(error) => {
                let exhausted = claim.record_mut().record_failure(error.clone(), now);
                let record = claim.record().clone();
                if exhausted {
                    self.abandon(&record, &error, now);
                    return Attempt::Failed;
                }

                if let Err(e) = outbox.update(&record) {
                    tracing::warn!("Failed to reschedule {}: {}", msgid, e);
                    return Attempt::Retry;
                }
                self.mark(msgid, DeliveryState::Retry, &record, now);
                metrics::record_delivery(DeliveryResult::Retry);
                tracing::warn!(
                    "Delivery of {} failed (attempt {}): {}; next try at {}",
                    msgid,
                    record.attempts,
                    error,
                    record.next_at
                );
                Attempt::Retry
            }
        }
    }

    fn finish_sent(&self, record: &OutboxRecord, target: String, now: DateTime<Utc>) {
        let msgid = record.msgid();
        if let Err(e) = self.node.outbox().remove(msgid) {
            tracing::warn!("Failed to remove delivered record {}: {}", msgid, e);
        }
        self.mark(msgid, DeliveryState::Sent, record, now);

        self.node.counters().delivered.fetch_add(1, Ordering::Relaxed);
        metrics::record_delivery(DeliveryResult::Sent);
        tracing::info!("Delivered {} to {} after {} attempt(s)", msgid, target, record.attempts);

        self.node.emit_event(RelayEvent::Delivered {
            msgid: msgid.to_string(),
            target,
        });
    }

    /// Terminal failure: drop the record, keep the verdict in the index
    fn abandon(&self, record: &OutboxRecord, reason: &str, now: DateTime<Utc>) {
        let msgid = record.msgid();
        if let Err(e) = self.node.outbox().remove(msgid) {
            tracing::warn!("Failed to remove abandoned record {}: {}", msgid, e);
        }
        if let Err(e) =
            self.node
                .index()
                .mark(msgid, DeliveryState::Failed, record.attempts, reason, now)
        {
            tracing::warn!("Failed to index {}: {}", msgid, e);
        }

        self.node.counters().failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_delivery(DeliveryResult::Failed);
        tracing::warn!(
            "Abandoned {} after {} attempt(s): {}",
            msgid,
            record.attempts,
            reason
        );

        self.node.emit_event(RelayEvent::Abandoned {
            msgid: msgid.to_string(),
            reason: reason.to_string(),
        });
    }

    fn mark(&self, msgid: &str, state: DeliveryState, record: &OutboxRecord, now: DateTime<Utc>) {
        if let Err(e) =
            self.node
                .index()
                .mark(msgid, state, record.attempts, &record.last_error, now)
        {
            tracing::warn!("Failed to index {}: {}", msgid, e);
        }
    }

    /// Tick every `interval`, and early whenever a message is staged
    pub async fn run(
        self,
        interval: Duration,
        mut wake: Option<mpsc::UnboundedReceiver<RelayEvent>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Retry worker started ({:?} interval)", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                event = next_event(&mut wake) => {
                    if !matches!(event, RelayEvent::Staged { .. }) {
                        continue;
                    }
                }
                _ = shutdown.changed() => break,
            }

            let report = self.tick(Utc::now()).await;
            if report.attempted > 0 {
                tracing::info!(
                    "Retry tick: {} attempted, {} delivered, {} retrying, {} failed",
                    report.attempted,
                    report.delivered,
                    report.retried,
                    report.failed
                );
            }
        }

        tracing::info!("Retry worker stopped");
    }
}

/// Next node event; never resolves once the channel is gone
async fn next_event(rx: &mut Option<mpsc::UnboundedReceiver<RelayEvent>>) -> RelayEvent {
    if let Some(inner) = rx.as_mut() {
        if let Some(event) = inner.recv().await {
            return event;
        }
        *rx = None;
    }
    std::future::pending().await
}
