//! Outbox queue for store-and-forward delivery
//!
//! Holds messages that still have to reach their next hop, together with
//! the retry bookkeeping the retry worker needs. Each record is one
//! document under the outbox directory.

use crate::message::DataMessage;
use crate::store::error::StoreResult;
use crate::store::snapshot;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attempts after which a record is abandoned
pub const MAX_ATTEMPTS: u32 = 5;

/// Retry delays in seconds, plateauing at the last entry
pub const BACKOFF_SCHEDULE: [u64; 5] = [60, 120, 240, 480, 600];

/// Delay before the next attempt
///
/// `prior_attempts` is the attempt count before the failure being handled,
/// so the first failure waits 60s, the second 120s, and so on.
pub fn backoff(prior_attempts: u32) -> Duration {
    let idx = (prior_attempts as usize).min(BACKOFF_SCHEDULE.len() - 1);
    Duration::from_secs(BACKOFF_SCHEDULE[idx])
}

/// A message waiting for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    #[serde(rename = "msg")]
    pub message: DataMessage,

    /// Delivery attempts made so far
    pub attempts: u32,

    /// Unix seconds before which the record is skipped (0 = due now)
    #[serde(default)]
    pub next_at: i64,

    #[serde(default)]
    pub last_error: String,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn new(message: DataMessage, now: DateTime<Utc>) -> Self {
        Self {
            message,
            attempts: 0,
            next_at: 0,
            last_error: String::new(),
            created: now,
            updated: now,
        }
    }

    pub fn msgid(&self) -> &str {
        &self.message.msgid
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_at == 0 || now.timestamp() >= self.next_at
    }

    /// Count a failed attempt
    ///
    /// Returns `true` when the attempt budget is exhausted; otherwise the
    /// next slot is scheduled from the backoff table.
    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        let prior = self.attempts;
        self.attempts += 1;
        self.last_error = error.into();
        self.updated = now;

        if self.attempts >= MAX_ATTEMPTS {
            return true;
        }

        self.next_at = now.timestamp() + backoff(prior).as_secs() as i64;
        false
    }

    /// Count a successful attempt
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_error.clear();
        self.updated = now;
    }
}

/// Exclusive hold on one outbox record while it is being attempted
///
/// Released on drop.
pub struct OutboxClaim<'a> {
    queue: &'a OutboxQueue,
    record: OutboxRecord,
}

impl OutboxClaim<'_> {
    pub fn record(&self) -> &OutboxRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut OutboxRecord {
        &mut self.record
    }
}

impl Drop for OutboxClaim<'_> {
    fn drop(&mut self) {
        self.queue.in_flight.remove(self.record.msgid());
    }
}

pub struct OutboxQueue {
    records: DashMap<String, OutboxRecord>,
    in_flight: DashSet<String>,
    dir: Option<PathBuf>,
}

impl OutboxQueue {
    pub fn new_in_memory() -> Self {
        Self {
            records: DashMap::new(),
            in_flight: DashSet::new(),
            dir: None,
        }
    }

    /// Queue backed by a directory of per-record documents
    ///
    /// Unreadable documents are skipped and left on disk untouched.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let records = DashMap::new();
        for path in snapshot::list_documents(&dir) {
            if let Some(record) = snapshot::read::<OutboxRecord>(&path) {
                records.insert(record.msgid().to_string(), record);
            }
        }

        Ok(Self {
            records,
            in_flight: DashSet::new(),
            dir: Some(dir),
        })
    }

    /// Stage `message` for delivery, replacing any record with the same id
    pub fn stage(&self, message: DataMessage, now: DateTime<Utc>) -> StoreResult<OutboxRecord> {
        let record = OutboxRecord::new(message, now);
        self.update(&record)?;
        Ok(record)
    }

    pub fn get(&self, msgid: &str) -> Option<OutboxRecord> {
        self.records.get(msgid).map(|r| r.clone())
    }

    /// Ids of records due at `now`, oldest first
    pub fn due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<(DateTime<Utc>, String)> = self
            .records
            .iter()
            .filter(|r| r.is_due(now))
            .map(|r| (r.created, r.key().clone()))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Take exclusive hold of a record
    ///
    /// `None` if the record is gone or another task already holds it.
    pub fn claim(&self, msgid: &str) -> Option<OutboxClaim<'_>> {
        if !self.in_flight.insert(msgid.to_string()) {
            return None;
        }

        match self.get(msgid) {
            Some(record) => Some(OutboxClaim {
                queue: self,
                record,
            }),
            None => {
                self.in_flight.remove(msgid);
                None
            }
        }
    }

    /// Write `record` to disk, then make it the in-memory version
    ///
    /// If the write fails the previous version stays authoritative.
    pub fn update(&self, record: &OutboxRecord) -> StoreResult<()> {
        if let Some(path) = self.document_path(record.msgid()) {
            snapshot::write_atomic(&path, record)?;
        }
        self.records
            .insert(record.msgid().to_string(), record.clone());
        Ok(())
    }

    /// Drop a record for good
    pub fn remove(&self, msgid: &str) -> StoreResult<Option<OutboxRecord>> {
        if let Some(path) = self.document_path(msgid) {
            snapshot::remove(&path)?;
        }
        Ok(self.records.remove(msgid).map(|(_, r)| r))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> OutboxStats {
        let mut stats = OutboxStats::default();
        for record in self.records.iter() {
            stats.pending += 1;
            if record.is_due(now) {
                stats.due += 1;
            }
            if record.attempts > 0 {
                stats.retrying += 1;
            }
        }
        stats.in_flight = self.in_flight.len() as u64;
        stats
    }

    fn document_path(&self, msgid: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(snapshot::document_name(msgid)))
    }
}

/// Outbox statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub due: u64,
    pub retrying: u64,
    pub in_flight: u64,
}

impl std::fmt::Display for OutboxStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Outbox: {} pending, {} due, {} retrying, {} in flight",
            self.pending, self.due, self.retrying, self.in_flight
        )
    }
}
