//! Delivery index: last known outbox state per message id
//!
//! Outbox records disappear once delivery succeeds or is abandoned; the
//! index is what keeps those outcomes observable afterwards.

use crate::store::error::StoreResult;
use crate::store::snapshot;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Delivery state machine positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryState {
    /// Staged, not yet attempted
    New,
    /// Failed at least once, waiting for its next slot
    Retry,
    /// Delivered (terminal)
    Sent,
    /// Abandoned (terminal)
    Failed,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Sent | DeliveryState::Failed)
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryState::New => "NEW",
            DeliveryState::Retry => "RETRY",
            DeliveryState::Sent => "SENT",
            DeliveryState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub state: DeliveryState,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: String,
    pub updated: DateTime<Utc>,
}

/// How many index entries sit in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub new: usize,
    pub retry: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct DeliveryIndex {
    entries: DashMap<String, DeliveryStatus>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl DeliveryIndex {
    pub fn new_in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let stored: BTreeMap<String, DeliveryStatus> = snapshot::read_or_default(&path);

        Self {
            entries: stored.into_iter().collect(),
            path: Some(path),
            write_lock: Mutex::new(()),
        }
    }

    /// Record the current state of `msgid`
    pub fn mark(
        &self,
        msgid: &str,
        state: DeliveryState,
        attempts: u32,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.entries.insert(
            msgid.to_string(),
            DeliveryStatus {
                state,
                attempts,
                last_error: last_error.to_string(),
                updated: now,
            },
        );
        self.persist()
    }

    pub fn get(&self, msgid: &str) -> Option<DeliveryStatus> {
        self.entries.get(msgid).map(|e| e.clone())
    }

    /// Entry counts per state
    pub fn counts(&self) -> DeliveryCounts {
        let mut counts = DeliveryCounts::default();
        for entry in self.entries.iter() {
            match entry.state {
                DeliveryState::New => counts.new += 1,
                DeliveryState::Retry => counts.retry += 1,
                DeliveryState::Sent => counts.sent += 1,
                DeliveryState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Drop terminal entries last updated more than `retention` before `now`
    ///
    /// Pending entries are kept whatever their age. Returns how many entries
    /// were removed; nothing is written when that is zero.
    pub fn prune(&self, now: DateTime<Utc>, retention: Duration) -> StoreResult<usize> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Ok(0);
        };
        let _guard = self.write_lock.lock();

        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.state.is_terminal() && now - e.updated > retention)
            .map(|e| e.key().clone())
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let removed: Vec<(String, DeliveryStatus)> = stale
            .iter()
            .filter_map(|msgid| self.entries.remove(msgid))
            .collect();

        if let Err(e) = self.persist() {
            for (msgid, status) in removed {
                self.entries.insert(msgid, status);
            }
            return Err(e);
        }

        Ok(removed.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> StoreResult<()> {
        if let Some(ref path) = self.path {
            let table: BTreeMap<String, DeliveryStatus> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();
            snapshot::write_atomic(path, &table)?;
        }
        Ok(())
    }
}
