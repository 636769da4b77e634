//! Route table: node id to last-known address and liveness

use crate::store::error::StoreResult;
use crate::store::snapshot;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Liveness of a known node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// Last-known reachability of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// URL the node accepts messages on
    pub address: String,

    /// When this node last updated the entry (local clock)
    pub updated: DateTime<Utc>,

    #[serde(default)]
    pub status: RouteStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Time declared by the node itself in its last presence message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced: Option<DateTime<Utc>>,
}

impl RouteEntry {
    pub fn new(address: impl Into<String>, updated: DateTime<Utc>, status: RouteStatus) -> Self {
        Self {
            address: address.into(),
            updated,
            status,
            version: None,
            announced: None,
        }
    }

    /// Whether the entry is older than `max_age` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => now - self.updated > max_age,
            Err(_) => false,
        }
    }
}

/// Route table shared by the intake path and both background loops
///
/// Reads go straight to the map. Writers are serialized by `write_lock`,
/// which is held across the in-memory change and the snapshot rewrite, so
/// the document on disk always reflects a complete table.
pub struct RouteTable {
    entries: DashMap<String, RouteEntry>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl RouteTable {
    pub fn new_in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Table backed by a JSON object document at `path`
    ///
    /// A missing or corrupt document yields an empty table.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let stored: BTreeMap<String, RouteEntry> = snapshot::read_or_default(&path);

        Self {
            entries: stored.into_iter().collect(),
            path: Some(path),
            write_lock: Mutex::new(()),
        }
    }

    /// Overwrite the entry for `node_id` unconditionally
    pub fn upsert(
        &self,
        node_id: &str,
        address: &str,
        timestamp: DateTime<Utc>,
        status: RouteStatus,
    ) -> StoreResult<()> {
        self.upsert_entry(node_id, RouteEntry::new(address, timestamp, status))
    }

    /// Overwrite the entry for `node_id` with a fully-formed entry
    ///
    /// No ordering check against the existing entry is made. If the
    /// snapshot cannot be written the previous entry is restored.
    pub fn upsert_entry(&self, node_id: &str, entry: RouteEntry) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.replace_locked(node_id, entry)
    }

    /// Derive the new entry for `node_id` from the current one
    ///
    /// The read and the write happen under the writer lock, so a concurrent
    /// upsert of the same node is never overwritten by a stale copy.
    pub fn update<F>(&self, node_id: &str, f: F) -> StoreResult<RouteEntry>
    where
        F: FnOnce(Option<&RouteEntry>) -> RouteEntry,
    {
        let _guard = self.write_lock.lock();
        let current = self.entries.get(node_id).map(|e| e.clone());
        let entry = f(current.as_ref());
        self.replace_locked(node_id, entry.clone())?;
        Ok(entry)
    }

    fn replace_locked(&self, node_id: &str, entry: RouteEntry) -> StoreResult<()> {
        let previous = self.entries.insert(node_id.to_string(), entry);

        if let Err(e) = self.persist() {
            match previous {
                Some(prev) => {
                    self.entries.insert(node_id.to_string(), prev);
                }
                None => {
                    self.entries.remove(node_id);
                }
            }
            return Err(e);
        }

        Ok(())
    }

    /// Address for `node_id`, if known
    pub fn lookup(&self, node_id: &str) -> Option<String> {
        self.entries.get(node_id).map(|e| e.address.clone())
    }

    pub fn get(&self, node_id: &str) -> Option<RouteEntry> {
        self.entries.get(node_id).map(|e| e.clone())
    }

    /// Remove every entry last updated more than `max_age` before `now`
    ///
    /// Returns the removed node ids. Nothing is written when nothing expired.
    pub fn expire(&self, now: DateTime<Utc>, max_age: Duration) -> StoreResult<Vec<String>> {
        let _guard = self.write_lock.lock();

        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_stale(now, max_age))
            .map(|e| e.key().clone())
            .collect();

        if stale.is_empty() {
            return Ok(stale);
        }

        let mut removed = Vec::with_capacity(stale.len());
        for node_id in &stale {
            if let Some(entry) = self.entries.remove(node_id) {
                removed.push(entry);
            }
        }

        if let Err(e) = self.persist() {
            for (node_id, entry) in removed {
                self.entries.insert(node_id, entry);
            }
            return Err(e);
        }

        let mut expired: Vec<String> = removed.into_iter().map(|(id, _)| id).collect();
        expired.sort();
        Ok(expired)
    }

    /// All entries ordered by node id
    pub fn snapshot(&self) -> Vec<(String, RouteEntry)> {
        let ordered: BTreeMap<String, RouteEntry> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        ordered.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> StoreResult<()> {
        if let Some(ref path) = self.path {
            let table: BTreeMap<String, RouteEntry> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();
            snapshot::write_atomic(path, &table)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_upsert_and_lookup() {
        let routes = RouteTable::new_in_memory();
        assert!(routes.lookup("B").is_none());

        routes
            .upsert("B", "http://b:8080", at(1_000), RouteStatus::Online)
            .unwrap();
        assert_eq!(routes.lookup("B").as_deref(), Some("http://b:8080"));
    }

    #[test]
    fn test_upsert_overwrites_even_with_older_timestamp() {
        let routes = RouteTable::new_in_memory();
        routes
            .upsert("B", "http://new:8080", at(2_000), RouteStatus::Online)
            .unwrap();
        routes
            .upsert("B", "http://old:8080", at(1_000), RouteStatus::Offline)
            .unwrap();

        let entry = routes.get("B").unwrap();
        assert_eq!(entry.address, "http://old:8080");
        assert_eq!(entry.updated, at(1_000));
        assert_eq!(entry.status, RouteStatus::Offline);
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn test_update_sees_latest_entry() {
        let routes = std::sync::Arc::new(RouteTable::new_in_memory());
        routes
            .upsert("B", "http://b", at(1_000), RouteStatus::Unknown)
            .unwrap();

        let writer = {
            let routes = routes.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let entry = RouteEntry {
                        version: Some(format!("v{i}")),
                        announced: Some(at(i)),
                        ..RouteEntry::new("http://b", at(1_000 + i), RouteStatus::Online)
                    };
                    routes.upsert_entry("B", entry).unwrap();
                }
            })
        };

        for _ in 0..200 {
            routes
                .update("B", |current| {
                    let mut entry = current.cloned().unwrap();
                    entry.status = RouteStatus::Online;
                    entry
                })
                .unwrap();
        }
        writer.join().unwrap();

        // Whatever interleaving happened, the writer's last announcement survives
        let entry = routes
            .update("B", |current| current.cloned().unwrap())
            .unwrap();
        assert_eq!(entry.version.as_deref(), Some("v199"));
        assert_eq!(entry.announced, Some(at(199)));
    }

    #[test]
    fn test_update_creates_missing_entry() {
        let routes = RouteTable::new_in_memory();
        let entry = routes
            .update("C", |current| {
                assert!(current.is_none());
                RouteEntry::new("http://c", at(5), RouteStatus::Offline)
            })
            .unwrap();
        assert_eq!(entry.status, RouteStatus::Offline);
        assert_eq!(routes.lookup("C").as_deref(), Some("http://c"));
    }

    #[test]
    fn test_expire_boundary() {
        let routes = RouteTable::new_in_memory();
        routes
            .upsert("A", "http://a", at(1_000), RouteStatus::Online)
            .unwrap();
        routes
            .upsert("B", "http://b", at(1_500), RouteStatus::Offline)
            .unwrap();

        let max_age = Duration::from_secs(900);

        // Exactly max_age old: kept
        let removed = routes.expire(at(1_900), max_age).unwrap();
        assert!(removed.is_empty());
        assert_eq!(routes.len(), 2);

        let removed = routes.expire(at(1_901), max_age).unwrap();
        assert_eq!(removed, vec!["A".to_string()]);
        assert!(routes.lookup("A").is_none());
        assert!(routes.lookup("B").is_some());
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let routes = RouteTable::new_in_memory();
        for id in ["C", "A", "B"] {
            routes
                .upsert(id, "http://x", at(0), RouteStatus::Unknown)
                .unwrap();
        }
        let ids: Vec<String> = routes.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_persisted_table_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routes.json");

        {
            let routes = RouteTable::open(&path);
            routes
                .upsert("B", "http://b:8080", at(1_000), RouteStatus::Online)
                .unwrap();
            routes
                .upsert("C", "http://c:8080", at(500), RouteStatus::Online)
                .unwrap();
            routes.expire(at(1_450), Duration::from_secs(900)).unwrap();
        }

        let routes = RouteTable::open(&path);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes.get("B").unwrap().status, RouteStatus::Online);
    }

    #[test]
    fn test_corrupt_table_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routes.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let routes = RouteTable::open(&path);
        assert!(routes.is_empty());
    }

    #[test]
    fn test_failed_persist_restores_previous_entry() {
        let dir = TempDir::new().unwrap();
        // A directory where the document should be makes the rename fail
        let path = dir.path().join("routes.json");
        std::fs::create_dir_all(path.join("blocker")).unwrap();

        let routes = RouteTable::open(&path);
        let result = routes.upsert("B", "http://b", at(1), RouteStatus::Online);
        assert!(result.is_err());
        assert!(routes.lookup("B").is_none());
    }
}
