//! Seen-id registry for duplicate and loop suppression
//!
//! Membership only grows. Ids are never evicted for the lifetime of the
//! persisted state.

use crate::store::error::StoreResult;
use crate::store::snapshot;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct SeenRegistry {
    ids: RwLock<HashSet<String>>,
    path: Option<PathBuf>,
}

impl SeenRegistry {
    /// Registry that lives only in memory
    pub fn new_in_memory() -> Self {
        Self {
            ids: RwLock::new(HashSet::new()),
            path: None,
        }
    }

    /// Registry backed by a JSON array document at `path`
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let ids: Vec<String> = snapshot::read_or_default(&path);

        Self {
            ids: RwLock::new(ids.into_iter().collect()),
            path: Some(path),
        }
    }

    pub fn has(&self, msgid: &str) -> bool {
        self.ids.read().contains(msgid)
    }

    /// Record `msgid` as seen
    ///
    /// Returns `false` if it was already present. The check and the insert
    /// happen under one lock, and the document is rewritten before the lock
    /// is released; if that write fails the id is taken back out.
    pub fn add(&self, msgid: &str) -> StoreResult<bool> {
        let mut ids = self.ids.write();
        if !ids.insert(msgid.to_string()) {
            return Ok(false);
        }

        if let Err(e) = self.persist(&ids) {
            ids.remove(msgid);
            return Err(e);
        }

        Ok(true)
    }

    /// Take back an id whose acceptance could not be completed
    pub(crate) fn revoke(&self, msgid: &str) -> StoreResult<()> {
        let mut ids = self.ids.write();
        if ids.remove(msgid) {
            self.persist(&ids)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    fn persist(&self, ids: &HashSet<String>) -> StoreResult<()> {
        if let Some(ref path) = self.path {
            let mut sorted: Vec<&String> = ids.iter().collect();
            sorted.sort();
            snapshot::write_atomic(path, &sorted)?;
        }
        Ok(())
    }
}
