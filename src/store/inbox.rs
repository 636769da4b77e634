//! Message store (inbox): one document per accepted message

use crate::message::DataMessage;
use crate::store::error::StoreResult;
use crate::store::snapshot;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

pub struct MessageStore {
    messages: DashMap<String, DataMessage>,
    dir: Option<PathBuf>,
}

impl MessageStore {
    pub fn new_in_memory() -> Self {
        Self {
            messages: DashMap::new(),
            dir: None,
        }
    }

    /// Store backed by a directory of per-message documents
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let messages = DashMap::new();
        for path in snapshot::list_documents(&dir) {
            if let Some(message) = snapshot::read::<DataMessage>(&path) {
                messages.insert(message.msgid.clone(), message);
            }
        }

        Ok(Self {
            messages,
            dir: Some(dir),
        })
    }

    /// Persist `message` as received, replacing any earlier copy
    pub fn save(&self, message: &DataMessage) -> StoreResult<()> {
        if let Some(ref dir) = self.dir {
            let path = dir.join(snapshot::document_name(&message.msgid));
            snapshot::write_atomic(&path, message)?;
        }
        self.messages
            .insert(message.msgid.clone(), message.clone());
        Ok(())
    }

    pub fn get(&self, msgid: &str) -> Option<DataMessage> {
        self.messages.get(msgid).map(|m| m.clone())
    }

    pub fn contains(&self, msgid: &str) -> bool {
        self.messages.contains_key(msgid)
    }

    /// Messages addressed to `node_id`, ordered by id
    pub fn for_destination(&self, node_id: &str) -> Vec<DataMessage> {
        let mut found: Vec<DataMessage> = self
            .messages
            .iter()
            .filter(|m| m.dest.as_deref() == Some(node_id))
            .map(|m| m.value().clone())
            .collect();
        found.sort_by(|a, b| a.msgid.cmp(&b.msgid));
        found
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
