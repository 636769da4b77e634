//! Atomic JSON documents
//!
//! Writes go to a temporary file in the destination directory, are flushed
//! and fsynced, then renamed over the target. Loads never fail hard: a
//! missing document is the default value, a malformed one is logged and
//! treated the same way.

use crate::store::error::StoreResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Extension used by every persisted document
pub const DOCUMENT_EXT: &str = "json";

/// Serialize `value` and atomically replace `path` with it
pub fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;

    Ok(())
}

/// Read a document, `None` if missing or unreadable
pub fn read<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring malformed document {}: {}", path.display(), e);
            None
        }
    }
}

/// Read a document, falling back to the default value
pub fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    read(path).unwrap_or_default()
}

/// All `*.json` documents in `dir`; a missing directory is empty
pub fn list_documents(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map(|e| e == DOCUMENT_EXT).unwrap_or(false))
        .collect();
    paths.sort();
    paths
}

/// File name for a per-message document
///
/// Ids made only of `[A-Za-z0-9._-]` (and not starting with `.`) are used
/// as-is; anything else is hex-encoded behind an `x-` prefix so it cannot
/// escape the directory or collide with a plain id.
pub fn document_name(msgid: &str) -> String {
    let plain = !msgid.is_empty()
        && !msgid.starts_with('.')
        && !msgid.starts_with("x-")
        && msgid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if plain {
        format!("{msgid}.{DOCUMENT_EXT}")
    } else {
        format!("x-{}.{DOCUMENT_EXT}", hex::encode(msgid.as_bytes()))
    }
}

/// Remove a document, ignoring a file that is already gone
pub fn remove(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routes.json");

        let mut doc = BTreeMap::new();
        doc.insert("A".to_string(), 1u32);
        write_atomic(&path, &doc).unwrap();

        let loaded: BTreeMap<String, u32> = read_or_default(&path);
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seen.json");

        write_atomic(&path, &vec!["a"]).unwrap();
        write_atomic(&path, &vec!["a", "b"]).unwrap();

        let loaded: Vec<String> = read_or_default(&path);
        assert_eq!(loaded, vec!["a", "b"]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_and_malformed_fall_back_to_default() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        let loaded: Vec<String> = read_or_default(&missing);
        assert!(loaded.is_empty());

        let torn = dir.path().join("torn.json");
        fs::write(&torn, b"[\"a\", \"b").unwrap();
        let loaded: Vec<String> = read_or_default(&torn);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state").join("index.json");
        write_atomic(&path, &vec![1, 2, 3]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_document_name() {
        assert_eq!(document_name("m1"), "m1.json");
        assert_eq!(document_name("abc-123_x.y"), "abc-123_x.y.json");
        assert_eq!(document_name("../etc"), format!("x-{}.json", hex::encode("../etc")));
        assert_eq!(document_name("a/b"), format!("x-{}.json", hex::encode("a/b")));
        assert_ne!(document_name("x-6162"), "x-6162.json");
    }

    #[test]
    fn test_list_documents_skips_other_files() {
        let dir = TempDir::new().unwrap();
        write_atomic(&dir.path().join("b.json"), &1).unwrap();
        write_atomic(&dir.path().join("a.json"), &2).unwrap();
        fs::write(dir.path().join(".tmp123"), b"junk").unwrap();

        let docs = list_documents(dir.path());
        assert_eq!(docs.len(), 2);
        assert!(docs[0].ends_with("a.json"));
        assert!(list_documents(&dir.path().join("missing")).is_empty());
    }
}
