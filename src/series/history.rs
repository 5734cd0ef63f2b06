//! Durable key-value storage for series snapshots
//!
//! The bus only needs `get`/`set` of strings. Snapshots are JSON arrays of
//! samples stored under `series-history-<series id>`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::buffer::Sample;
use super::error::{HistoryError, HistoryResult};

const KEY_PREFIX: &str = "series-history-";

/// Storage key for a series snapshot
pub fn history_key(series_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, series_id)
}

pub(crate) fn encode_samples(samples: &[Sample]) -> HistoryResult<String> {
    Ok(serde_json::to_string(samples)?)
}

pub(crate) fn decode_samples(raw: &str) -> HistoryResult<Vec<Sample>> {
    Ok(serde_json::from_str(raw)?)
}

/// String key-value store used for history snapshots
pub trait HistoryStore: Send + Sync {
    fn get(&self, key: &str) -> HistoryResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> HistoryResult<()>;
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn get(&self, key: &str) -> HistoryResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| HistoryError::Lock(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> HistoryResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| HistoryError::Lock(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One file per key under a directory
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> HistoryResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Percent-encoded so distinct keys never share a file
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

impl HistoryStore for FileHistoryStore {
    fn get(&self, key: &str) -> HistoryResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> HistoryResult<()> {
        // Write then rename so a crash never leaves a half-written snapshot
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_history_key() {
        assert_eq!(history_key("w1"), "series-history-w1");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryHistoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v2".to_string()));
        assert_eq!(store.keys(), vec!["k"]);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileHistoryStore::open(dir.path().join("history")).unwrap();

        assert_eq!(store.get(&history_key("w1")).unwrap(), None);

        let samples = vec![Sample::new(1, 1.5), Sample::new(2, 2.5)];
        store
            .set(&history_key("w1"), &encode_samples(&samples).unwrap())
            .unwrap();

        let raw = store.get(&history_key("w1")).unwrap().unwrap();
        assert_eq!(decode_samples(&raw).unwrap(), samples);

        // A fresh handle on the same directory sees the snapshot
        let reopened = FileHistoryStore::open(store.dir()).unwrap();
        assert!(reopened.get(&history_key("w1")).unwrap().is_some());
    }

    #[test]
    fn test_file_store_encodes_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileHistoryStore::open(dir.path()).unwrap();

        store.set("series-history-../escape", "[]").unwrap();
        assert!(dir.path().join("series-history-..%2Fescape.json").exists());
        assert_eq!(
            store.get("series-history-../escape").unwrap(),
            Some("[]".to_string())
        );
    }

    #[test]
    fn test_file_store_keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = FileHistoryStore::open(dir.path()).unwrap();

        let samples = encode_samples(&[Sample::new(1, 21.5)]).unwrap();
        store.set(&history_key("room/temp"), &samples).unwrap();
        store.set(&history_key("room_temp"), "[]").unwrap();
        store.set(&history_key("room%2Ftemp"), "[]").unwrap();

        assert_eq!(store.get(&history_key("room/temp")).unwrap(), Some(samples));
        assert_eq!(
            store.get(&history_key("room_temp")).unwrap(),
            Some("[]".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_samples("not json"),
            Err(HistoryError::Serialization(_))
        ));
    }
}
