//! Persistence of the last received event id.

use parking_lot::Mutex;
use reqwest::Url;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Namespace prefix for store keys, kept stable so ids survive upgrades.
pub const DEFAULT_KEY_NAMESPACE: &str = "resumable_sse.lastEventId";

/// External key-value store holding one last-event-id per subscription.
pub trait LastEventIdStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Derive the store key for a subscription URL.
///
/// The key has the form `<namespace>.<scheme>.<host>.<port>.<path>`, where the
/// port falls back to the scheme's default.
pub fn persistence_key(namespace: &str, url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let port = url
        .port_or_known_default()
        .map(|p| p.to_string())
        .unwrap_or_default();
    format!("{namespace}.{}.{host}.{port}.{}", url.scheme(), url.path())
}

/// In-process store. Ids are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LastEventIdStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }
}

/// Store backed by a JSON object on disk, rewritten on every `set`.
///
/// Each `set` serializes every entry, writes a temporary file and renames it
/// over the old one. This blocking I/O runs on the connection task once per
/// event that carries an id, so streams with a high event rate or a large
/// number of keys are better served by [`MemoryStore`] or a custom store.
///
/// Write failures are logged and otherwise ignored; the in-memory copy stays
/// authoritative for this process.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store, loading existing entries. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)
    }
}

impl LastEventIdStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&entries) {
            warn!(path = %self.path.display(), error = %err, "Failed to persist last event id");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_persistence_key_shape() {
        let url = Url::parse("https://example.com:8443/events/feed").unwrap();
        assert_eq!(
            persistence_key("ns", &url),
            "ns.https.example.com.8443./events/feed"
        );
    }

    #[test]
    fn test_persistence_key_default_port_and_path() {
        let url = Url::parse("http://localhost").unwrap();
        assert_eq!(
            persistence_key(DEFAULT_KEY_NAMESPACE, &url),
            "resumable_sse.lastEventId.http.localhost.80./"
        );

        let url = Url::parse("https://example.com/sse?token=abc").unwrap();
        assert_eq!(persistence_key("ns", &url), "ns.https.example.com.443./sse");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k"), None);
        store.set("k", "1");
        store.set("k", "2");
        assert_eq!(store.get("k").as_deref(), Some("2"));
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.json");

        let store = assert_ok!(JsonFileStore::open(&path));
        assert_eq!(store.get("a"), None);
        store.set("a", "42");
        store.set("b", "x");
        drop(store);

        let reopened = assert_ok!(JsonFileStore::open(&path));
        assert_eq!(reopened.get("a").as_deref(), Some("42"));
        assert_eq!(reopened.get("b").as_deref(), Some("x"));
    }

    #[test]
    fn test_json_file_store_writes_through_on_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.json");
        let store = assert_ok!(JsonFileStore::open(&path));

        store.set("a", "1");
        let on_disk: HashMap<String, String> =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk.get("a").map(String::as_str), Some("1"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_json_file_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.json");
        fs::write(&path, b"not json").unwrap();

        let err = assert_err!(JsonFileStore::open(&path));
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
