//! Flat file store
//!
//! Stores each cache entry as its own JSON file in a directory. File names are
//! `<prefix><sha256(key)>.json`, so any key (long URLs included) maps to a
//! short valid name, and unrelated files in the same directory are left alone.
//! The logical key is kept inside the record for `keys()`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::warn;

use super::{DurableStore, DEFAULT_KEY_PREFIX};
use crate::cache::CacheEntry;
use crate::error::StorageError;

const FILE_SUFFIX: &str = ".json";

/// Hex length of a SHA-256 digest
const DIGEST_LEN: usize = 64;

/// On-disk layout of one record
#[derive(Serialize)]
struct RecordRef<'a> {
    key: &'a str,
    entry: &'a CacheEntry<Value>,
}

#[derive(Deserialize)]
struct Record {
    key: String,
    entry: CacheEntry<Value>,
}

/// Durable store writing one JSON file per entry
///
/// Uses `~/.cache/tiercache/` on Linux by default, or the equivalent XDG path
/// on other platforms. All filesystem calls are synchronous.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    /// Reserved file name prefix
    prefix: String,
}

impl FileStore {
    /// Creates a store in the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        Self::default_dir().map(Self::with_dir)
    }

    /// The platform cache directory for this crate, if one exists
    pub fn default_dir() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "tiercache")?;
        Some(project_dirs.cache_dir().to_path_buf())
    }

    /// Creates a store in a custom directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Replaces the reserved file name prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Directory this store writes to
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path of the file holding `key`
    pub fn record_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.cache_dir
            .join(format!("{}{}{}", self.prefix, digest, FILE_SUFFIX))
    }

    /// Whether a file name looks like one of this store's records
    fn owns_file_name(&self, name: &str) -> bool {
        name.strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            .is_some_and(|digest| {
                digest.len() == DIGEST_LEN && digest.bytes().all(|b| b.is_ascii_hexdigit())
            })
    }

    /// Ensures the cache directory exists
    fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir)
    }

    fn read_record(path: &Path) -> Result<Option<Record>, String> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| e.to_string())
    }

    fn read(&self, key: &str) -> Result<Option<CacheEntry<Value>>, StorageError> {
        let path = self.record_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: Record = serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if record.key != key {
            return Ok(None);
        }
        Ok(Some(record.entry))
    }

    fn write(&self, key: &str, entry: &CacheEntry<Value>) -> Result<(), StorageError> {
        self.ensure_dir()?;

        let json = serde_json::to_string_pretty(&RecordRef { key, entry })?;
        // Each write gets its own temp file; readers only ever see complete files
        let mut tmp = NamedTempFile::new_in(&self.cache_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(self.record_path(key))
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Paths of every record file this store owns
    fn list(&self) -> Result<Vec<PathBuf>, StorageError> {
        let dir = match fs::read_dir(&self.cache_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for dir_entry in dir {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if self.owns_file_name(name) {
                found.push(dir_entry.path());
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Value>>, StorageError> {
        self.read(key)
    }

    async fn set(&self, key: &str, entry: &CacheEntry<Value>) -> Result<(), StorageError> {
        self.write(key, entry)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.remove(key)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        for path in self.list()? {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for path in self.list()? {
            match Self::read_record(&path) {
                Ok(Some(record)) => keys.push(record.key),
                // Removed between listing and reading
                Ok(None) => {}
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "Skipping unreadable cache file");
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::with_dir(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    fn entry(value: Value) -> CacheEntry<Value> {
        CacheEntry::new(
            value,
            Utc::now(),
            Duration::from_secs(3600),
            ["products".to_string()].into_iter().collect::<BTreeSet<_>>(),
        )
    }

    #[tokio::test]
    async fn test_set_creates_prefixed_file_in_cache_directory() {
        let (store, temp_dir) = create_test_store();

        store
            .set("p1", &entry(json!({"id": 1})))
            .await
            .expect("Write should succeed");

        let expected_path = store.record_path("p1");
        assert_eq!(expected_path.parent(), Some(temp_dir.path()));
        assert!(expected_path.exists(), "Cache file should exist");

        let content = fs::read_to_string(&expected_path).expect("Should read file");
        assert!(content.contains("\"expires_at\""));
        assert!(content.contains("\"products\""));
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing_key() {
        let (store, _temp_dir) = create_test_store();

        let result = store.get("nonexistent_key").await.expect("Read should succeed");

        assert!(result.is_none(), "Should return None for missing key");
    }

    #[tokio::test]
    async fn test_entry_survives_roundtrip() {
        let (store, _temp_dir) = create_test_store();
        let original = entry(json!({"name": "roundtrip", "value": 12345}));

        store.set("roundtrip_key", &original).await.expect("Write should succeed");
        let stored = store
            .get("roundtrip_key")
            .await
            .expect("Read should succeed")
            .expect("Entry should exist");

        assert_eq!(stored, original, "Entry should survive roundtrip");
    }

    #[tokio::test]
    async fn test_url_keys_map_to_valid_file_names() {
        let (store, _temp_dir) = create_test_store();
        let key = "fetch:GET:https://api.example.com/products?page=2";

        store.set(key, &entry(json!([1, 2]))).await.expect("Write should succeed");

        assert!(store.get(key).await.expect("Read should succeed").is_some());
        assert_eq!(store.keys().await.expect("Should list keys"), vec![key.to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported_as_corrupt() {
        let (store, _temp_dir) = create_test_store();
        let path = store.record_path("broken");
        fs::write(&path, "{ not json").expect("Should write garbage");

        let err = store.get("broken").await.expect_err("Corrupt file should fail");

        assert!(err.is_corrupt());
    }

    #[tokio::test]
    async fn test_keys_and_clear_ignore_unrelated_files() {
        let (store, temp_dir) = create_test_store();
        let unrelated = temp_dir.path().join("settings.json");
        fs::write(&unrelated, "{}").expect("Should write unrelated file");

        store.set("a", &entry(json!(1))).await.expect("Write should succeed");
        store.set("b", &entry(json!(2))).await.expect("Write should succeed");

        let mut keys = store.keys().await.expect("Should list keys");
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        store.clear().await.expect("Clear should succeed");

        assert!(store.keys().await.expect("Should list keys").is_empty());
        assert!(unrelated.exists(), "Unrelated data must survive clear");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _temp_dir) = create_test_store();
        store.set("k", &entry(json!(1))).await.expect("Write should succeed");

        store.delete("k").await.expect("First delete should succeed");
        store.delete("k").await.expect("Second delete should succeed");

        assert!(store.get("k").await.expect("Read should succeed").is_none());
    }

    #[tokio::test]
    async fn test_set_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("cache").join("dir");
        let store = FileStore::with_dir(nested_path.clone());

        assert!(store.keys().await.expect("Missing dir lists nothing").is_empty());
        store.set("nested_key", &entry(json!(1))).await.expect("Write should succeed");

        assert!(nested_path.exists(), "Nested directory should be created");
    }

    #[tokio::test]
    async fn test_custom_prefix_partitions_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let first = FileStore::with_dir(temp_dir.path().to_path_buf()).with_prefix("one_");
        let second = FileStore::with_dir(temp_dir.path().to_path_buf()).with_prefix("two_");

        first.set("k", &entry(json!(1))).await.expect("Write should succeed");

        assert!(second.get("k").await.expect("Read should succeed").is_none());
        assert!(second.keys().await.expect("Should list keys").is_empty());
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Some(store) = FileStore::new() {
            let path_str = store.dir().to_string_lossy();
            assert!(
                path_str.contains("tiercache"),
                "Cache path should contain project name"
            );
        }
        // Test passes if new() returns None (e.g., no home directory in CI)
    }

    #[tokio::test]
    async fn test_long_key_fits_in_a_file_name() {
        let (store, _temp_dir) = create_test_store();
        let key = format!("fetch:POST:https://api.example.com/{}", "p".repeat(300));

        store.set(&key, &entry(json!({"id": 1}))).await.expect("Write should succeed");

        let name_len = store
            .record_path(&key)
            .file_name()
            .map(|name| name.len())
            .unwrap_or_default();
        assert_eq!(name_len, "tiercache_".len() + 64 + ".json".len());
        assert!(store.get(&key).await.expect("Read should succeed").is_some());
        assert_eq!(store.keys().await.expect("Should list keys"), vec![key]);
    }

    #[tokio::test]
    async fn test_keys_skip_unreadable_records() {
        let (store, _temp_dir) = create_test_store();
        store.set("good", &entry(json!(1))).await.expect("Write should succeed");
        fs::write(store.record_path("bad"), "{ not json").expect("Should write garbage");

        assert_eq!(store.keys().await.expect("Should list keys"), vec!["good".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_writers_of_one_key_never_publish_torn_files() {
        let (store, _temp_dir) = create_test_store();
        let store = std::sync::Arc::new(store);

        let mut tasks = Vec::new();
        for worker in 0..16 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let payload = json!({"worker": worker, "blob": "x".repeat(200_000)});
                for _ in 0..20 {
                    store.set("k", &entry(payload.clone())).await.expect("Write should succeed");
                    let stored = store
                        .get("k")
                        .await
                        .expect("Read should never see a torn file")
                        .expect("Entry should exist");
                    assert_eq!(stored.value["blob"].as_str().map(str::len), Some(200_000));
                }
            }));
        }
        for task in tasks {
            task.await.expect("Writer should not panic");
        }

        assert_eq!(store.keys().await.expect("Should list keys"), vec!["k".to_string()]);
    }
}
