//! SQLite record store
//!
//! Holds entries as structured rows in a single table. Each operation runs on
//! tokio's blocking pool against a mutex-guarded connection.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{DurableStore, DEFAULT_KEY_PREFIX};
use crate::cache::CacheEntry;
use crate::error::StorageError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    tags TEXT NOT NULL
)";

/// Row as stored, before decoding
struct RawRecord {
    value: String,
    cached_at: String,
    expires_at: String,
    tags: String,
}

/// Durable store backed by a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    prefix: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    /// Replaces the reserved key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn stored_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            op(&conn)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

fn parse_time(key: &str, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

fn decode(key: &str, raw: RawRecord) -> Result<CacheEntry<Value>, StorageError> {
    let corrupt = |e: serde_json::Error| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    };

    let value: Value = serde_json::from_str(&raw.value).map_err(corrupt)?;
    let tags: BTreeSet<String> = serde_json::from_str(&raw.tags).map_err(corrupt)?;

    Ok(CacheEntry {
        value,
        cached_at: parse_time(key, &raw.cached_at)?,
        expires_at: parse_time(key, &raw.expires_at)?,
        tags,
    })
}

#[async_trait]
impl DurableStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Value>>, StorageError> {
        let stored_key = self.stored_key(key);
        let raw = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT value, cached_at, expires_at, tags FROM cache_entries WHERE key = ?1",
                    params![stored_key],
                    |row| {
                        Ok(RawRecord {
                            value: row.get(0)?,
                            cached_at: row.get(1)?,
                            expires_at: row.get(2)?,
                            tags: row.get(3)?,
                        })
                    },
                )
                .optional()
                .map_err(StorageError::from)
            })
            .await?;

        raw.map(|raw| decode(key, raw)).transpose()
    }

    async fn set(&self, key: &str, entry: &CacheEntry<Value>) -> Result<(), StorageError> {
        let stored_key = self.stored_key(key);
        let value = serde_json::to_string(&entry.value)?;
        let tags = serde_json::to_string(&entry.tags)?;
        let cached_at = entry.cached_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let expires_at = entry.expires_at.to_rfc3339_opts(SecondsFormat::Nanos, true);

        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries (key, value, cached_at, expires_at, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![stored_key, value, cached_at, expires_at, tags],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let stored_key = self.stored_key(key);
        self.run(move |conn| {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![stored_key])?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let prefix = self.prefix.clone();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM cache_entries WHERE substr(key, 1, ?1) = ?2",
                params![prefix.chars().count() as i64, prefix],
            )?;
            Ok(())
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let prefix = self.prefix.clone();
        self.run(move |conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM cache_entries WHERE substr(key, 1, ?1) = ?2")?;
            let rows = stmt.query_map(params![prefix.chars().count() as i64, &prefix], |row| {
                row.get::<_, String>(0)
            })?;

            let mut keys = Vec::new();
            for stored in rows {
                let stored = stored?;
                if let Some(key) = stored.strip_prefix(&prefix) {
                    keys.push(key.to_string());
                }
            }
            Ok(keys)
        })
        .await
    }
}
