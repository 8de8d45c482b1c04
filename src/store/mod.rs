//! Durable storage tier
//!
//! A `DurableStore` persists cache entries across process restarts. Two
//! implementations are provided:
//!
//! - [`FileStore`]: one JSON file per entry in a directory (flat, synchronous)
//! - [`SqliteStore`]: a SQLite table of records (larger capacity, blocking pool)
//!
//! Every record is namespaced under a reserved prefix so a store can share its
//! medium with unrelated data; `keys()` strips the prefix again.

mod file;
mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::CacheEntry;
use crate::error::StorageError;

pub use file::FileStore;
pub use sqlite::SqliteStore;

/// Reserved prefix for every record a durable store writes
pub const DEFAULT_KEY_PREFIX: &str = "tiercache_";

/// Key/value persistence used as the cache's durable tier
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Reads the entry stored under `key`
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Value>>, StorageError>;

    /// Stores `entry` under `key`, replacing any previous record
    async fn set(&self, key: &str, entry: &CacheEntry<Value>) -> Result<(), StorageError>;

    /// Removes the record for `key`; missing keys are not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Removes every record this store owns
    async fn clear(&self) -> Result<(), StorageError>;

    /// Lists the logical keys of every stored record
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Which durable backend to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// JSON files in a directory
    Flat {
        /// Directory holding the files
        dir: PathBuf,
    },
    /// SQLite database file
    Sqlite {
        /// Path of the database file
        path: PathBuf,
    },
}

/// Opens the configured backend with the default key prefix
pub fn open_store(kind: &StoreKind) -> Result<Arc<dyn DurableStore>, StorageError> {
    match kind {
        StoreKind::Flat { dir } => Ok(Arc::new(FileStore::with_dir(dir.clone()))),
        StoreKind::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path)?)),
    }
}
