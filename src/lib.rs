//! tiercache
//!
//! A two-tier cache for client applications: a bounded in-process map in front
//! of a durable key/value store, with per-entry TTLs, tag-based bulk
//! invalidation, a background sweeper and a cache-aware JSON fetch wrapper.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiercache::cache::{Cache, CacheConfig, SetOptions};
//! use tiercache::store::FileStore;
//!
//! # async fn example() {
//! let store = Arc::new(FileStore::with_dir("/tmp/tiercache".into()));
//! let cache = Arc::new(Cache::with_store(CacheConfig::default(), store));
//!
//! cache
//!     .set("p1", &serde_json::json!({"id": 1}), SetOptions::ttl(Duration::from_secs(5)).with_tag("products"))
//!     .await;
//! let product: Option<serde_json::Value> = cache.get("p1").await;
//! cache.invalidate_by_tag("products").await;
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod clock;
pub mod error;
pub mod fetch;
pub mod store;
pub mod sweeper;
pub mod telemetry;

pub use cache::{Cache, CacheConfig, SetOptions};
pub use error::{FetchError, StorageError};
pub use fetch::{CachedFetcher, FetchOptions};
pub use store::{DurableStore, FileStore, SqliteStore, StoreKind};
pub use sweeper::SweepHandle;
