//! Tiered cache
//!
//! The [`Cache`] facade keeps a bounded in-process fast tier in front of an
//! optional [`DurableStore`](crate::store::DurableStore). Entries carry an
//! absolute expiry and a tag set; expired entries are dropped lazily on read
//! and proactively by [`Cache::purge_expired`]. Durable failures never reach
//! the caller, they only lower the hit rate.

mod config;
mod entry;
mod facade;
mod fast;
mod stats;

pub use config::{CacheConfig, DEFAULT_MAX_SIZE, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
pub use entry::{CacheEntry, MAX_TTL};
pub use facade::{Cache, SetOptions, SweepReport};
pub use stats::CacheStats;
