//! Cache facade over the fast and durable tiers

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::fast::FastTier;
use super::stats::CacheStats;
use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::store::DurableStore;

/// Number of durable records read concurrently during a scan
const SCAN_CONCURRENCY: usize = 8;

/// Per-write options
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live; the cache default applies when `None`
    pub ttl: Option<Duration>,
    /// Labels for later bulk invalidation
    pub tags: Vec<String>,
}

impl SetOptions {
    /// Options with an explicit TTL and no tags
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            tags: Vec::new(),
        }
    }

    /// Adds one tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds several tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired entries dropped from the fast tier
    pub fast_removed: usize,
    /// Expired or corrupt records dropped from the durable tier
    pub durable_removed: usize,
    /// Live durable records dropped to respect `durable_max_entries`
    pub durable_trimmed: usize,
    /// Storage operations that failed and were skipped
    pub errors: usize,
}

impl SweepReport {
    /// Total number of entries removed by the pass
    pub fn removed(&self) -> usize {
        self.fast_removed + self.durable_removed + self.durable_trimmed
    }
}

/// Two-tier cache with TTLs, capacity eviction and tag invalidation
///
/// Construct one per process and share it as `Arc<Cache>`. Every method is
/// infallible from the caller's point of view: durable-tier failures are
/// logged and treated as misses or no-ops.
pub struct Cache {
    config: CacheConfig,
    fast: Mutex<FastTier>,
    durable: Option<Arc<dyn DurableStore>>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("fast_len", &self.len())
            .field("durable", &self.durable.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl Cache {
    /// Creates a cache with only the in-process tier
    pub fn new(config: CacheConfig) -> Self {
        Self {
            fast: Mutex::new(FastTier::new(config.max_size)),
            config,
            durable: None,
            clock: Arc::new(SystemClock),
            stats: CacheStats::new(),
        }
    }

    /// Creates a cache backed by a durable store
    pub fn with_store(config: CacheConfig, store: Arc<dyn DurableStore>) -> Self {
        Self {
            durable: Some(store),
            ..Self::new(config)
        }
    }

    /// Replaces the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configuration this cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Hit/miss/eviction counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of entries currently held by the fast tier
    pub fn len(&self) -> usize {
        self.fast.lock().len()
    }

    /// Whether the fast tier is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the fast tier holds `key` (fresh or not)
    pub fn contains_fast(&self, key: &str) -> bool {
        self.fast.lock().contains(key)
    }

    /// Discards the fast tier, keeping durable records
    ///
    /// Leaves the cache in the state a fresh process would find it in.
    pub fn drop_fast_tier(&self) {
        self.fast.lock().clear();
    }

    /// Logical keys currently held by the durable tier
    pub async fn durable_keys(&self) -> Vec<String> {
        let Some(store) = &self.durable else {
            return Vec::new();
        };
        match store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(store = store.name(), error = %e, "Failed to list durable keys");
                Vec::new()
            }
        }
    }

    /// Reads a fresh value for `key`
    ///
    /// Checks the fast tier, then the durable tier. A durable hit is promoted
    /// into the fast tier. Expired entries are deleted from both tiers and
    /// reported as a miss, as are values that do not decode into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();

        let fast_hit = {
            let fast = self.fast.lock();
            fast.get(key).map(|entry| {
                if entry.is_expired(now) {
                    None
                } else {
                    Some(entry.value.clone())
                }
            })
        };

        match fast_hit {
            Some(Some(value)) => return self.decode_hit(key, value),
            Some(None) => {
                debug!(key, "Fast tier entry expired");
                self.expire(key, now).await;
                self.stats.record_miss();
                return None;
            }
            None => {}
        }

        let Some(store) = &self.durable else {
            self.stats.record_miss();
            return None;
        };

        match store.get(key).await {
            Ok(Some(entry)) if entry.is_expired(now) => {
                debug!(key, store = store.name(), "Durable entry expired");
                self.expire(key, now).await;
                self.stats.record_miss();
                None
            }
            Ok(Some(entry)) => {
                let value = entry.value.clone();
                self.promote(key, entry).await;
                self.decode_hit(key, value)
            }
            Ok(None) => {
                self.stats.record_miss();
                None
            }
            Err(e) => {
                self.handle_read_error(store.as_ref(), key, e).await;
                self.stats.record_miss();
                None
            }
        }
    }

    /// Stores `value` under `key` in both tiers
    ///
    /// When the fast tier is full and `key` is new, the oldest inserted key is
    /// evicted from both tiers first. The fast tier is updated before the
    /// durable write starts, so a following `get` always sees this value.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: SetOptions) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Value is not serializable; not cached");
                return;
            }
        };

        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let tags: BTreeSet<String> = options.tags.into_iter().collect();
        let entry = CacheEntry::new(value, self.clock.now(), ttl, tags);

        let evicted = self.fast.lock().insert(key.to_string(), entry.clone());
        self.stats.record_insert();

        if let Some(victim) = evicted {
            debug!(key = %victim, "Evicted oldest entry");
            self.stats.record_eviction();
            self.durable_delete(&victim).await;
        }

        if let Some(store) = &self.durable {
            if let Err(e) = store.set(key, &entry).await {
                warn!(store = store.name(), key, error = %e, "Durable write failed; fast tier only");
            }
        }
    }

    /// Removes `key` from both tiers; missing keys are ignored
    pub async fn delete(&self, key: &str) {
        self.fast.lock().remove(key);
        self.durable_delete(key).await;
    }

    /// Removes every entry from both tiers
    pub async fn clear(&self) {
        self.fast.lock().clear();
        if let Some(store) = &self.durable {
            if let Err(e) = store.clear().await {
                warn!(store = store.name(), error = %e, "Failed to clear durable tier");
            }
        }
    }

    /// Removes every entry in either tier tagged with `tag`
    ///
    /// Scans all stored entries. Returns the number of distinct keys removed.
    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut doomed: BTreeSet<String> = self.fast.lock().keys_with_tag(tag).into_iter().collect();

        if let Some(store) = &self.durable {
            let keys = match store.keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(store = store.name(), error = %e, "Failed to list durable keys");
                    Vec::new()
                }
            };
            for (key, result) in scan_durable(store, keys).await {
                match result {
                    Ok(Some(entry)) if entry.has_tag(tag) => {
                        doomed.insert(key);
                    }
                    Ok(_) => {}
                    Err(e) => self.handle_read_error(store.as_ref(), &key, e).await,
                }
            }
        }

        for key in &doomed {
            self.fast.lock().remove(key);
            self.durable_delete(key).await;
        }

        debug!(tag, removed = doomed.len(), "Invalidated by tag");
        doomed.len()
    }

    /// Runs one sweep over both tiers
    ///
    /// Deletes every entry with `expires_at <= now`, drops corrupt durable
    /// records and, when `durable_max_entries` is set, trims the durable tier
    /// to that size starting with the entries that expire first. Storage errors
    /// are counted and skipped.
    pub async fn purge_expired(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut expired: BTreeSet<String> = BTreeSet::new();

        {
            let mut fast = self.fast.lock();
            for key in fast.expired_keys(now) {
                fast.remove(&key);
                report.fast_removed += 1;
                expired.insert(key);
            }
        }

        if let Some(store) = &self.durable {
            self.sweep_durable(store, now, &mut report, &mut expired).await;
        }

        self.stats.record_expirations(expired.len() as u64);

        if report.removed() > 0 || report.errors > 0 {
            info!(
                fast_removed = report.fast_removed,
                durable_removed = report.durable_removed,
                durable_trimmed = report.durable_trimmed,
                errors = report.errors,
                "Cache sweep finished"
            );
        } else {
            debug!("Cache sweep found nothing to remove");
        }
        report
    }

    async fn sweep_durable(
        &self,
        store: &Arc<dyn DurableStore>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
        expired: &mut BTreeSet<String>,
    ) {
        let keys = match store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(store = store.name(), error = %e, "Sweep could not list durable keys");
                report.errors += 1;
                return;
            }
        };

        let mut live: Vec<(String, DateTime<Utc>)> = Vec::new();
        for (key, result) in scan_durable(store, keys).await {
            match result {
                // A fresh fast entry means the record was rewritten after the scan
                Ok(Some(entry)) if entry.is_expired(now) && self.has_fresh(&key, now) => {}
                Ok(Some(entry)) if entry.is_expired(now) => match store.delete(&key).await {
                    Ok(()) => {
                        report.durable_removed += 1;
                        expired.insert(key);
                    }
                    Err(e) => {
                        warn!(store = store.name(), key = %key, error = %e, "Sweep failed to delete entry");
                        report.errors += 1;
                    }
                },
                Ok(Some(entry)) => live.push((key, entry.expires_at)),
                Ok(None) => {}
                Err(e) if e.is_corrupt() => {
                    warn!(store = store.name(), key = %key, error = %e, "Sweep dropping corrupt record");
                    match store.delete(&key).await {
                        Ok(()) => report.durable_removed += 1,
                        Err(_) => report.errors += 1,
                    }
                }
                Err(e) => {
                    warn!(store = store.name(), key = %key, error = %e, "Sweep failed to read entry");
                    report.errors += 1;
                }
            }
        }

        let Some(max) = self.config.durable_max_entries else {
            return;
        };
        if live.len() <= max {
            return;
        }

        live.sort_by_key(|(_, expires_at)| *expires_at);
        let excess = live.len() - max;
        for (key, _) in live.into_iter().take(excess) {
            match store.delete(&key).await {
                Ok(()) => {
                    self.fast.lock().remove(&key);
                    report.durable_trimmed += 1;
                }
                Err(e) => {
                    warn!(store = store.name(), key = %key, error = %e, "Failed to trim durable entry");
                    report.errors += 1;
                }
            }
        }
    }

    /// Copies a durable hit into the fast tier unless a newer write got there first
    async fn promote(&self, key: &str, entry: CacheEntry<Value>) {
        let evicted = {
            let mut fast = self.fast.lock();
            if fast.contains(key) {
                return;
            }
            fast.insert(key.to_string(), entry)
        };

        if let Some(victim) = evicted {
            debug!(key = %victim, "Evicted oldest entry during promotion");
            self.stats.record_eviction();
            self.durable_delete(&victim).await;
        }
    }

    /// Drops an entry found expired at `now`, unless a newer write replaced it
    async fn expire(&self, key: &str, now: DateTime<Utc>) {
        {
            let mut fast = self.fast.lock();
            match fast.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    debug!(key, "Entry rewritten while expiring; keeping it");
                    return;
                }
                Some(_) => {
                    fast.remove(key);
                }
                None => {}
            }
        }
        self.durable_delete(key).await;
        self.stats.record_expirations(1);
    }

    /// Whether the fast tier holds a fresh entry for `key`
    fn has_fresh(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.fast
            .lock()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    async fn durable_delete(&self, key: &str) {
        if let Some(store) = &self.durable {
            if let Err(e) = store.delete(key).await {
                warn!(store = store.name(), key, error = %e, "Durable delete failed");
            }
        }
    }

    /// Logs a durable read failure; corrupt records are deleted
    async fn handle_read_error(&self, store: &dyn DurableStore, key: &str, e: StorageError) {
        if e.is_corrupt() {
            warn!(store = store.name(), key, error = %e, "Dropping corrupt durable record");
            if let Err(e) = store.delete(key).await {
                warn!(store = store.name(), key, error = %e, "Failed to drop corrupt record");
            }
        } else {
            warn!(store = store.name(), key, error = %e, "Durable read failed; treating as miss");
        }
    }

    fn decode_hit<T: DeserializeOwned>(&self, key: &str, value: Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(value) => {
                self.stats.record_hit();
                Some(value)
            }
            Err(e) => {
                debug!(key, error = %e, "Cached value has a different shape; treating as miss");
                self.stats.record_miss();
                None
            }
        }
    }
}

/// Reads the durable records for `keys`, a few at a time
async fn scan_durable(
    store: &Arc<dyn DurableStore>,
    keys: Vec<String>,
) -> Vec<(String, Result<Option<CacheEntry<Value>>, StorageError>)> {
    stream::iter(keys)
        .map(|key| async move {
            let result = store.get(&key).await;
            (key, result)
        })
        .buffer_unordered(SCAN_CONCURRENCY)
        .collect()
        .await
}
