//! In-process fast tier
//!
//! A map plus an insertion-order queue. When full, inserting a new key evicts
//! the key that was inserted first; overwriting a key keeps its position.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::entry::CacheEntry;

pub(crate) struct FastTier {
    entries: HashMap<String, CacheEntry<Value>>,
    insertion_order: VecDeque<String>,
    capacity: usize,
}

impl FastTier {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            insertion_order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&CacheEntry<Value>> {
        self.entries.get(key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts an entry, returning the key evicted to make room
    pub(crate) fn insert(&mut self, key: String, entry: CacheEntry<Value>) -> Option<String> {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = entry;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        self.insertion_order.push_back(key.clone());
        self.entries.insert(key, entry);
        evicted
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheEntry<Value>> {
        let entry = self.entries.remove(key)?;
        if let Some(pos) = self.insertion_order.iter().position(|k| k == key) {
            self.insertion_order.remove(pos);
        }
        Some(entry)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn keys_with_tag(&self, tag: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.has_tag(tag))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn evict_oldest(&mut self) -> Option<String> {
        while let Some(oldest) = self.insertion_order.pop_front() {
            if self.entries.remove(&oldest).is_some() {
                return Some(oldest);
            }
        }
        None
    }
}
