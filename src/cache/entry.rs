//! Cache entry stored in both tiers

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A cached value with its expiry and invalidation tags
///
/// `expires_at` is fixed when the entry is built; refreshing a value means
/// building a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached data
    pub value: T,
    /// When the entry was written
    pub cached_at: DateTime<Utc>,
    /// When the entry expires
    pub expires_at: DateTime<Utc>,
    /// Labels used for bulk invalidation
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Longest TTL an entry can carry; keeps `expires_at` a four-digit year
pub const MAX_TTL: std::time::Duration = std::time::Duration::from_secs(100 * 364 * 24 * 60 * 60);

impl<T> CacheEntry<T> {
    /// Builds an entry written at `now` that lives for `ttl` (at most [`MAX_TTL`])
    pub fn new(value: T, now: DateTime<Utc>, ttl: std::time::Duration, tags: BTreeSet<String>) -> Self {
        let ttl = Duration::from_std(ttl.min(MAX_TTL)).unwrap_or_else(|_| Duration::weeks(52 * 100));
        Self {
            value,
            cached_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            tags,
        }
    }

    /// An entry is expired once `now` reaches `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the entry carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_expires_at_is_now_plus_ttl() {
        let now = Utc::now();
        let entry = CacheEntry::new(1, now, StdDuration::from_secs(5), BTreeSet::new());
        assert_eq!(entry.expires_at - now, Duration::seconds(5));
        assert_eq!(entry.cached_at, now);
    }

    #[test]
    fn test_entry_is_expired_exactly_at_expiry() {
        let now = Utc::now();
        let entry = CacheEntry::new("v", now, StdDuration::from_secs(5), BTreeSet::new());

        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + Duration::milliseconds(4999)));
        assert!(entry.is_expired(now + Duration::seconds(5)));
        assert!(entry.is_expired(now + Duration::seconds(6)));
    }

    #[test]
    fn test_zero_ttl_is_expired_immediately() {
        let now = Utc::now();
        let entry = CacheEntry::new("v", now, StdDuration::ZERO, BTreeSet::new());
        assert!(entry.is_expired(now));
    }

    #[test]
    fn test_huge_ttl_is_capped() {
        let now = Utc::now();
        let entry = CacheEntry::new("v", now, StdDuration::MAX, BTreeSet::new());

        assert_eq!(entry.expires_at - now, Duration::from_std(MAX_TTL).unwrap());
        assert!(DateTime::parse_from_rfc3339(&entry.expires_at.to_rfc3339()).is_ok());
    }

    #[test]
    fn test_has_tag() {
        let entry = CacheEntry::new(0, Utc::now(), StdDuration::from_secs(1), tags(&["x", "y"]));
        assert!(entry.has_tag("x"));
        assert!(entry.has_tag("y"));
        assert!(!entry.has_tag("z"));
    }

    #[test]
    fn test_missing_tags_deserialize_as_empty() {
        let json = r#"{"value":1,"cached_at":"2026-01-01T00:00:00Z","expires_at":"2026-01-01T00:05:00Z"}"#;
        let entry: CacheEntry<i32> = serde_json::from_str(json).expect("Should parse entry");
        assert!(entry.tags.is_empty());
        assert_eq!(entry.value, 1);
    }
}
