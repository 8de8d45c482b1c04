//! Cache-aware fetch wrapper
//!
//! [`CachedFetcher`] serves JSON responses from a [`Cache`] and only touches
//! the network on a miss or a forced refresh. Failed requests and non-2xx
//! answers are returned to the caller and never cached.

mod key;
mod transport;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::cache::{Cache, SetOptions};
use crate::error::FetchError;

pub use key::cache_key;
pub use transport::{FetchRequest, FetchResponse, ReqwestTransport, Transport};

/// Request and caching options for one fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// HTTP method; `GET` when unset
    pub method: Option<String>,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Request body
    pub body: Option<String>,
    /// TTL for the cached response; the cache default applies when unset
    pub cache_ttl: Option<Duration>,
    /// Tags attached to the cached response
    pub cache_tags: Vec<String>,
    /// Skip the cache read but still store the fresh response
    pub force_refresh: bool,
    /// Let concurrent misses on the same key share one request
    pub dedupe_in_flight: bool,
}

impl FetchOptions {
    /// Sets the HTTP method
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Adds a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the request body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the cache TTL
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Adds a cache tag
    pub fn cache_tag(mut self, tag: impl Into<String>) -> Self {
        self.cache_tags.push(tag.into());
        self
    }

    /// Bypasses the cache read
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// Collapses concurrent misses on the same key
    pub fn dedupe_in_flight(mut self) -> Self {
        self.dedupe_in_flight = true;
        self
    }

    fn method_or_default(&self) -> String {
        self.method
            .as_deref()
            .unwrap_or("GET")
            .to_ascii_uppercase()
    }
}

/// Fetches JSON through a cache
pub struct CachedFetcher {
    cache: Arc<Cache>,
    transport: Arc<dyn Transport>,
    /// Per-key locks used when `dedupe_in_flight` is set
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CachedFetcher {
    /// Creates a fetcher over `cache` using `transport` for network I/O
    pub fn new(cache: Arc<Cache>, transport: Arc<dyn Transport>) -> Self {
        Self {
            cache,
            transport,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a fetcher that sends requests with a default reqwest client
    pub fn with_reqwest(cache: Arc<Cache>) -> Self {
        Self::new(cache, Arc::new(ReqwestTransport::new()))
    }

    /// The cache responses are stored in
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// The cache key a request with these options maps to
    pub fn key_for(&self, url: &str, options: &FetchOptions) -> String {
        cache_key(
            &options.method_or_default(),
            url,
            &options.headers,
            options.body.as_deref(),
        )
    }

    /// Fetches `url`, serving from the cache when a fresh response exists
    ///
    /// # Returns
    /// * `Ok(T)` - The cached or freshly fetched body decoded as `T`
    /// * `Err(FetchError)` - If the request fails, answers non-2xx, or the
    ///   body does not decode
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> Result<T, FetchError> {
        let key = self.key_for(url, &options);

        let body = if options.dedupe_in_flight {
            let slot = self.key_lock(&key);
            let _guard = slot.lock.lock().await;
            self.fetch_value(&key, url, &options).await?
        } else {
            self.fetch_value(&key, url, &options).await?
        };

        Ok(serde_json::from_value(body)?)
    }

    async fn fetch_value(
        &self,
        key: &str,
        url: &str,
        options: &FetchOptions,
    ) -> Result<Value, FetchError> {
        if !options.force_refresh {
            if let Some(value) = self.cache.get::<Value>(key).await {
                debug!(url, "Serving response from cache");
                return Ok(value);
            }
        }

        let request = FetchRequest {
            method: options.method_or_default(),
            url: url.to_string(),
            headers: options.headers.clone(),
            body: options.body.clone(),
        };
        debug!(url, method = %request.method, force = options.force_refresh, "Fetching from network");

        let response = self.transport.send(&request).await?;
        if !response.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        let value: Value = serde_json::from_str(&response.body)?;
        let set_options = SetOptions {
            ttl: options.cache_ttl,
            tags: options.cache_tags.clone(),
        };
        self.cache.set(key, &value, set_options).await;

        Ok(value)
    }

    fn key_lock<'a>(&'a self, key: &'a str) -> InFlightSlot<'a> {
        let mut in_flight = self.in_flight.lock();
        let lock = Arc::clone(in_flight.entry(key.to_string()).or_default());
        InFlightSlot {
            in_flight: &self.in_flight,
            key,
            lock,
        }
    }
}

/// A caller's share of a per-key lock
///
/// Dropping the last share removes the map entry, including when the fetch
/// future is cancelled.
struct InFlightSlot<'a> {
    in_flight: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        // Only the map and this share left: nobody is waiting
        let idle = in_flight
            .get(self.key)
            .is_some_and(|held| Arc::ptr_eq(held, &self.lock) && Arc::strong_count(&self.lock) <= 2);
        if idle {
            in_flight.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticTransport {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn send(&self, _request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResponse {
                status: self.status,
                body: self.body.to_string(),
            })
        }
    }

    fn fetcher(status: u16, body: &'static str) -> (CachedFetcher, Arc<StaticTransport>) {
        let transport = Arc::new(StaticTransport {
            status,
            body,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(Cache::new(CacheConfig::default()));
        (CachedFetcher::new(cache, transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let (fetcher, transport) = fetcher(200, r#"{"id": 1}"#);

        let first: Value = fetcher
            .fetch("https://x/p/1", FetchOptions::default())
            .await
            .expect("First fetch should succeed");
        let second: Value = fetcher
            .fetch("https://x/p/1", FetchOptions::default())
            .await
            .expect("Second fetch should succeed");

        assert_eq!(first, json!({"id": 1}));
        assert_eq!(first, second);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_status_is_not_cached() {
        let (fetcher, transport) = fetcher(404, r#"{"error": "missing"}"#);

        for _ in 0..2 {
            let err = fetcher
                .fetch::<Value>("https://x/p/404", FetchOptions::default())
                .await
                .expect_err("404 should fail");
            assert!(matches!(err, FetchError::Status { status: 404, .. }));
        }

        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert!(fetcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_non_json_body_is_a_parse_error_and_not_cached() {
        let (fetcher, _transport) = fetcher(200, "<html>");

        let err = fetcher
            .fetch::<Value>("https://x/page", FetchOptions::default())
            .await
            .expect_err("HTML should not parse");

        assert!(matches!(err, FetchError::Parse(_)));
        assert!(fetcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_key_lock_is_released_after_fetch() {
        let (fetcher, _transport) = fetcher(200, "[]");

        let _: Value = fetcher
            .fetch("https://x/list", FetchOptions::default().dedupe_in_flight())
            .await
            .expect("Fetch should succeed");

        assert!(fetcher.in_flight.lock().is_empty());
    }

    struct SlowTransport;

    #[async_trait]
    impl Transport for SlowTransport {
        async fn send(&self, _request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(FetchResponse {
                status: 200,
                body: "[]".to_string(),
            })
        }
    }

    fn slow_fetcher() -> CachedFetcher {
        let cache = Arc::new(Cache::new(CacheConfig::default()));
        CachedFetcher::new(cache, Arc::new(SlowTransport))
    }

    #[tokio::test]
    async fn test_cancelled_fetch_releases_key_lock() {
        let fetcher = slow_fetcher();

        let result = tokio::time::timeout(
            Duration::from_millis(10),
            fetcher.fetch::<Value>("https://x/slow", FetchOptions::default().dedupe_in_flight()),
        )
        .await;

        assert!(result.is_err(), "Fetch should have timed out");
        assert!(fetcher.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_lock_to_holder() {
        let fetcher = slow_fetcher();
        let options = FetchOptions::default().dedupe_in_flight();

        let (holder, waiter) = tokio::join!(
            fetcher.fetch::<Value>("https://x/slow", options.clone()),
            tokio::time::timeout(
                Duration::from_millis(10),
                fetcher.fetch::<Value>("https://x/slow", options.clone()),
            ),
        );

        assert_eq!(holder.expect("Holder should finish"), json!([]));
        assert!(waiter.is_err(), "Waiter should have timed out");
        assert!(fetcher.in_flight.lock().is_empty());
    }

    #[test]
    fn test_key_for_defaults_to_get() {
        let (fetcher, _transport) = fetcher(200, "[]");
        assert_eq!(
            fetcher.key_for("https://x/list", &FetchOptions::default()),
            "fetch:GET:https://x/list"
        );
        assert_eq!(
            fetcher.key_for("https://x/list", &FetchOptions::default().method("get")),
            "fetch:GET:https://x/list"
        );
    }
}
