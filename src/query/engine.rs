use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::ApiResponse;

/// Default time before a cached entry is discarded outright.
/// Matches the web front end's five-minute cache window.
const DEFAULT_CACHE_MINUTES: i64 = 5;

/// Per-call behavior of [`QueryCache::get`].
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// When false, no fetch is attempted and the last-known state is
    /// returned unchanged.
    pub enabled: bool,
    /// Age past which an entry is treated as absent (lazy eviction).
    pub cache_time: Duration,
    /// Age past which an entry is still served but considered outdated
    /// for display-freshness purposes.
    pub stale_time: Duration,
    /// Whether a stale hit triggers a background refresh.
    pub refetch_on_mount: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_time: Duration::minutes(DEFAULT_CACHE_MINUTES),
            stale_time: Duration::zero(),
            refetch_on_mount: true,
        }
    }
}

/// Snapshot returned to consumers.
///
/// `loading` is true only while a blocking fetch is in flight (no data
/// to show yet); `is_fetching` is true during a background refresh
/// while stale data is still on screen.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub is_fetching: bool,
    pub error: Option<String>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            is_fetching: false,
            error: None,
        }
    }
}

/// Transient per-key fetch flags. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct FetchState {
    pub loading: bool,
    pub is_fetching: bool,
    pub error: Option<String>,
}

/// Key matcher for bulk invalidation.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Matches every key containing the substring.
    Substring(String),
    /// Matches every key the regex matches.
    Regex(Regex),
}

impl KeyPattern {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Substring(s) => key.contains(s.as_str()),
            KeyPattern::Regex(re) => re.is_match(key),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    timestamp: DateTime<Utc>,
    // Recorded at write time so snapshot reads without per-call options
    // can still treat an outlived entry as absent.
    cache_time: Duration,
}

struct CacheInner {
    entries: Mutex<HashMap<String, CacheEntry>>,
    states: Mutex<HashMap<String, FetchState>>,
    // One async mutex per key enforces at most one fetch in flight.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CacheInner {
    /// Return the entry for `key` if it has not outlived its cache
    /// time - the caller's when given, otherwise the one recorded at
    /// write time. An expired entry is dropped on this read, not
    /// proactively swept.
    fn live_entry(&self, key: &str, cache_time: Option<Duration>) -> Option<CacheEntry> {
        let mut entries = lock(&self.entries);
        let expired = match entries.get(key) {
            Some(entry) => {
                let limit = cache_time.unwrap_or(entry.cache_time);
                Utc::now().signed_duration_since(entry.timestamp) > limit
            }
            None => return None,
        };
        if expired {
            debug!(key, "cache entry expired, evicting");
            entries.remove(key);
            return None;
        }
        entries.get(key).cloned()
    }

    fn store_entry(&self, key: &str, value: serde_json::Value, cache_time: Duration) {
        let mut entries = lock(&self.entries);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                timestamp: Utc::now(),
                cache_time,
            },
        );
    }

    fn remove_entry(&self, key: &str) {
        lock(&self.entries).remove(key);
    }

    fn fetch_state(&self, key: &str) -> FetchState {
        lock(&self.states).get(key).cloned().unwrap_or_default()
    }

    /// Mark a fetch as started. A blocking fetch raises `loading`, a
    /// background refresh raises `is_fetching`; either way a previous
    /// error is cleared.
    fn begin(&self, key: &str, blocking: bool) {
        let mut states = lock(&self.states);
        let state = states.entry(key.to_string()).or_default();
        if blocking {
            state.loading = true;
        } else {
            state.is_fetching = true;
        }
        state.error = None;
    }

    fn settle(&self, key: &str, error: Option<String>) {
        let mut states = lock(&self.states);
        let state = states.entry(key.to_string()).or_default();
        state.loading = false;
        state.is_fetching = false;
        state.error = error;
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = lock(&self.locks);
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

/// Keyed, TTL-based cache for asynchronous fetch results.
///
/// Clone is cheap; clones share the same entries. Construct one per
/// composition root and pass it to whatever owns consumer lifetimes.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve `key` against the cache, fetching as needed.
    ///
    /// - fresh hit: cached data, no fetch
    /// - stale hit: cached data immediately, background refresh spawned
    ///   (`is_fetching` true on the returned snapshot)
    /// - miss or expired: blocking fetch before returning
    ///
    /// A failed fetch preserves previously cached data and surfaces the
    /// failure in `error`.
    pub async fn get<T, F, Fut>(&self, key: &str, fetch_fn: F, options: QueryOptions) -> QueryState<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResponse<T>> + Send + 'static,
    {
        if !options.enabled {
            return self.state(key);
        }

        if let Some(entry) = self.inner.live_entry(key, Some(options.cache_time)) {
            match serde_json::from_value::<T>(entry.value.clone()) {
                Ok(data) => {
                    let age = Utc::now().signed_duration_since(entry.timestamp);
                    if age > options.stale_time && options.refetch_on_mount {
                        self.spawn_refetch(key, fetch_fn, options.cache_time);
                    }
                    let flags = self.inner.fetch_state(key);
                    return QueryState {
                        data: Some(data),
                        loading: false,
                        is_fetching: flags.is_fetching,
                        error: flags.error,
                    };
                }
                Err(e) => {
                    // Entry was written for a different type; treat as a miss.
                    warn!(key, error = %e, "cached value failed to decode, refetching");
                    self.inner.remove_entry(key);
                }
            }
        }

        self.fetch_blocking(key, &fetch_fn, options.cache_time).await
    }

    /// Force a non-blocking background refresh regardless of staleness.
    /// Returns the current snapshot; the refreshed data lands in the
    /// cache and is visible on the next read.
    pub fn refetch<T, F, Fut>(&self, key: &str, fetch_fn: F) -> QueryState<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResponse<T>> + Send + 'static,
    {
        self.spawn_refetch(key, fetch_fn, Duration::minutes(DEFAULT_CACHE_MINUTES));
        self.state(key)
    }

    /// Drop the cached entry and fetch fresh data before returning.
    pub async fn invalidate<T, F, Fut>(&self, key: &str, fetch_fn: F) -> QueryState<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResponse<T>> + Send + 'static,
    {
        self.inner.remove_entry(key);
        self.fetch_blocking(key, &fetch_fn, Duration::minutes(DEFAULT_CACHE_MINUTES))
            .await
    }

    /// Remove every cached entry whose key matches `pattern`. Used for
    /// bulk invalidation after a mutation touches many queries, e.g.
    /// every "recipes:" list after a recipe is created. Returns the
    /// number of entries removed.
    pub fn invalidate_by_pattern(&self, pattern: &KeyPattern) -> usize {
        let removed: Vec<String> = {
            let mut entries = lock(&self.inner.entries);
            let keys: Vec<String> = entries
                .keys()
                .filter(|k| pattern.matches(k))
                .cloned()
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };
        let mut states = lock(&self.inner.states);
        for key in &removed {
            states.remove(key);
        }
        debug!(count = removed.len(), "invalidated by pattern");
        removed.len()
    }

    /// Populate the cache ahead of any consumer request, overwriting an
    /// existing entry unconditionally.
    pub async fn prefetch<T, F, Fut>(&self, key: &str, fetch_fn: F) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = ApiResponse<T>>,
    {
        let key_lock = self.inner.key_lock(key);
        let _guard = key_lock.lock().await;

        let response = fetch_fn().await;
        // Settle the per-key flags either way: a background refetch
        // that found this prefetch in flight bailed out expecting the
        // lock holder to clear them.
        match response {
            ApiResponse {
                success: true,
                data: Some(data),
                ..
            } => {
                let value = serde_json::to_value(&data)?;
                self.inner
                    .store_entry(key, value, Duration::minutes(DEFAULT_CACHE_MINUTES));
                self.inner.settle(key, None);
                Ok(data)
            }
            resp => {
                let msg = resp.error_message();
                warn!(key, error = %msg, "prefetch failed");
                self.inner.settle(key, Some(msg.clone()));
                Err(anyhow::anyhow!(msg))
            }
        }
    }

    /// Current snapshot for `key` without triggering any fetch. An
    /// entry that has outlived the cache time it was written with is
    /// treated as absent, as on the `get` path.
    pub fn state<T: DeserializeOwned>(&self, key: &str) -> QueryState<T> {
        let flags = self.inner.fetch_state(key);
        QueryState {
            data: self.cached_data(key),
            loading: flags.loading,
            is_fetching: flags.is_fetching,
            error: flags.error,
        }
    }

    /// Drop every cached entry and all fetch flags.
    pub fn clear(&self) {
        lock(&self.inner.entries).clear();
        lock(&self.inner.states).clear();
    }

    /// Number of cached entries, counting not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode the entry for `key` if it is still live against the
    /// cache time recorded when it was written; an expired entry is
    /// treated as absent, same as on the `get` path.
    fn cached_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner
            .live_entry(key, None)
            .and_then(|entry| serde_json::from_value(entry.value).ok())
    }

    /// Blocking fetch path. Serialized per key: a caller that finds a
    /// fetch already in flight waits for it and reuses its result
    /// instead of fetching again.
    async fn fetch_blocking<T, F, Fut>(
        &self,
        key: &str,
        fetch_fn: &F,
        cache_time: Duration,
    ) -> QueryState<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = ApiResponse<T>>,
    {
        self.inner.begin(key, true);
        let key_lock = self.inner.key_lock(key);
        let _guard = key_lock.lock().await;

        // Another caller may have completed this fetch while we waited.
        if let Some(entry) = self.inner.live_entry(key, Some(cache_time)) {
            if let Ok(data) = serde_json::from_value::<T>(entry.value.clone()) {
                self.inner.settle(key, None);
                return QueryState {
                    data: Some(data),
                    loading: false,
                    is_fetching: false,
                    error: None,
                };
            }
        }

        let response = fetch_fn().await;
        self.finish(key, response, cache_time)
    }

    fn spawn_refetch<T, F, Fut>(&self, key: &str, fetch_fn: F, cache_time: Duration)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResponse<T>> + Send + 'static,
    {
        self.inner.begin(key, false);
        let cache = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let key_lock = cache.inner.key_lock(&key);
            // A fetch already in flight will refresh the entry and
            // settle the flags itself; piggyback on it.
            let Ok(_guard) = key_lock.try_lock() else {
                return;
            };
            let response = fetch_fn().await;
            let _ = cache.finish(&key, response, cache_time);
        });
    }

    /// Record a fetch outcome: write the entry on success, keep the
    /// previous entry and surface the message on failure.
    fn finish<T>(&self, key: &str, response: ApiResponse<T>, cache_time: Duration) -> QueryState<T>
    where
        T: Serialize + DeserializeOwned,
    {
        match response {
            ApiResponse {
                success: true,
                data: Some(data),
                ..
            } => match serde_json::to_value(&data) {
                Ok(value) => {
                    self.inner.store_entry(key, value, cache_time);
                    self.inner.settle(key, None);
                    QueryState {
                        data: Some(data),
                        loading: false,
                        is_fetching: false,
                        error: None,
                    }
                }
                Err(e) => {
                    let msg = format!("failed to encode response: {}", e);
                    warn!(key, error = %msg, "fetch result not cacheable");
                    self.inner.settle(key, Some(msg.clone()));
                    QueryState {
                        data: Some(data),
                        loading: false,
                        is_fetching: false,
                        error: Some(msg),
                    }
                }
            },
            resp => {
                let msg = resp.error_message();
                warn!(key, error = %msg, "fetch failed");
                self.inner.settle(key, Some(msg.clone()));
                QueryState {
                    data: self.cached_data(key),
                    loading: false,
                    is_fetching: false,
                    error: Some(msg),
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    /// Route test logs through RUST_LOG; repeated calls are harmless.
    fn init_tracing() {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Fetch function returning a counter of how many times it ran.
    fn counting_fetch(
        counter: Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ApiResponse<String>> + Send>>
           + Send
           + Sync
           + 'static {
        move || {
            let counter = Arc::clone(&counter);
            let value = value.to_string();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ApiResponse::ok(value)
            })
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("condition not reached within 1s");
    }

    #[tokio::test]
    async fn test_fresh_hit_does_not_refetch() {
        init_tracing();
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(Arc::clone(&calls), "soto");
        let options = QueryOptions {
            stale_time: Duration::minutes(5),
            ..QueryOptions::default()
        };

        let first = cache.get::<String, _, _>("recipes:soto", fetch, options).await;
        assert_eq!(first.data.as_deref(), Some("soto"));
        assert!(!first.loading);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let fetch = counting_fetch(Arc::clone(&calls), "soto");
        let second = cache.get::<String, _, _>("recipes:soto", fetch, options).await;
        assert_eq!(second.data.as_deref(), Some("soto"));
        assert!(!second.is_fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_hit_serves_cached_and_refetches_in_background() {
        init_tracing();
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = counting_fetch(Arc::clone(&calls), "v1");
        cache
            .get::<String, _, _>("recipes", fetch, QueryOptions::default())
            .await;

        // stale_time = 0: the entry is stale the moment it lands
        let c = Arc::clone(&calls);
        let fetch = move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                ApiResponse::ok("v2".to_string())
            }
        };
        let state = cache
            .get::<String, _, _>("recipes", fetch, QueryOptions::default())
            .await;

        // Old value served synchronously while the refresh runs
        assert_eq!(state.data.as_deref(), Some("v1"));
        assert!(!state.loading);
        assert!(state.is_fetching);

        let cache2 = cache.clone();
        wait_until(move || {
            cache2.state::<String>("recipes").data.as_deref() == Some("v2")
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.state::<String>("recipes").is_fetching);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched_blocking() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions {
            cache_time: Duration::milliseconds(30),
            stale_time: Duration::milliseconds(30),
            ..QueryOptions::default()
        };

        let fetch = counting_fetch(Arc::clone(&calls), "v1");
        cache.get::<String, _, _>("recipes", fetch, options).await;

        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let fetch = counting_fetch(Arc::clone(&calls), "v1");
        let state = cache.get::<String, _, _>("recipes", fetch, options).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.data.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_disabled_query_never_fetches() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(Arc::clone(&calls), "x");
        let options = QueryOptions {
            enabled: false,
            ..QueryOptions::default()
        };

        let state = cache.get::<String, _, _>("recipes", fetch, options).await;
        assert!(state.data.is_none());
        assert!(!state.loading);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry_and_fetches() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = counting_fetch(Arc::clone(&calls), "old");
        cache
            .get::<String, _, _>("profile", fetch, QueryOptions::default())
            .await;

        let c = Arc::clone(&calls);
        let fetch = move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                ApiResponse::ok("new".to_string())
            }
        };
        let state = cache.invalidate::<String, _, _>("profile", fetch).await;
        assert_eq!(state.data.as_deref(), Some("new"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pattern_invalidation_is_selective() {
        let cache = QueryCache::new();
        for key in ["recipes:makanan", "recipes:minuman", "profile"] {
            let fetch = counting_fetch(Arc::new(AtomicUsize::new(0)), "x");
            cache.get::<String, _, _>(key, fetch, QueryOptions::default()).await;
        }
        assert_eq!(cache.len(), 3);

        let removed =
            cache.invalidate_by_pattern(&KeyPattern::Substring("recipes:".to_string()));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.state::<String>("profile").data.is_some());
        assert!(cache.state::<String>("recipes:makanan").data.is_none());
    }

    #[tokio::test]
    async fn test_pattern_invalidation_regex() {
        let cache = QueryCache::new();
        for key in ["recipes:1", "recipes:2", "reviews:1"] {
            let fetch = counting_fetch(Arc::new(AtomicUsize::new(0)), "x");
            cache.get::<String, _, _>(key, fetch, QueryOptions::default()).await;
        }

        let re = Regex::new(r"^recipes:\d+$").unwrap();
        assert_eq!(cache.invalidate_by_pattern(&KeyPattern::Regex(re)), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_preserves_cached_data() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = counting_fetch(Arc::clone(&calls), "good");
        cache
            .get::<String, _, _>("recipes", fetch, QueryOptions::default())
            .await;

        // stale_time = 0 so this triggers a background refresh that fails
        let failing = || async { ApiResponse::<String>::err("server down") };
        let state = cache
            .get::<String, _, _>("recipes", failing, QueryOptions::default())
            .await;
        assert_eq!(state.data.as_deref(), Some("good"));

        let cache2 = cache.clone();
        wait_until(move || cache2.state::<String>("recipes").error.is_some()).await;

        let after = cache.state::<String>("recipes");
        assert_eq!(after.data.as_deref(), Some("good"));
        assert_eq!(after.error.as_deref(), Some("server down"));
        assert!(!after.loading);
        assert!(!after.is_fetching);
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_fetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let slow_fetch = move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(StdDuration::from_millis(30)).await;
                ApiResponse::ok("shared".to_string())
            }
        };

        let (a, b) = tokio::join!(
            cache.get::<String, _, _>("recipes", slow_fetch.clone(), QueryOptions::default()),
            cache.get::<String, _, _>("recipes", slow_fetch, QueryOptions::default()),
        );

        assert_eq!(a.data.as_deref(), Some("shared"));
        assert_eq!(b.data.as_deref(), Some("shared"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefetch_populates_unconditionally() {
        let cache = QueryCache::new();

        let data = cache
            .prefetch("recipes", || async { ApiResponse::ok(vec![1, 2, 3]) })
            .await
            .unwrap();
        assert_eq!(data, vec![1, 2, 3]);

        // Overwrites the existing entry
        cache
            .prefetch("recipes", || async { ApiResponse::ok(vec![9]) })
            .await
            .unwrap();
        assert_eq!(cache.state::<Vec<i32>>("recipes").data.unwrap(), vec![9]);

        let err = cache
            .prefetch::<Vec<i32>, _, _>("recipes", || async { ApiResponse::err("nope") })
            .await;
        assert!(err.is_err());
        // Failed prefetch leaves the previous entry alone
        assert_eq!(cache.state::<Vec<i32>>("recipes").data.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_refetch_refreshes_in_background() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions {
            stale_time: Duration::minutes(5),
            ..QueryOptions::default()
        };

        let fetch = counting_fetch(Arc::clone(&calls), "v1");
        cache.get::<String, _, _>("recipes", fetch, options).await;

        let c = Arc::clone(&calls);
        let fetch = move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                ApiResponse::ok("v2".to_string())
            }
        };
        let snapshot = cache.refetch::<String, _, _>("recipes", fetch);
        assert_eq!(snapshot.data.as_deref(), Some("v1"));
        assert!(snapshot.is_fetching);

        let cache2 = cache.clone();
        wait_until(move || {
            cache2.state::<String>("recipes").data.as_deref() == Some("v2")
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refetch_during_prefetch_clears_fetch_flags() {
        let cache = QueryCache::new();

        // Slow prefetch holds the key lock while the refetch arrives
        let cache2 = cache.clone();
        let prefetch = tokio::spawn(async move {
            cache2
                .prefetch("recipes", || async {
                    tokio::time::sleep(StdDuration::from_millis(80)).await;
                    ApiResponse::ok("prefetched".to_string())
                })
                .await
                .unwrap()
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(Arc::clone(&calls), "refetched");
        let snapshot = cache.refetch::<String, _, _>("recipes", fetch);
        assert!(snapshot.is_fetching);

        prefetch.await.unwrap();

        // The bailed-out refetch piggybacks on the prefetch: flags
        // settle, its own fetch never runs
        let cache2 = cache.clone();
        wait_until(move || !cache2.state::<String>("recipes").is_fetching).await;
        let state = cache.state::<String>("recipes");
        assert_eq!(state.data.as_deref(), Some("prefetched"));
        assert!(!state.loading);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_state_treats_expired_entry_as_absent() {
        let cache = QueryCache::new();
        let options = QueryOptions {
            cache_time: Duration::milliseconds(30),
            stale_time: Duration::minutes(5),
            ..QueryOptions::default()
        };

        let fetch = counting_fetch(Arc::new(AtomicUsize::new(0)), "v1");
        cache.get::<String, _, _>("recipes", fetch, options).await;
        assert_eq!(cache.state::<String>("recipes").data.as_deref(), Some("v1"));

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(cache.state::<String>("recipes").data.is_none());
    }

    #[tokio::test]
    async fn test_clear_empties_cache() {
        let cache = QueryCache::new();
        let fetch = counting_fetch(Arc::new(AtomicUsize::new(0)), "x");
        cache
            .get::<String, _, _>("recipes", fetch, QueryOptions::default())
            .await;
        assert!(!cache.is_empty());

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.state::<String>("recipes").data.is_none());
    }
}
