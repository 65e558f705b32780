use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::FetchError;

pub const DEFAULT_TTL: Duration = Duration::from_millis(60_000);
pub const DEFAULT_MAX_ENTRIES: usize = 64;

type PendingFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    // access counter, not wall time: ties are impossible
    last_read: u64,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    pending: HashMap<String, PendingFetch<V>>,
    access: u64,
}

impl<V> CacheState<V> {
    fn touch(&mut self) -> u64 {
        self.access += 1;
        self.access
    }

    fn store(&mut self, key: String, value: V, now: Instant, max_entries: usize) {
        let last_read = self.touch();
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                stored_at: now,
                last_read,
            },
        );
        while self.entries.len() > max_entries.max(1) {
            let victim = self
                .entries
                .iter()
                .filter(|(k, _)| **k != key)
                .min_by_key(|(_, entry)| entry.last_read)
                .map(|(k, _)| k.clone());
            match victim {
                Some(victim) => {
                    debug!(key = %victim, "evicting least recently read cache entry");
                    self.entries.remove(&victim);
                }
                None => break,
            }
        }
    }
}

/// Memoizes successful reads per key for a bounded time and coalesces
/// concurrent reads of the same key onto a single in-flight fetch.
///
/// Cloning is cheap and every clone shares the same entries, so one cache is
/// built per application and handed to whoever reads through it.
#[derive(Clone)]
pub struct FetchCache<V> {
    state: Arc<Mutex<CacheState<V>>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    default_ttl: Duration,
}

impl<V> FetchCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_MAX_ENTRIES)
    }

    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let mut cache = Self::with_clock(clock, config.max_entries);
        cache.default_ttl = config.ttl();
        cache
    }

    pub fn with_clock(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                pending: HashMap::new(),
                access: 0,
            })),
            clock,
            max_entries,
            default_ttl: DEFAULT_TTL,
        }
    }

    /// `read` with the cache's default time-to-live.
    pub async fn get<F, Fut>(&self, key: &str, fetcher: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        self.read(key, fetcher, self.default_ttl).await
    }

    /// Returns the cached value for `key` if it is younger than `ttl`,
    /// otherwise joins the fetch already in flight for `key`, otherwise
    /// starts `fetcher`.
    ///
    /// At most one fetch per key is outstanding at any time. The fetch runs
    /// on its own task: it completes and fills the cache even when every
    /// caller gave up waiting. Failures are not cached.
    pub async fn read<F, Fut>(&self, key: &str, fetcher: F, ttl: Duration) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            let access = state.touch();
            if let Some(entry) = state.entries.get_mut(key) {
                if now.saturating_duration_since(entry.stored_at) < ttl {
                    entry.last_read = access;
                    debug!(key, "cache hit");
                    return Ok(entry.value.clone());
                }
            }
            if let Some(pending) = state.pending.get(key).cloned() {
                debug!(key, "joining in-flight fetch");
                pending
            } else {
                debug!(key, "cache miss, fetching");
                // The spawned task needs this lock to settle, so it
                // cannot resolve before the marker below is in place.
                let pending = self.spawn_fetch(key.to_owned(), fetcher());
                state.pending.insert(key.to_owned(), pending.clone());
                pending
            }
        };
        pending.await
    }

    fn spawn_fetch<Fut>(&self, key: String, fetch: Fut) -> PendingFetch<V>
    where
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let max_entries = self.max_entries;
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = fetch.await;
            let mut state = state.lock().await;
            state.pending.remove(&task_key);
            match &result {
                Ok(value) => {
                    let now = clock.now();
                    state.store(task_key, value.clone(), now, max_entries);
                }
                Err(err) => warn!(key = %task_key, error = %err, "fetch failed, nothing cached"),
            }
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    // the task died before clearing its own marker
                    state.lock().await.pending.remove(&key);
                    Err(FetchError::from(join_err))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Drops the stored value for `key`. A fetch already in flight is left alone.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.state.lock().await.entries.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.state.lock().await.entries.contains_key(key)
    }

    pub async fn is_in_flight(&self, key: &str) -> bool {
        self.state.lock().await.pending.contains_key(key)
    }
}

impl<V> Default for FetchCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
