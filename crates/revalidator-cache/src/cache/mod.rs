use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use sentry::{Hub, SentryFutureExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::dedup::CallDeduplicator;
use crate::error::{CacheContents, StoreError};
use crate::policy::{CachePolicy, Freshness};
use crate::store::{Store, StoredEntry};
use crate::utils::defer::defer;


type Producer<T> = Arc<dyn Fn() -> BoxFuture<'static, CacheContents<T>> + Send + Sync>;

/// A durable cache for the results of async computations.
///
/// A `ResultCache` is bound to a [`Store`], and hands out [`CachedFunction`]s via
/// [`wrap`](Self::wrap). All functions wrapped by the same cache share its store, its namespace
/// and its bookkeeping of running background refreshes.
///
/// Cloning is cheap, all clones refer to the same cache.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,

    /// Prefix of all the store keys owned by this cache.
    namespace: String,

    /// Keys of currently running background refreshes.
    refreshes: Mutex<HashSet<String>>,

    /// The remaining number of background refreshes that may be started.
    max_lazy_refreshes: AtomicIsize,
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let refreshes = self
            .inner
            .refreshes
            .try_lock()
            .map(|r| r.len())
            .unwrap_or_default();
        f.debug_struct("ResultCache")
            .field("store", &self.inner.store)
            .field("namespace", &self.inner.namespace)
            .field("running refreshes", &refreshes)
            .finish()
    }
}

impl ResultCache {
    /// Creates a cache on top of `store` with the default configuration.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, &CacheConfig::default())
    }

    /// Creates a cache on top of `store`.
    pub fn with_config(store: Arc<dyn Store>, config: &CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Creates a cache on top of `store`, reading the time from `clock`.
    pub fn with_clock(store: Arc<dyn Store>, config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        // At least one background refresh is always allowed.
        let max_lazy_refreshes = AtomicIsize::new(config.max_lazy_refreshes.max(1));

        Self {
            inner: Arc::new(CacheInner {
                store,
                clock,
                namespace: config.namespace.clone(),
                refreshes: Default::default(),
                max_lazy_refreshes,
            }),
        }
    }

    /// Creates a cache with the store backend described by `config`.
    pub fn from_config(config: &CacheConfig) -> io::Result<Self> {
        let store = config.store.create()?;
        Ok(Self::with_config(store, config))
    }

    /// The store backing this cache.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Wraps `producer` into a [`CachedFunction`] caching its results according to `policy`.
    ///
    /// The `name` is used for logging and metrics only.
    pub fn wrap<T, F, Fut>(
        &self,
        name: &'static str,
        producer: F,
        policy: CachePolicy,
    ) -> CachedFunction<T>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
    {
        let producer: Producer<T> = Arc::new(move || producer().boxed());
        let cache = self.clone();

        let computations = CallDeduplicator::with_key(
            name,
            move |store_key: String| {
                let cache = cache.clone();
                let producer = Arc::clone(&producer);
                async move {
                    metric!(counter("caches.computation") += 1, "cache" => name);
                    let start = Instant::now();
                    let result = producer().await;
                    metric!(timer("caches.computation.duration") = start.elapsed(), "cache" => name);
                    let value = result?;
                    cache.persist(name, &store_key, &value).await;
                    Ok(value)
                }
            },
            |store_key: &String| store_key.clone(),
        );

        CachedFunction {
            name,
            cache: self.clone(),
            policy,
            computations,
        }
    }

    /// Removes every entry owned by this cache from the store.
    ///
    /// Returns the number of removed entries.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let store = &self.inner.store;
        let mut cleared = 0;
        for key in store.keys().await? {
            if key.starts_with(&self.inner.namespace) {
                store.delete(&key).await?;
                cleared += 1;
            }
        }

        metric!(counter("caches.cleared") += cleared as i64);
        tracing::debug!("Cleared {} cache entries", cleared);
        Ok(cleared)
    }

    fn store_key(&self, cache_key: &str) -> String {
        format!("{}{}", self.inner.namespace, cache_key)
    }

    /// Reads and decodes the entry stored under `store_key`.
    ///
    /// Store failures and undecodable entries are logged and treated as a missing entry.
    async fn lookup<T: DeserializeOwned>(
        &self,
        name: &str,
        store_key: &str,
    ) -> Option<(T, StoredEntry)> {
        let entry = match self.inner.store.get(store_key).await {
            Ok(entry) => entry?,
            Err(err) => {
                metric!(
                    counter("caches.store.error") += 1,
                    "cache" => name,
                    "op" => "get",
                    "kind" => err.kind(),
                );
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    key = store_key,
                    "Failed to read cache entry",
                );
                return None;
            }
        };

        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => Some((value, entry)),
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    key = store_key,
                    "Discarding undecodable cache entry",
                );
                None
            }
        }
    }

    /// Writes a freshly computed `value` to the store, stamped with the current time.
    ///
    /// A value is not written if the store already holds a more recent entry. Failures are
    /// logged, but otherwise ignored.
    async fn persist<T: Serialize>(&self, name: &str, store_key: &str, value: &T) {
        let stored_at = self.inner.clock.now();
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                metric!(
                    counter("caches.store.error") += 1,
                    "cache" => name,
                    "op" => "serialize",
                    "kind" => "serialization",
                );
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    key = store_key,
                    "Failed to serialize cache entry",
                );
                return;
            }
        };

        let store = &self.inner.store;
        match store.get(store_key).await {
            Ok(Some(existing)) if existing.stored_at > stored_at => {
                metric!(counter("caches.store.outdated") += 1, "cache" => name);
                tracing::trace!("Discarding outdated write for {}", store_key);
                return;
            }
            Ok(_) => {}
            // The write below will likely fail as well, and log it.
            Err(err) => {
                tracing::debug!(
                    error = &err as &dyn std::error::Error,
                    key = store_key,
                    "Failed to read cache entry before writing",
                );
            }
        }

        if let Err(err) = store.set(store_key, StoredEntry { value, stored_at }).await {
            metric!(
                counter("caches.store.error") += 1,
                "cache" => name,
                "op" => "set",
                "kind" => err.kind(),
            );
            tracing::error!(
                error = &err as &dyn std::error::Error,
                key = store_key,
                "Failed to write cache entry",
            );
        }
    }
}

/// An async function whose results are cached by a [`ResultCache`].
///
/// Created by [`ResultCache::wrap`]. Cloning is cheap.
pub struct CachedFunction<T> {
    name: &'static str,
    cache: ResultCache,
    policy: CachePolicy,
    /// Deduplicates computations by store key, both on the cold path and for refreshes.
    computations: CallDeduplicator<String, T>,
}

impl<T> Clone for CachedFunction<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            cache: self.cache.clone(),
            policy: self.policy.clone(),
            computations: self.computations.clone(),
        }
    }
}

impl<T> fmt::Debug for CachedFunction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFunction")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("computations", &self.computations)
            .finish()
    }
}

impl<T> CachedFunction<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Returns the cached value, computing it if necessary.
    ///
    /// - A fresh value is returned without invoking the producer.
    /// - A stale value is returned immediately, and a refresh is started in the background.
    ///   Failures of that refresh are logged, and never reach any caller.
    /// - If there is no value, or it is expired, the producer is invoked and its result is
    ///   stored and returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the producer if it had to be invoked and failed. Failures of the
    /// underlying store are never returned.
    pub async fn get(&self) -> CacheContents<T> {
        let name = self.name;
        let store_key = self.cache.store_key(&self.policy.cache_key());
        metric!(counter("caches.access") += 1, "cache" => name);

        if let Some((value, entry)) = self.cache.lookup::<T>(name, &store_key).await {
            let now = self.cache.inner.clock.now();
            let freshness = self.policy.freshness(entry.stored_at, now);
            tracing::trace!("{} entry for {} is {}", name, store_key, freshness);

            match freshness {
                Freshness::Fresh => {
                    metric!(counter("caches.hit") += 1, "cache" => name, "freshness" => "fresh");
                    return Ok(value);
                }
                Freshness::Stale => {
                    metric!(counter("caches.hit") += 1, "cache" => name, "freshness" => "stale");
                    self.spawn_refresh(store_key);
                    return Ok(value);
                }
                Freshness::Expired => {}
            }
        }

        metric!(counter("caches.miss") += 1, "cache" => name);
        self.computations.call(store_key).await
    }

    /// Refreshes the entry for `store_key` in a background task which is not awaited.
    ///
    /// Refreshes are deduplicated across all functions of the cache, and bounded by the lazy
    /// refresh limit.
    fn spawn_refresh(&self, store_key: String) {
        let name = self.name;
        let inner = &self.cache.inner;

        let mut refreshes = inner.refreshes.lock().unwrap();
        if refreshes.contains(&store_key) {
            return;
        }

        // We count down towards zero, and if we reach or surpass it, we will stop here.
        if inner.max_lazy_refreshes.fetch_sub(1, Ordering::Relaxed) <= 0 {
            inner.max_lazy_refreshes.fetch_add(1, Ordering::Relaxed);

            metric!(counter("caches.lazy_limit_hit") += 1, "cache" => name);
            tracing::debug!(
                "Lazy refresh limit reached, serving stale {} entry for {} without a refresh",
                name,
                store_key
            );
            return;
        }

        let done_token = {
            let key = store_key.clone();
            let cache = self.cache.clone();
            defer(move || {
                cache
                    .inner
                    .max_lazy_refreshes
                    .fetch_add(1, Ordering::Relaxed);
                cache.inner.refreshes.lock().unwrap().remove(&key);
            })
        };

        refreshes.insert(store_key.clone());
        metric!(gauge("caches.refresh.running") = refreshes.len() as u64);
        drop(refreshes);

        tracing::trace!("Spawning deduplicated {} refresh for {}", name, store_key);

        let computations = self.computations.clone();
        let task = async move {
            let _done_token = done_token; // move into the future

            let status = match computations.call(store_key.clone()).await {
                Ok(_) => "ok",
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        key = %store_key,
                        "Background refresh of {} failed",
                        name,
                    );
                    "error"
                }
            };
            metric!(counter("caches.refresh") += 1, "cache" => name, "status" => status);
        };
        tokio::spawn(task.bind_hub(Hub::new_from_top(Hub::current())));
    }
}
