//! Cache Facade Module
//!
//! Public entry point tying the tiers, loader, events, statistics,
//! persistence and background maintenance together.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::codec::{CacheKey, CacheValue};
use crate::cache::events::{CacheEvent, EventBus, EventFilter, EventKind, ListenerId};
use crate::cache::loader::{wait_for_outcome, CacheLoader, InflightLoads, Join};
use crate::cache::stats::{CacheStats, StatsCounter};
use crate::cache::store::StoreSize;
use crate::cache::tier::{Events, TierManager};
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, TierKind};
use crate::error::{CacheError, LoadError, Result};
use crate::persistence::{FileSystem, LocalFileSystem, SnapshotStore};
use crate::tasks::{spawn_maintenance_task, Maintenance, MaintenanceSchedule};

// == Shared State ==
struct CacheInner<K: CacheKey, V: CacheValue> {
    tiers: TierManager<K, V>,
    events: EventBus<K, V>,
    stats: StatsCounter,
    inflight: InflightLoads<K, V>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    snapshot: Option<SnapshotStore>,
    load_timeout: Option<Duration>,
    sweep_batch_size: usize,
    closed: AtomicBool,
    cancel: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<K: CacheKey, V: CacheValue> CacheInner<K, V> {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    /// Counts removals and hands the events to the listeners.
    fn publish(&self, events: Events<K, V>) {
        if events.is_empty() {
            return;
        }
        let evicted = events.iter().filter(|e| e.kind == EventKind::Evicted).count();
        let expired = events.iter().filter(|e| e.kind == EventKind::Expired).count();
        self.stats.record_evictions(evicted as u64);
        self.stats.record_expirations(expired as u64);
        self.events.dispatch_all(&events);
    }

    fn expire_batch(&self, tier: usize, keys: &[K]) -> usize {
        let events = self.tiers.expire_batch(tier, keys);
        let expired = events.len();
        self.publish(events);
        expired
    }

    /// Stores a freshly loaded value unless a writer got there first.
    fn store_loaded(&self, key: K, value: V) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.tiers.put(key, value, true) {
            Ok(events) => self.publish(events),
            Err(err) => warn!("Loaded value was not cached: {}", err),
        }
    }

    fn write_snapshot(&self) -> Result<usize> {
        let Some(store) = &self.snapshot else {
            return Ok(0);
        };
        let manifest = store.write_with(|| self.tiers.export())?;
        Ok(manifest.entry_count as usize)
    }
}

impl<K: CacheKey, V: CacheValue> Drop for CacheInner<K, V> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> Maintenance for CacheInner<K, V> {
    async fn sweep_expired(&self) -> usize {
        let mut expired = 0;
        for tier in 0..self.tiers.tier_count() {
            let keys = self.tiers.tier_keys(tier);
            for batch in keys.chunks(self.sweep_batch_size) {
                if self.cancel.is_cancelled() {
                    return expired;
                }
                expired += self.expire_batch(tier, batch);
                tokio::task::yield_now().await;
            }
        }
        expired
    }

    fn checkpoint(&self) -> Result<usize> {
        self.write_snapshot()
    }
}

/// Clears the in-flight registration of a load, even if the load panics.
struct InflightGuard<K: CacheKey, V: CacheValue> {
    inner: Arc<CacheInner<K, V>>,
    key: K,
}

impl<K: CacheKey, V: CacheValue> Drop for InflightGuard<K, V> {
    fn drop(&mut self) {
        self.inner.inflight.finish(&self.key);
    }
}

// == Cache ==
/// Tiered cache handle.
///
/// Cloning is cheap; all clones share the same cache.
///
/// ```ignore
/// let cache: Cache<String, String> = Cache::builder(CacheConfig::default())
///     .loader(loader_fn(|key: String| async move { Ok(format!("{}_value", key)) }))
///     .build()?;
/// assert_eq!(cache.get(&"key1".to_string()).await?, Some("key1_value".to_string()));
/// cache.close().await?;
/// ```
pub struct Cache<K: CacheKey, V: CacheValue> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K: CacheKey, V: CacheValue> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Cache<K, V> {
    /// Opens a cache with no loader, listeners or custom collaborators.
    pub fn new(config: CacheConfig) -> Result<Self> {
        CacheBuilder::new(config).build()
    }

    pub fn builder(config: CacheConfig) -> CacheBuilder<K, V> {
        CacheBuilder::new(config)
    }

    // == Reads ==
    /// Returns the cached value, or loads it through the configured loader.
    ///
    /// Without a loader this behaves like [`Cache::get_if_present`].
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.get_bounded(key, self.inner.load_timeout).await
    }

    /// Like [`Cache::get`], giving up on the load after `timeout`.
    ///
    /// The load keeps running for other callers after this one gives up.
    pub async fn get_timeout(&self, key: &K, timeout: Duration) -> Result<Option<V>> {
        self.get_bounded(key, Some(timeout)).await
    }

    async fn get_bounded(&self, key: &K, timeout: Option<Duration>) -> Result<Option<V>> {
        let Some(loader) = self.inner.loader.clone() else {
            return self.get_if_present(key);
        };
        let load = move |key: K| async move { loader.load(&key).await };
        self.load_through(key, load, timeout).await.map(Some)
    }

    /// Returns the cached value, or computes it with `loader` on a miss.
    ///
    /// # Arguments
    /// * `key` - Key to look up
    /// * `loader` - Called at most once, only if this caller leads the load
    pub async fn get_with<F, Fut>(&self, key: &K, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<V, LoadError>> + Send + 'static,
    {
        self.load_through(key, move |_| loader(), self.inner.load_timeout)
            .await
    }

    /// Returns the cached value without ever loading.
    pub fn get_if_present(&self, key: &K) -> Result<Option<V>> {
        self.inner.ensure_open()?;
        let (value, events) = self.inner.tiers.get(key)?;
        if value.is_some() {
            self.inner.stats.record_hit();
        } else {
            self.inner.stats.record_miss();
        }
        self.inner.publish(events);
        Ok(value)
    }

    // == Load Coalescing ==
    async fn load_through<F, Fut>(&self, key: &K, make: F, timeout: Option<Duration>) -> Result<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = std::result::Result<V, LoadError>> + Send + 'static,
    {
        let inner = &self.inner;
        inner.ensure_open()?;

        let (value, events) = inner.tiers.get(key)?;
        inner.publish(events);
        if let Some(value) = value {
            inner.stats.record_hit();
            return Ok(value);
        }

        // Re-check under the registry lock; a load may have just finished
        let mut stale = Vec::new();
        let joined = inner.inflight.join(key, || {
            let (value, events) = inner.tiers.get(key)?;
            stale = events;
            Ok(value)
        })?;
        inner.publish(stale);

        let rx = match joined {
            Join::Ready(value) => {
                inner.stats.record_hit();
                return Ok(value);
            }
            Join::Waiter(rx) => rx,
            Join::Leader(tx, rx) => {
                let load = make(key.clone());
                let guard = InflightGuard {
                    inner: Arc::clone(inner),
                    key: key.clone(),
                };
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = load.await;
                    let elapsed = started.elapsed();

                    match &result {
                        Ok(value) => {
                            guard.inner.stats.record_load_success(elapsed);
                            guard.inner.store_loaded(guard.key.clone(), value.clone());
                        }
                        Err(err) => {
                            guard.inner.stats.record_load_failure(elapsed);
                            debug!("Load failed: {}", err);
                        }
                    }
                    // The value is stored before the key leaves the registry
                    drop(guard);
                    tx.send_replace(Some(result));
                });
                rx
            }
        };

        inner.stats.record_miss();
        wait_for_outcome(rx, timeout).await
    }

    // == Writes ==
    /// Inserts or replaces a value.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.inner.ensure_open()?;
        let events = self.inner.tiers.put(key, value, false)?;
        self.inner.publish(events);
        Ok(())
    }

    pub fn invalidate(&self, key: &K) -> Result<()> {
        self.inner.ensure_open()?;
        let events = self.inner.tiers.invalidate(key);
        self.inner.publish(events);
        Ok(())
    }

    pub fn invalidate_all(&self) -> Result<()> {
        self.inner.ensure_open()?;
        let events = self.inner.tiers.invalidate_all();
        self.inner.publish(events);
        Ok(())
    }

    /// Removes every stale entry now instead of waiting for the sweep.
    ///
    /// Returns the number of entries expired.
    pub fn clean_up(&self) -> Result<usize> {
        self.inner.ensure_open()?;
        let mut expired = 0;
        for tier in 0..self.inner.tiers.tier_count() {
            let keys = self.inner.tiers.tier_keys(tier);
            for batch in keys.chunks(self.inner.sweep_batch_size) {
                expired += self.inner.expire_batch(tier, batch);
            }
        }
        Ok(expired)
    }

    // == Listeners ==
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> Result<ListenerId>
    where
        F: Fn(&CacheEvent<K, V>) + Send + Sync + 'static,
    {
        self.inner.ensure_open()?;
        Ok(self.inner.events.subscribe(filter, handler))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(self.inner.events.unsubscribe(id))
    }

    // == Introspection ==
    /// Counters stay readable after close.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn tier_sizes(&self) -> Vec<(TierKind, StoreSize)> {
        self.inner.tiers.tier_sizes()
    }

    /// Resident entries across all tiers, stale ones included.
    pub fn len(&self) -> usize {
        self.inner.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tiers.is_empty()
    }

    // == Persistence ==
    /// Writes a snapshot now. Returns the number of entries written.
    pub fn checkpoint(&self) -> Result<usize> {
        self.inner.ensure_open()?;
        self.inner.write_snapshot()
    }

    // == Shutdown ==
    /// Stops maintenance, writes the final snapshot and drops all listeners.
    ///
    /// Every later operation, including a second close, fails with `Closed`.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::Closed);
        }

        self.inner.cancel.cancel();
        let task = self.inner.maintenance.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("Maintenance task ended abnormally: {}", err);
            }
        }

        let flushed = self.inner.write_snapshot();
        self.inner.events.clear();
        match &flushed {
            Ok(written) if self.inner.snapshot.is_some() => {
                info!("Cache closed, persisted {} entries", written)
            }
            Ok(_) => info!("Cache closed"),
            Err(err) => error!("Cache closed without a final snapshot: {}", err),
        }
        flushed.map(|_| ())
    }
}

// == Builder ==
/// Assembles a [`Cache`] from a configuration and optional collaborators.
pub struct CacheBuilder<K: CacheKey, V: CacheValue> {
    config: CacheConfig,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    events: EventBus<K, V>,
    clock: Arc<dyn Clock>,
    fs: Arc<dyn FileSystem>,
}

impl<K: CacheKey, V: CacheValue> CacheBuilder<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            loader: None,
            events: EventBus::new(),
            clock: Arc::new(SystemClock),
            fs: Arc::new(LocalFileSystem),
        }
    }

    /// Loader used by [`Cache::get`] on a miss.
    pub fn loader<L>(mut self, loader: L) -> Self
    where
        L: CacheLoader<K, V> + 'static,
    {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Registers a listener before the cache opens.
    pub fn listener<F>(self, filter: impl Into<EventFilter>, handler: F) -> Self
    where
        F: Fn(&CacheEvent<K, V>) + Send + Sync + 'static,
    {
        self.events.subscribe(filter, handler);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    // == Build ==
    /// Validates the configuration, restores the snapshot and starts
    /// background maintenance.
    ///
    /// Maintenance needs a Tokio runtime; set `maintenance_interval` and
    /// `checkpoint_interval` to `None` to build outside one.
    pub fn build(self) -> Result<Cache<K, V>> {
        let config = self.config;
        config.validate()?;

        let schedule = MaintenanceSchedule {
            sweep_interval: config.maintenance_interval,
            checkpoint_interval: config.persistence_path.as_ref().and(config.checkpoint_interval),
        };
        if !schedule.is_idle() && Handle::try_current().is_err() {
            return Err(CacheError::InvalidConfig(
                "background maintenance requires a Tokio runtime".to_string(),
            ));
        }

        let tiers = TierManager::new(&config, self.clock);
        let snapshot = config
            .persistence_path
            .clone()
            .map(|path| SnapshotStore::new(self.fs, path));
        if let Some(store) = &snapshot {
            let records = store.load(config.corrupt_snapshot_policy)?;
            if !records.is_empty() {
                let restored = tiers.restore(records)?;
                info!("Restored {} entries from {}", restored, store.path().display());
            }
        }

        let inner = Arc::new(CacheInner {
            tiers,
            events: self.events,
            stats: StatsCounter::new(),
            inflight: InflightLoads::new(),
            loader: self.loader,
            snapshot,
            load_timeout: config.load_timeout,
            sweep_batch_size: config.sweep_batch_size,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            maintenance: Mutex::new(None),
        });

        if !schedule.is_idle() {
            let task = spawn_maintenance_task(Arc::downgrade(&inner), schedule, inner.cancel.clone());
            *inner.maintenance.lock() = Some(task);
        }

        let layout: Vec<String> = config.tiers.iter().map(|t| t.kind.to_string()).collect();
        info!("Cache opened with tiers [{}]", layout.join(", "));
        Ok(Cache { inner })
    }
}
