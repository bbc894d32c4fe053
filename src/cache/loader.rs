//! Loader Module
//!
//! Computes values on a miss and coalesces concurrent misses for one key
//! into a single load.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{CacheError, LoadError, Result};

// == Cache Loader ==
/// Source of values for keys missing from the cache.
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> std::result::Result<V, LoadError>;
}

/// Loader backed by an async closure taking the key by value.
pub struct FnLoader<F, K> {
    f: F,
    _key: PhantomData<fn(K)>,
}

/// Wraps an async closure as a [`CacheLoader`].
///
/// ```ignore
/// let loader = loader_fn(|key: String| async move { Ok(format!("{}_value", key)) });
/// ```
pub fn loader_fn<K, V, F, Fut>(f: F) -> FnLoader<F, K>
where
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<V, LoadError>> + Send,
{
    FnLoader {
        f,
        _key: PhantomData,
    }
}

#[async_trait]
impl<K, V, F, Fut> CacheLoader<K, V> for FnLoader<F, K>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<V, LoadError>> + Send,
{
    async fn load(&self, key: &K) -> std::result::Result<V, LoadError> {
        (self.f)(key.clone()).await
    }
}

// == In-flight Loads ==
/// Outcome slot shared by the leader and waiters of one load.
type Outcome<V> = Option<std::result::Result<V, LoadError>>;

/// How a caller takes part in a load.
pub enum Join<V> {
    /// The value appeared while registering; no load needed
    Ready(V),
    /// This caller must start the load and publish through the sender
    Leader(watch::Sender<Outcome<V>>, watch::Receiver<Outcome<V>>),
    /// Another caller's load is running
    Waiter(watch::Receiver<Outcome<V>>),
}

/// Registry of loads currently running, one per key.
pub struct InflightLoads<K, V> {
    pending: Mutex<HashMap<K, watch::Receiver<Outcome<V>>>>,
}

impl<K, V> Default for InflightLoads<K, V> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> InflightLoads<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    // == Join ==
    /// Registers interest in `key`.
    ///
    /// `present` is consulted under the registry lock. A finished load
    /// stores its value before it leaves the registry, so a caller either
    /// sees the stored value or joins the running load.
    pub fn join<F>(&self, key: &K, present: F) -> Result<Join<V>>
    where
        F: FnOnce() -> Result<Option<V>>,
    {
        let mut pending = self.pending.lock();
        if let Some(rx) = pending.get(key) {
            return Ok(Join::Waiter(rx.clone()));
        }
        if let Some(value) = present()? {
            return Ok(Join::Ready(value));
        }

        let (tx, rx) = watch::channel(None);
        pending.insert(key.clone(), rx.clone());
        Ok(Join::Leader(tx, rx))
    }

    /// Removes the registration of a finished load.
    pub fn finish(&self, key: &K) {
        self.pending.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

// == Wait ==
/// Waits for a load outcome, optionally bounded.
///
/// Giving up does not cancel the load; it still completes for other waiters.
pub async fn wait_for_outcome<V: Clone>(
    rx: watch::Receiver<Outcome<V>>,
    timeout: Option<Duration>,
) -> Result<V> {
    match timeout {
        Some(waited) => tokio::time::timeout(waited, recv_outcome(rx))
            .await
            .map_err(|_| CacheError::LoadTimeout { waited })?,
        None => recv_outcome(rx).await,
    }
}

async fn recv_outcome<V: Clone>(mut rx: watch::Receiver<Outcome<V>>) -> Result<V> {
    let slot = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| LoadError::msg("load task ended without a result"))?;
    match &*slot {
        Some(Ok(value)) => Ok(value.clone()),
        Some(Err(err)) => Err(CacheError::Load(err.clone())),
        None => Err(LoadError::msg("load finished without a result").into()),
    }
}
