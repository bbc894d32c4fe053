//! Eviction Policy Module
//!
//! Tracks per-tier usage and picks the entry to drop when a tier is over
//! capacity.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use lru::LruCache;

use crate::config::EvictionStrategy;

// == Eviction Policy ==
/// Victim selection over the keys resident in one tier.
pub trait EvictionPolicy<K>: Send {
    /// A key became resident (or was overwritten).
    fn on_insert(&mut self, key: &K);
    /// A resident key was read.
    fn on_access(&mut self, key: &K);
    /// A key left the tier for any reason other than `select_victim`.
    fn on_remove(&mut self, key: &K);
    /// Picks and stops tracking the next key to evict.
    fn select_victim(&mut self) -> Option<K>;
    /// Tracked keys, next victim first.
    fn ordered_keys(&self) -> Vec<K>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the policy for a strategy.
pub fn policy_for<K>(strategy: EvictionStrategy) -> Box<dyn EvictionPolicy<K>>
where
    K: Hash + Eq + Clone + Send + 'static,
{
    match strategy {
        EvictionStrategy::Lru => Box::new(LruPolicy::new()),
        EvictionStrategy::Lfu => Box::new(LfuPolicy::new()),
        EvictionStrategy::Fifo => Box::new(FifoPolicy::new()),
    }
}

// == LRU ==
/// Least recently used. Untouched keys leave in insertion order.
pub struct LruPolicy<K: Hash + Eq> {
    /// Front = most recently used, back = least recently used
    order: LruCache<K, ()>,
}

impl<K: Hash + Eq + Clone> LruPolicy<K> {
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }
}

impl<K: Hash + Eq + Clone> Default for LruPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone + Send> EvictionPolicy<K> for LruPolicy<K> {
    fn on_insert(&mut self, key: &K) {
        self.order.put(key.clone(), ());
    }

    fn on_access(&mut self, key: &K) {
        self.order.promote(key);
    }

    fn on_remove(&mut self, key: &K) {
        self.order.pop(key);
    }

    fn select_victim(&mut self) -> Option<K> {
        self.order.pop_lru().map(|(key, _)| key)
    }

    fn ordered_keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.order.iter().map(|(key, _)| key.clone()).collect();
        keys.reverse();
        keys
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

// == FIFO ==
/// First in, first out. Reads and overwrites do not reorder.
pub struct FifoPolicy<K: Hash + Eq> {
    order: LruCache<K, ()>,
}

impl<K: Hash + Eq + Clone> FifoPolicy<K> {
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }
}

impl<K: Hash + Eq + Clone> Default for FifoPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone + Send> EvictionPolicy<K> for FifoPolicy<K> {
    fn on_insert(&mut self, key: &K) {
        if !self.order.contains(key) {
            self.order.put(key.clone(), ());
        }
    }

    fn on_access(&mut self, _key: &K) {}

    fn on_remove(&mut self, key: &K) {
        self.order.pop(key);
    }

    fn select_victim(&mut self) -> Option<K> {
        self.order.pop_lru().map(|(key, _)| key)
    }

    fn ordered_keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.order.iter().map(|(key, _)| key.clone()).collect();
        keys.reverse();
        keys
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

// == LFU ==
/// Least frequently used, ties broken by earliest insertion.
pub struct LfuPolicy<K> {
    /// key -> (hits, insertion sequence)
    counts: HashMap<K, (u64, u64)>,
    /// (hits, insertion sequence) -> key, lowest first
    order: BTreeMap<(u64, u64), K>,
    next_seq: u64,
}

impl<K: Hash + Eq + Clone> LfuPolicy<K> {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    fn bump(&mut self, key: &K) -> bool {
        match self.counts.get_mut(key) {
            Some(rank) => {
                self.order.remove(&*rank);
                rank.0 += 1;
                self.order.insert(*rank, key.clone());
                true
            }
            None => false,
        }
    }
}

impl<K: Hash + Eq + Clone> Default for LfuPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone + Send> EvictionPolicy<K> for LfuPolicy<K> {
    fn on_insert(&mut self, key: &K) {
        if self.bump(key) {
            return;
        }
        let rank = (1, self.next_seq);
        self.next_seq += 1;
        self.counts.insert(key.clone(), rank);
        self.order.insert(rank, key.clone());
    }

    fn on_access(&mut self, key: &K) {
        self.bump(key);
    }

    fn on_remove(&mut self, key: &K) {
        if let Some(rank) = self.counts.remove(key) {
            self.order.remove(&rank);
        }
    }

    fn select_victim(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.counts.remove(&key);
        Some(key)
    }

    fn ordered_keys(&self) -> Vec<K> {
        self.order.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.counts.len()
    }
}
