//! Entry Store Module
//!
//! Hash-indexed storage for the entries of one tier. Holds no policy; the
//! tier manager decides what goes in and what comes out.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::cache::entry::CacheEntry;
use crate::config::TierKind;

/// Resident entry count and byte total of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSize {
    pub entries: usize,
    pub bytes: u64,
}

// == Entry Store ==
/// Concurrent map of key to entry with a running byte total.
#[derive(Debug)]
pub struct EntryStore<K, V>
where
    K: Eq + Hash,
{
    tier: TierKind,
    /// Key-value storage, sharded
    entries: DashMap<K, CacheEntry<K, V>>,
    /// Sum of `size_bytes` of resident entries
    bytes: AtomicU64,
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    // == Constructor ==
    pub fn new(tier: TierKind) -> Self {
        Self {
            tier,
            entries: DashMap::new(),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn tier(&self) -> TierKind {
        self.tier
    }

    // == Lookup ==
    /// Returns a copy of the entry stored under `key`.
    pub fn lookup<Q>(&self, key: &Q) -> Option<CacheEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    // == Touch ==
    /// Records a read at `now`. Returns false if the key is absent.
    pub fn touch<Q>(&self, key: &Q, now: u64) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    // == Insert ==
    /// Stores an entry, returning the one it replaced.
    pub fn insert(&self, entry: CacheEntry<K, V>) -> Option<CacheEntry<K, V>> {
        let added = entry.size_bytes;
        let replaced = self.entries.insert(entry.key.clone(), entry);
        self.bytes.fetch_add(added, Ordering::Relaxed);
        if let Some(old) = &replaced {
            self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        replaced
    }

    // == Remove ==
    pub fn remove<Q>(&self, key: &Q) -> Option<CacheEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (_, entry) = self.entries.remove(key)?;
        self.bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
        Some(entry)
    }

    /// Removes every entry, returning them.
    pub fn drain(&self) -> Vec<CacheEntry<K, V>> {
        let keys = self.keys();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    // == For Each ==
    /// Visits every resident entry. The visitor must not call back into the store.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&CacheEntry<K, V>),
    {
        for item in self.entries.iter() {
            visitor(item.value());
        }
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|item| item.key().clone()).collect()
    }

    // == Size ==
    pub fn size(&self) -> StoreSize {
        StoreSize {
            entries: self.entries.len(),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
