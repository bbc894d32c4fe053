//! Tier Manager Module
//!
//! Routes reads and writes across the heap, off-heap and disk stores and
//! moves entries between them.
//!
//! Reads that hit go through the sharded store index without taking the
//! manager lock. Anything that moves or removes entries (writes, promotions,
//! demotions, expiry) runs under a single mutation lock, so a key is resident
//! in at most one tier and capacity is enforced before the write returns.
//! Methods that change state return the lifecycle events they produced;
//! the caller dispatches them after the lock is released.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::codec::{self, CacheKey, CacheValue};
use crate::cache::entry::{CacheEntry, Payload};
use crate::cache::eviction::{policy_for, EvictionPolicy};
use crate::cache::events::{CacheEvent, EventKind};
use crate::cache::expiry::ExpiryPolicy;
use crate::cache::store::{EntryStore, StoreSize};
use crate::clock::Clock;
use crate::config::{CacheConfig, Capacity, TierConfig, TierKind};
use crate::error::{CacheError, Result};

pub type Events<K, V> = Vec<CacheEvent<K, V>>;

/// Entry as written to or read from a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEntry {
    pub key: Bytes,
    pub value: Bytes,
    pub created_at: u64,
    pub last_write: u64,
}

// == Tier ==
/// One storage layer: its store, eviction bookkeeping and expiry rule.
struct Tier<K: CacheKey, V> {
    config: TierConfig,
    store: EntryStore<K, V>,
    policy: Mutex<Box<dyn EvictionPolicy<K>>>,
    expiry: ExpiryPolicy,
}

impl<K: CacheKey, V: CacheValue> Tier<K, V> {
    fn new(config: TierConfig, default_expiry: ExpiryPolicy) -> Self {
        let expiry = ExpiryPolicy {
            time_to_live: config.time_to_live.or(default_expiry.time_to_live),
            time_to_idle: config.time_to_idle.or(default_expiry.time_to_idle),
        };
        Self {
            store: EntryStore::new(config.kind),
            policy: Mutex::new(policy_for(config.eviction)),
            expiry,
            config,
        }
    }

    pub fn kind(&self) -> TierKind {
        self.config.kind
    }

    pub fn size(&self) -> StoreSize {
        self.store.size()
    }

    fn over_capacity(&self) -> bool {
        let size = self.store.size();
        match self.config.capacity {
            Capacity::Entries(max) => size.entries > max,
            Capacity::Bytes(max) => size.bytes > max,
        }
    }

    fn fits(&self, size_bytes: u64) -> bool {
        match self.config.capacity {
            Capacity::Entries(_) => true,
            Capacity::Bytes(max) => size_bytes <= max,
        }
    }

    fn holds_live_values(&self) -> bool {
        self.config.kind == TierKind::Heap
    }

    fn insert(&self, entry: CacheEntry<K, V>) {
        let key = entry.key.clone();
        self.store.insert(entry);
        self.policy.lock().on_insert(&key);
    }

    fn remove(&self, key: &K) -> Option<CacheEntry<K, V>> {
        let entry = self.store.remove(key)?;
        self.policy.lock().on_remove(key);
        Some(entry)
    }
}

/// Limits applied to every write when a disk tier is configured.
#[derive(Debug, Clone, Copy)]
struct DiskLimits {
    max_object_size: Option<u64>,
    max_object_graph_depth: Option<usize>,
}

// == Tier Manager ==
pub struct TierManager<K: CacheKey, V> {
    tiers: Vec<Tier<K, V>>,
    clock: Arc<dyn Clock>,
    /// Serializes every structural change across tiers
    write_lock: Mutex<()>,
    promote_on_hit: bool,
    disk_limits: Option<DiskLimits>,
}

impl<K: CacheKey, V: CacheValue> TierManager<K, V> {
    // == Constructor ==
    /// Builds the tiers of a validated configuration.
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let default_expiry = ExpiryPolicy {
            time_to_live: config.time_to_live,
            time_to_idle: config.time_to_idle,
        };
        let disk_limits = config.has_disk_tier().then_some(DiskLimits {
            max_object_size: config.max_object_size,
            max_object_graph_depth: config.max_object_graph_depth,
        });

        Self {
            tiers: config
                .tiers
                .iter()
                .map(|tier| Tier::new(tier.clone(), default_expiry))
                .collect(),
            clock,
            write_lock: Mutex::new(()),
            promote_on_hit: config.promote_on_hit,
            disk_limits,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn tier_sizes(&self) -> Vec<(TierKind, StoreSize)> {
        self.tiers.iter().map(|t| (t.kind(), t.size())).collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(|t| t.store.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Get ==
    /// Looks a key up in tier order, touching or promoting a live hit.
    ///
    /// A stale entry found on the way is removed and reported as expired.
    pub fn get(&self, key: &K) -> Result<(Option<V>, Events<K, V>)> {
        let now = self.now();

        for (idx, tier) in self.tiers.iter().enumerate() {
            let Some(entry) = tier.store.lookup(key) else {
                continue;
            };
            if tier.expiry.is_expired(&entry, now) || (idx > 0 && self.promote_on_hit) {
                break;
            }
            tier.store.touch(key, now);
            tier.policy.lock().on_access(key);
            return Ok((Some(self.materialize(entry.payload)?), Vec::new()));
        }

        // Misses, expiry and promotion are settled under the lock, where no
        // entry can be between tiers.
        let _guard = self.write_lock.lock();
        let mut events = Vec::new();
        let Some(idx) = self.locate(key) else {
            return Ok((None, events));
        };

        let tier = &self.tiers[idx];
        let Some(entry) = tier.store.lookup(key) else {
            return Ok((None, events));
        };
        if tier.expiry.is_expired(&entry, now) {
            if let Some(stale) = tier.remove(key) {
                events.push(self.removal_event(EventKind::Expired, stale));
            }
            return Ok((None, events));
        }

        if idx == 0 || !self.promote_on_hit {
            tier.store.touch(key, now);
            tier.policy.lock().on_access(key);
            return Ok((Some(self.materialize(entry.payload)?), events));
        }

        let value = self.promote(idx, key, now, &mut events)?;
        Ok((value, events))
    }

    // == Peek ==
    /// Returns a live value without touching access metadata.
    pub fn peek(&self, key: &K) -> Result<Option<V>> {
        let now = self.now();
        for tier in &self.tiers {
            if let Some(entry) = tier.store.lookup(key) {
                if tier.expiry.is_expired(&entry, now) {
                    return Ok(None);
                }
                return self.materialize(entry.payload).map(Some);
            }
        }
        Ok(None)
    }

    // == Put ==
    /// Writes a value to the top tier, demoting or evicting victims.
    ///
    /// With `only_if_absent`, an existing live entry is left untouched and
    /// no events are produced.
    pub fn put(&self, key: K, value: V, only_if_absent: bool) -> Result<Events<K, V>> {
        let encoded = codec::encode(&value)?;
        if let Some(limits) = self.disk_limits {
            codec::check_disk_limits(
                &encoded,
                limits.max_object_size,
                limits.max_object_graph_depth,
            )?;
        }
        let size_bytes = codec::encode(&key)?.len() as u64 + encoded.len() as u64;

        let top = &self.tiers[0];
        if !top.fits(size_bytes) {
            if let Capacity::Bytes(limit) = top.config.capacity {
                return Err(CacheError::SizeLimitExceeded {
                    what: "entry size",
                    actual: size_bytes,
                    limit,
                });
            }
        }
        let payload = if top.holds_live_values() {
            Payload::Live(value.clone())
        } else {
            Payload::Encoded(encoded)
        };

        let _guard = self.write_lock.lock();
        let now = self.now();
        let mut events = Vec::new();

        let existing = match self.locate(&key) {
            Some(idx) => {
                let tier = &self.tiers[idx];
                let live = tier
                    .store
                    .lookup(&key)
                    .is_some_and(|entry| !tier.expiry.is_expired(&entry, now));
                if only_if_absent && live {
                    return Ok(events);
                }
                tier.remove(&key).map(|old| (old, live))
            }
            None => None,
        };

        let entry = match existing {
            Some((mut old, true)) => {
                let old_value = self.materialize(old.payload.clone()).ok();
                events.push(CacheEvent::updated(key.clone(), old_value, value));
                old.overwrite(payload, size_bytes, now);
                old.tier = top.kind();
                old
            }
            Some((stale, false)) => {
                events.push(self.removal_event(EventKind::Expired, stale));
                events.push(CacheEvent::created(key.clone(), value));
                CacheEntry::new(key, payload, size_bytes, top.kind(), now)
            }
            None => {
                events.push(CacheEvent::created(key.clone(), value));
                CacheEntry::new(key, payload, size_bytes, top.kind(), now)
            }
        };

        top.insert(entry);
        self.enforce_capacity(0, now, &mut events)?;
        Ok(events)
    }

    // == Invalidate ==
    /// Removes a key from whichever tier holds it.
    pub fn invalidate(&self, key: &K) -> Events<K, V> {
        let _guard = self.write_lock.lock();
        let now = self.now();
        let mut events = Vec::new();

        if let Some(idx) = self.locate(key) {
            let tier = &self.tiers[idx];
            if let Some(entry) = tier.remove(key) {
                let kind = if tier.expiry.is_expired(&entry, now) {
                    EventKind::Expired
                } else {
                    EventKind::Removed
                };
                events.push(self.removal_event(kind, entry));
            }
        }
        events
    }

    /// Empties every tier.
    pub fn invalidate_all(&self) -> Events<K, V> {
        let _guard = self.write_lock.lock();
        let now = self.now();
        let mut events = Vec::new();

        for tier in &self.tiers {
            let drained = tier.store.drain();
            *tier.policy.lock() = policy_for(tier.config.eviction);
            for entry in drained {
                let kind = if tier.expiry.is_expired(&entry, now) {
                    EventKind::Expired
                } else {
                    EventKind::Removed
                };
                events.push(self.removal_event(kind, entry));
            }
        }
        events
    }

    // == Expiry Sweep ==
    /// Keys currently resident in tier `idx`.
    pub fn tier_keys(&self, idx: usize) -> Vec<K> {
        self.tiers.get(idx).map(|t| t.store.keys()).unwrap_or_default()
    }

    /// Removes the stale entries among `keys` of tier `idx`.
    pub fn expire_batch(&self, idx: usize, keys: &[K]) -> Events<K, V> {
        let mut events = Vec::new();
        let Some(tier) = self.tiers.get(idx) else {
            return events;
        };
        if tier.expiry.is_eternal() {
            return events;
        }

        let _guard = self.write_lock.lock();
        let now = self.now();
        for key in keys {
            let stale = tier
                .store
                .lookup(key)
                .is_some_and(|entry| tier.expiry.is_expired(&entry, now));
            if stale {
                if let Some(entry) = tier.remove(key) {
                    events.push(self.removal_event(EventKind::Expired, entry));
                }
            }
        }
        events
    }

    // == Snapshot Support ==
    /// Encodes every live entry, least valuable first.
    ///
    /// Lower tiers come first and each tier is walked in eviction order, so
    /// replaying the list through a recency policy reproduces the ranking.
    pub fn export(&self) -> Result<Vec<EncodedEntry>> {
        let _guard = self.write_lock.lock();
        let now = self.now();
        let mut records = Vec::with_capacity(self.len());

        for tier in self.tiers.iter().rev() {
            let order = tier.policy.lock().ordered_keys();
            for key in order {
                let Some(entry) = tier.store.lookup(&key) else {
                    continue;
                };
                if tier.expiry.is_expired(&entry, now) {
                    continue;
                }
                let value = match entry.payload {
                    Payload::Live(value) => codec::encode(&value)?,
                    Payload::Encoded(bytes) => bytes,
                };
                records.push(EncodedEntry {
                    key: codec::encode(&entry.key)?,
                    value,
                    created_at: entry.created_at,
                    last_write: entry.last_write,
                });
            }
        }
        Ok(records)
    }

    /// Loads snapshot records into the disk tier, skipping stale ones.
    ///
    /// Returns the number of entries restored.
    pub fn restore(&self, records: Vec<EncodedEntry>) -> Result<usize> {
        let Some(disk) = self.tiers.iter().position(|t| t.kind() == TierKind::Disk) else {
            return Ok(0);
        };
        let _guard = self.write_lock.lock();
        let now = self.now();
        let tier = &self.tiers[disk];
        let mut skipped = 0usize;

        for record in records {
            let key: K = codec::decode(&record.key)?;
            let size_bytes = record.key.len() as u64 + record.value.len() as u64;
            let entry = CacheEntry {
                key,
                payload: Payload::Encoded(record.value),
                created_at: record.created_at,
                last_access: record.last_write,
                last_write: record.last_write,
                size_bytes,
                tier: TierKind::Disk,
            };
            if tier.expiry.is_expired(&entry, now) {
                skipped += 1;
                continue;
            }
            tier.insert(entry);
        }

        let mut dropped = Vec::new();
        self.enforce_capacity(disk, now, &mut dropped)?;
        if skipped > 0 || !dropped.is_empty() {
            debug!(
                "Snapshot restore skipped {} stale and dropped {} over-capacity entries",
                skipped,
                dropped.len()
            );
        }
        Ok(tier.store.len())
    }

    // == Internals ==
    /// Index of the tier holding `key`. Callers hold the write lock.
    fn locate(&self, key: &K) -> Option<usize> {
        self.tiers.iter().position(|t| t.store.contains(key))
    }

    /// Moves a live lower-tier entry to the top tier. Caller holds the lock.
    fn promote(
        &self,
        from: usize,
        key: &K,
        now: u64,
        events: &mut Events<K, V>,
    ) -> Result<Option<V>> {
        let source = &self.tiers[from];
        let Some(mut entry) = source.store.lookup(key) else {
            return Ok(None);
        };
        let value = self.materialize(entry.payload.clone())?;

        let top = &self.tiers[0];
        entry.touch(now);
        let payload = self.payload_for(top, entry.payload.clone())?;
        top.insert(entry.into_tier(top.kind(), payload));
        source.remove(key);

        debug!("Promoted entry from {} tier", source.kind());
        self.enforce_capacity(0, now, events)?;
        Ok(Some(value))
    }

    /// Demotes or evicts victims until tier `idx` is within capacity.
    fn enforce_capacity(&self, idx: usize, now: u64, events: &mut Events<K, V>) -> Result<()> {
        let tier = &self.tiers[idx];

        while tier.over_capacity() {
            let Some(victim) = tier.policy.lock().select_victim() else {
                break;
            };
            let Some(entry) = tier.store.remove(&victim) else {
                continue;
            };

            if tier.expiry.is_expired(&entry, now) {
                events.push(self.removal_event(EventKind::Expired, entry));
                continue;
            }

            match self.tiers.get(idx + 1) {
                Some(next) if next.fits(entry.size_bytes) => {
                    let payload = self.payload_for(next, entry.payload.clone())?;
                    next.insert(entry.into_tier(next.kind(), payload));
                    self.enforce_capacity(idx + 1, now, events)?;
                }
                _ => {
                    debug!("Evicted entry from {} tier", tier.kind());
                    events.push(self.removal_event(EventKind::Evicted, entry));
                }
            }
        }
        Ok(())
    }

    fn payload_for(&self, tier: &Tier<K, V>, payload: Payload<V>) -> Result<Payload<V>> {
        Ok(match (tier.holds_live_values(), payload) {
            (true, Payload::Encoded(bytes)) => Payload::Live(codec::decode(&bytes)?),
            (false, Payload::Live(value)) => Payload::Encoded(codec::encode(&value)?),
            (_, same) => same,
        })
    }

    fn materialize(&self, payload: Payload<V>) -> Result<V> {
        match payload {
            Payload::Live(value) => Ok(value),
            Payload::Encoded(bytes) => codec::decode(&bytes),
        }
    }

    fn removal_event(&self, kind: EventKind, entry: CacheEntry<K, V>) -> CacheEvent<K, V> {
        let old = self.materialize(entry.payload).ok();
        CacheEvent::removal(kind, entry.key, old)
    }
}
