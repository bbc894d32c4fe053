//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the cache against simple reference models.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{loader_fn, Cache};
use crate::clock::ManualClock;
use crate::config::{CacheConfig, Capacity, EvictionStrategy, TierConfig, TierKind};
use crate::error::LoadError;
use crate::persistence::MemoryFileSystem;

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;

fn heap_config(max_entries: usize) -> CacheConfig {
    CacheConfig {
        tiers: vec![TierConfig::heap(max_entries)],
        maintenance_interval: None,
        ..Default::default()
    }
}

fn heap_cache(max_entries: usize) -> Cache<String, String> {
    Cache::new(heap_config(max_entries)).unwrap()
}

fn tiered_config(heap: usize, off_heap: usize, disk: usize) -> CacheConfig {
    CacheConfig {
        tiers: vec![
            TierConfig::heap(heap),
            TierConfig::new(TierKind::OffHeap, Capacity::Entries(off_heap)),
            TierConfig::new(TierKind::Disk, Capacity::Entries(disk)),
        ],
        persistence_path: Some(PathBuf::from("/mem/cache.snap")),
        maintenance_interval: None,
        ..Default::default()
    }
}

fn unique(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

// == Strategies ==
/// Generates cache keys
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,64}".prop_map(|s| s)
}

/// Generates cache values
fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,256}".prop_map(|s| s)
}

fn eviction_strategy() -> impl Strategy<Value = EvictionStrategy> {
    prop_oneof![
        Just(EvictionStrategy::Lru),
        Just(EvictionStrategy::Lfu),
        Just(EvictionStrategy::Fifo),
    ]
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Put { key: String, value: String },
    Get { key: String },
    Invalidate { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Put { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Invalidate { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // **Property 1: Model Consistency and Statistics Accuracy**
    // *For any* sequence of operations on a cache that never fills up, every
    // lookup agrees with a plain map and the hit/miss counters match.
    #[test]
    fn prop_model_and_statistics(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let cache = heap_cache(TEST_MAX_ENTRIES);
        let mut model: HashMap<String, String> = HashMap::new();
        let (mut expected_hits, mut expected_misses) = (0u64, 0u64);

        for op in ops {
            match op {
                CacheOp::Put { key, value } => {
                    cache.put(key.clone(), value.clone()).unwrap();
                    model.insert(key, value);
                }
                CacheOp::Get { key } => {
                    let found = cache.get_if_present(&key).unwrap();
                    prop_assert_eq!(found.as_ref(), model.get(&key));
                    if found.is_some() {
                        expected_hits += 1;
                    } else {
                        expected_misses += 1;
                    }
                }
                CacheOp::Invalidate { key } => {
                    cache.invalidate(&key).unwrap();
                    model.remove(&key);
                }
            }
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.evictions, 0);
        prop_assert_eq!(cache.len(), model.len(), "Total entries mismatch");
    }

    // **Property 2: Overwrite Semantics**
    // *For any* key, writing V1 then V2 leaves exactly one entry holding V2.
    #[test]
    fn prop_overwrite_semantics(
        key in valid_key_strategy(),
        value1 in valid_value_strategy(),
        value2 in valid_value_strategy()
    ) {
        let cache = heap_cache(TEST_MAX_ENTRIES);
        cache.put(key.clone(), value1).unwrap();
        cache.put(key.clone(), value2.clone()).unwrap();

        prop_assert_eq!(cache.get_if_present(&key).unwrap(), Some(value2));
        prop_assert_eq!(cache.len(), 1, "Should have exactly one entry after overwrite");
    }

    // **Property 3: Capacity Enforcement**
    // *For any* sequence of writes and any eviction strategy, no tier ever
    // holds more entries than its capacity.
    #[test]
    fn prop_capacity_enforcement(
        entries in prop::collection::vec(
            (valid_key_strategy(), valid_value_strategy()),
            1..200
        ),
        strategy in eviction_strategy(),
        heap in 1usize..8,
        off_heap in 1usize..8,
    ) {
        let mut config = tiered_config(heap, off_heap, 16);
        for tier in &mut config.tiers {
            tier.eviction = strategy;
        }
        let cache: Cache<String, String> = Cache::builder(config)
            .filesystem(Arc::new(MemoryFileSystem::new()))
            .build()
            .unwrap();
        let limits = [heap, off_heap, 16];

        for (key, value) in entries {
            cache.put(key, value).unwrap();
            for ((kind, size), limit) in cache.tier_sizes().into_iter().zip(limits) {
                prop_assert!(
                    size.entries <= limit,
                    "{} tier holds {} entries, limit {}",
                    kind,
                    size.entries,
                    limit
                );
            }
        }
    }

    // **Property 4: LRU Eviction Order**
    // *For any* full single-tier cache, adding a new key evicts exactly the
    // least recently written key.
    #[test]
    fn prop_lru_eviction_order(
        initial_keys in prop::collection::vec(valid_key_strategy(), 3..10),
        new_key in valid_key_strategy(),
        new_value in valid_value_strategy()
    ) {
        let unique_keys = unique(initial_keys);
        prop_assume!(unique_keys.len() >= 2);
        prop_assume!(!unique_keys.contains(&new_key));

        let capacity = unique_keys.len();
        let cache = heap_cache(capacity);
        for key in &unique_keys {
            cache.put(key.clone(), format!("value_{}", key)).unwrap();
        }
        cache.put(new_key.clone(), new_value).unwrap();

        prop_assert_eq!(cache.len(), capacity, "Cache should remain at capacity after eviction");
        prop_assert!(cache.get_if_present(&unique_keys[0]).unwrap().is_none());
        prop_assert!(cache.get_if_present(&new_key).unwrap().is_some());
        for key in unique_keys.iter().skip(1) {
            prop_assert!(
                cache.get_if_present(key).unwrap().is_some(),
                "Key '{}' should still exist (not the oldest)",
                key
            );
        }
    }

    // **Property 5: LRU Access Tracking**
    // *For any* full cache, reading the oldest key makes the second oldest
    // the next victim.
    #[test]
    fn prop_lru_access_tracking(
        keys in prop::collection::vec(valid_key_strategy(), 3..8),
        new_key in valid_key_strategy(),
        new_value in valid_value_strategy()
    ) {
        let unique_keys = unique(keys);
        prop_assume!(unique_keys.len() >= 3);
        prop_assume!(!unique_keys.contains(&new_key));

        let cache = heap_cache(unique_keys.len());
        for key in &unique_keys {
            cache.put(key.clone(), format!("value_{}", key)).unwrap();
        }

        let accessed_key = &unique_keys[0];
        cache.get_if_present(accessed_key).unwrap();
        cache.put(new_key.clone(), new_value).unwrap();

        prop_assert!(cache.get_if_present(accessed_key).unwrap().is_some());
        prop_assert!(cache.get_if_present(&unique_keys[1]).unwrap().is_none());
        prop_assert!(cache.get_if_present(&new_key).unwrap().is_some());
    }

    // **Property 6: TTL Expiration Behavior**
    // *For any* entry and ttl, the entry is readable while its age is at most
    // the ttl and gone once the age exceeds it.
    #[test]
    fn prop_ttl_expiration_behavior(
        key in valid_key_strategy(),
        value in valid_value_strategy(),
        ttl_secs in 1u64..3600
    ) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let mut config = heap_config(TEST_MAX_ENTRIES);
        config.time_to_live = Some(Duration::from_secs(ttl_secs));
        let cache: Cache<String, String> = Cache::builder(config)
            .clock(clock.clone())
            .build()
            .unwrap();

        cache.put(key.clone(), value.clone()).unwrap();
        clock.advance(Duration::from_secs(ttl_secs));
        prop_assert_eq!(cache.get_if_present(&key).unwrap(), Some(value));

        clock.advance(Duration::from_millis(1));
        prop_assert_eq!(cache.get_if_present(&key).unwrap(), None);
        prop_assert_eq!(cache.stats().expirations, 1);
    }
}

// Fewer cases for tests that run a runtime per case
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    // **Property 7: Snapshot Round Trip**
    // *For any* set of entries that fits the disk tier, closing and reopening
    // the cache restores every entry.
    #[test]
    fn prop_snapshot_round_trip(
        entries in prop::collection::hash_map(valid_key_strategy(), valid_value_strategy(), 1..40)
    ) {
        let fs = Arc::new(MemoryFileSystem::new());
        let open = || -> Cache<String, String> {
            Cache::builder(tiered_config(4, 4, 64))
                .filesystem(fs.clone())
                .build()
                .unwrap()
        };

        let cache = open();
        for (key, value) in &entries {
            cache.put(key.clone(), value.clone()).unwrap();
        }
        tokio_test::block_on(cache.close()).unwrap();

        let reopened = open();
        prop_assert_eq!(reopened.len(), entries.len());
        for (key, value) in &entries {
            let restored = reopened.get_if_present(key).unwrap();
            prop_assert_eq!(restored.as_ref(), Some(value));
        }
    }

    // **Property 8: Load Coalescing**
    // *For any* number of concurrent misses on one key, the loader runs once
    // and every caller sees its value.
    #[test]
    fn prop_single_load_per_key(callers in 2usize..16, key in valid_key_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let results = rt.block_on(async move {
            let cache: Cache<String, String> = Cache::builder(heap_config(TEST_MAX_ENTRIES))
                .loader(loader_fn(move |key: String| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, LoadError>(format!("{}_value", key))
                    }
                }))
                .build()
                .unwrap();

            let handles: Vec<_> = (0..callers)
                .map(|_| {
                    let cache = cache.clone();
                    let key = key.clone();
                    tokio::spawn(async move { cache.get(&key).await })
                })
                .collect();

            let mut results = Vec::new();
            for handle in handles {
                results.push((handle.await.unwrap().unwrap(), key.clone()));
            }
            results
        });

        prop_assert_eq!(calls.load(Ordering::SeqCst), 1);
        for (value, key) in results {
            prop_assert_eq!(value, Some(format!("{}_value", key)));
        }
    }
}
