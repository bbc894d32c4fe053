//! Tiercache - A tiered in-process cache
//!
//! Heap, off-heap and disk tiers with LRU/LFU/FIFO eviction, TTL/TTI
//! expiry, coalesced loads, lifecycle events and crash-safe snapshots.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod persistence;
pub mod tasks;

pub use cache::{
    loader_fn, Cache, CacheBuilder, CacheEvent, CacheLoader, CacheStats, EventFilter, EventKind,
    ListenerId,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, Capacity, CorruptSnapshotPolicy, EvictionStrategy, TierConfig, TierKind,
};
pub use error::{CacheError, LoadError, Result};
pub use persistence::{FileSystem, LocalFileSystem, MemoryFileSystem};
