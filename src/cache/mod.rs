//! Cache Module
//!
//! Provides a tiered cache with pluggable eviction, TTL/TTI expiry, load
//! coalescing and lifecycle events.

mod codec;
mod entry;
mod events;
mod eviction;
mod expiry;
mod facade;
mod loader;
mod stats;
mod store;
mod tier;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use codec::{encoded_depth, CacheKey, CacheValue};
pub use entry::{CacheEntry, Payload};
pub use events::{CacheEvent, EventBus, EventFilter, EventKind, ListenerId};
pub use eviction::{policy_for, EvictionPolicy, FifoPolicy, LfuPolicy, LruPolicy};
pub use expiry::ExpiryPolicy;
pub use facade::{Cache, CacheBuilder};
pub use loader::{loader_fn, CacheLoader, FnLoader};
pub use stats::{CacheStats, StatsCounter};
pub use store::{EntryStore, StoreSize};
pub use tier::{EncodedEntry, Events, TierManager};
