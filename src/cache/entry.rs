//! Cache Entry Module
//!
//! Defines the record stored by every tier: the payload plus its timestamps.

use bytes::Bytes;

use crate::config::TierKind;

// == Payload ==
/// Value as held by a tier.
#[derive(Debug, Clone)]
pub enum Payload<V> {
    /// Live value (heap tier)
    Live(V),
    /// Encoded value (off-heap and disk tiers)
    Encoded(Bytes),
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub payload: Payload<V>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Last successful read (Unix milliseconds)
    pub last_access: u64,
    /// Last write (Unix milliseconds)
    pub last_write: u64,
    /// Encoded size of key and value in bytes
    pub size_bytes: u64,
    /// Tier currently holding the entry
    pub tier: TierKind,
}

impl<K, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates a fresh entry written at `now`.
    pub fn new(key: K, payload: Payload<V>, size_bytes: u64, tier: TierKind, now: u64) -> Self {
        Self {
            key,
            payload,
            created_at: now,
            last_access: now,
            last_write: now,
            size_bytes,
            tier,
        }
    }

    /// Records a successful read.
    pub fn touch(&mut self, now: u64) {
        self.last_access = now;
    }

    /// Replaces the payload as a write at `now`, keeping the creation time.
    pub fn overwrite(&mut self, payload: Payload<V>, size_bytes: u64, now: u64) {
        self.payload = payload;
        self.size_bytes = size_bytes;
        self.last_write = now;
        self.last_access = now;
    }

    /// Moves the entry to another tier with a payload in that tier's form.
    pub fn into_tier(self, tier: TierKind, payload: Payload<V>) -> Self {
        Self {
            payload,
            tier,
            ..self
        }
    }

    /// Milliseconds since the last write.
    pub fn write_age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_write)
    }

    /// Milliseconds since the last read or write.
    pub fn idle_time(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_access)
    }
}
