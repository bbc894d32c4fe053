//! Configuration Module
//!
//! Describes a cache instance: its tiers, expiry, persistence and maintenance
//! settings. Values can be loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CacheError, Result};

// == Tier Kind ==
/// Storage medium of a tier, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TierKind {
    /// Live values
    Heap,
    /// Encoded values held in memory
    OffHeap,
    /// Encoded values persisted through snapshots
    Disk,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Heap => write!(f, "heap"),
            TierKind::OffHeap => write!(f, "off-heap"),
            TierKind::Disk => write!(f, "disk"),
        }
    }
}

// == Capacity ==
/// Capacity bound of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Maximum number of resident entries
    Entries(usize),
    /// Maximum sum of entry size estimates
    Bytes(u64),
}

impl Capacity {
    fn is_zero(&self) -> bool {
        matches!(self, Capacity::Entries(0) | Capacity::Bytes(0))
    }
}

// == Eviction Strategy ==
/// Victim selection strategy for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionStrategy {
    /// Least recently used
    #[default]
    Lru,
    /// Least frequently used
    Lfu,
    /// First in, first out
    Fifo,
}

// == Tier Config ==
/// Configuration of a single tier.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub kind: TierKind,
    pub capacity: Capacity,
    pub eviction: EvictionStrategy,
    /// Overrides the cache-wide expiry for this tier
    pub time_to_live: Option<Duration>,
    pub time_to_idle: Option<Duration>,
}

impl TierConfig {
    /// LRU tier with the cache-wide expiry.
    pub fn new(kind: TierKind, capacity: Capacity) -> Self {
        Self {
            kind,
            capacity,
            eviction: EvictionStrategy::Lru,
            time_to_live: None,
            time_to_idle: None,
        }
    }

    pub fn heap(entries: usize) -> Self {
        Self::new(TierKind::Heap, Capacity::Entries(entries))
    }

    pub fn off_heap(bytes: u64) -> Self {
        Self::new(TierKind::OffHeap, Capacity::Bytes(bytes))
    }

    pub fn disk(bytes: u64) -> Self {
        Self::new(TierKind::Disk, Capacity::Bytes(bytes))
    }

    pub fn with_eviction(mut self, eviction: EvictionStrategy) -> Self {
        self.eviction = eviction;
        self
    }
}

// == Corrupt Snapshot Policy ==
/// What to do when the snapshot found at startup fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptSnapshotPolicy {
    /// Refuse to open the cache
    #[default]
    Fail,
    /// Move the file aside to `<path>.corrupt`, log, and start empty
    StartEmpty,
}

impl std::str::FromStr for CorruptSnapshotPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail" => Ok(Self::Fail),
            "start-empty" => Ok(Self::StartEmpty),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown corrupt snapshot policy '{}'",
                other
            ))),
        }
    }
}

// == Cache Config ==
/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Tiers ordered fastest first
    pub tiers: Vec<TierConfig>,
    /// Entries go stale this long after their last write
    pub time_to_live: Option<Duration>,
    /// Entries go stale this long after their last access
    pub time_to_idle: Option<Duration>,
    /// Snapshot file of the disk tier
    pub persistence_path: Option<PathBuf>,
    /// Largest encoded value accepted when a disk tier is configured
    pub max_object_size: Option<u64>,
    /// Deepest value nesting accepted when a disk tier is configured
    pub max_object_graph_depth: Option<usize>,
    /// Background sweep period, None disables the background task
    pub maintenance_interval: Option<Duration>,
    /// Keys checked per sweep batch
    pub sweep_batch_size: usize,
    /// Period of background snapshot writes
    pub checkpoint_interval: Option<Duration>,
    /// Default bound on waiting for a load
    pub load_timeout: Option<Duration>,
    /// Move lower-tier hits to the top tier
    pub promote_on_hit: bool,
    pub corrupt_snapshot_policy: CorruptSnapshotPolicy,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_HEAP_ENTRIES` - Heap tier entry bound (default: 1000)
    /// - `CACHE_OFFHEAP_BYTES` - Adds an off-heap tier of this many bytes
    /// - `CACHE_DISK_BYTES` - Adds a disk tier of this many bytes
    /// - `CACHE_TTL_SECS` / `CACHE_TTI_SECS` - Expiry (default: none)
    /// - `CACHE_PERSISTENCE_PATH` - Snapshot path of the disk tier
    /// - `CACHE_MAX_OBJECT_SIZE` / `CACHE_MAX_OBJECT_GRAPH_DEPTH` - Disk limits
    /// - `CACHE_MAINTENANCE_INTERVAL_SECS` - Sweep period (default: 1, 0 disables)
    /// - `CACHE_SWEEP_BATCH_SIZE` - Keys per sweep batch (default: 256)
    /// - `CACHE_CHECKPOINT_INTERVAL_SECS` - Checkpoint period (default: none)
    /// - `CACHE_LOAD_TIMEOUT_MS` - Load wait bound (default: none)
    /// - `CACHE_PROMOTE_ON_HIT` - Promote lower-tier hits (default: true)
    /// - `CACHE_CORRUPT_SNAPSHOT_POLICY` - `fail` or `start-empty` (default: fail)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mut tiers = vec![TierConfig::heap(
            parse_var("CACHE_HEAP_ENTRIES")?.unwrap_or(1000),
        )];
        if let Some(bytes) = parse_var("CACHE_OFFHEAP_BYTES")? {
            tiers.push(TierConfig::off_heap(bytes));
        }
        if let Some(bytes) = parse_var("CACHE_DISK_BYTES")? {
            tiers.push(TierConfig::disk(bytes));
        }

        let maintenance_interval = match parse_var::<u64>("CACHE_MAINTENANCE_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.maintenance_interval,
        };

        Ok(Self {
            tiers,
            time_to_live: parse_var("CACHE_TTL_SECS")?.map(Duration::from_secs),
            time_to_idle: parse_var("CACHE_TTI_SECS")?.map(Duration::from_secs),
            persistence_path: env::var_os("CACHE_PERSISTENCE_PATH").map(PathBuf::from),
            max_object_size: parse_var("CACHE_MAX_OBJECT_SIZE")?,
            max_object_graph_depth: parse_var("CACHE_MAX_OBJECT_GRAPH_DEPTH")?,
            maintenance_interval,
            sweep_batch_size: parse_var("CACHE_SWEEP_BATCH_SIZE")?
                .unwrap_or(defaults.sweep_batch_size),
            checkpoint_interval: parse_var("CACHE_CHECKPOINT_INTERVAL_SECS")?
                .map(Duration::from_secs),
            load_timeout: parse_var("CACHE_LOAD_TIMEOUT_MS")?.map(Duration::from_millis),
            promote_on_hit: parse_var("CACHE_PROMOTE_ON_HIT")?
                .unwrap_or(defaults.promote_on_hit),
            corrupt_snapshot_policy: parse_var("CACHE_CORRUPT_SNAPSHOT_POLICY")?
                .unwrap_or_default(),
        })
    }

    // == Validate ==
    /// Checks the configuration once, before a cache is built from it.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CacheError::InvalidConfig(msg.to_string()));

        if self.tiers.is_empty() {
            return invalid("at least one tier is required");
        }
        if self.tiers.windows(2).any(|w| w[0].kind >= w[1].kind) {
            return invalid("tiers must be ordered heap, off-heap, disk without duplicates");
        }
        if let Some(tier) = self.tiers.iter().find(|t| t.capacity.is_zero()) {
            return Err(CacheError::InvalidConfig(format!(
                "{} tier capacity must be non-zero",
                tier.kind
            )));
        }

        let has_disk = self.has_disk_tier();
        if has_disk && self.persistence_path.is_none() {
            return invalid("a disk tier requires a persistence path");
        }
        if !has_disk && self.persistence_path.is_some() {
            return invalid("a persistence path requires a disk tier");
        }
        if !has_disk && (self.max_object_size.is_some() || self.max_object_graph_depth.is_some()) {
            return invalid("object size limits only apply to a disk tier");
        }
        if self.sweep_batch_size == 0 {
            return invalid("sweep batch size must be non-zero");
        }
        Ok(())
    }

    pub fn has_disk_tier(&self) -> bool {
        self.tiers.iter().any(|t| t.kind == TierKind::Disk)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiers: vec![TierConfig::heap(1000)],
            time_to_live: None,
            time_to_idle: None,
            persistence_path: None,
            max_object_size: None,
            max_object_graph_depth: None,
            maintenance_interval: Some(Duration::from_secs(1)),
            sweep_batch_size: 256,
            checkpoint_interval: None,
            load_timeout: None,
            promote_on_hit: true,
            corrupt_snapshot_policy: CorruptSnapshotPolicy::Fail,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| CacheError::InvalidConfig(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.tiers.len(), 1);
        assert_eq!(config.tiers[0].capacity, Capacity::Entries(1000));
        assert_eq!(config.maintenance_interval, Some(Duration::from_secs(1)));
        assert_eq!(config.sweep_batch_size, 256);
        assert!(config.promote_on_hit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        for name in [
            "CACHE_HEAP_ENTRIES",
            "CACHE_OFFHEAP_BYTES",
            "CACHE_DISK_BYTES",
            "CACHE_TTL_SECS",
            "CACHE_MAINTENANCE_INTERVAL_SECS",
            "CACHE_CORRUPT_SNAPSHOT_POLICY",
        ] {
            env::remove_var(name);
        }

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.tiers.len(), 1);
        assert_eq!(config.tiers[0].kind, TierKind::Heap);
        assert!(config.time_to_live.is_none());
        assert_eq!(config.corrupt_snapshot_policy, CorruptSnapshotPolicy::Fail);
    }

    #[test]
    fn test_validate_rejects_bad_tier_order() {
        let config = CacheConfig {
            tiers: vec![TierConfig::off_heap(1024), TierConfig::heap(10)],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));

        let config = CacheConfig {
            tiers: vec![TierConfig::heap(10), TierConfig::heap(10)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_disk_requires_path() {
        let mut config = CacheConfig {
            tiers: vec![TierConfig::heap(10), TierConfig::disk(1 << 20)],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.persistence_path = Some(PathBuf::from("/tmp/cache.snap"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_limits_require_disk() {
        let config = CacheConfig {
            max_object_size: Some(1024),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let config = CacheConfig {
            tiers: vec![TierConfig::heap(0)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_corrupt_policy_from_str() {
        assert_eq!(
            "start-empty".parse::<CorruptSnapshotPolicy>().unwrap(),
            CorruptSnapshotPolicy::StartEmpty
        );
        assert!("maybe".parse::<CorruptSnapshotPolicy>().is_err());
    }
}
