//! Expiry Policy Module
//!
//! Time-to-live after write and time-to-idle after access.

use std::time::Duration;

use crate::cache::entry::CacheEntry;

// == Expiry Policy ==
/// Staleness rule for a tier. Both bounds may be set; either one expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Stale when `now - last_write > ttl`
    pub time_to_live: Option<Duration>,
    /// Stale when `now - last_access > tti`
    pub time_to_idle: Option<Duration>,
}

impl ExpiryPolicy {
    /// Entries never expire.
    pub fn eternal() -> Self {
        Self::default()
    }

    pub fn after_write(ttl: Duration) -> Self {
        Self {
            time_to_live: Some(ttl),
            time_to_idle: None,
        }
    }

    pub fn after_access(tti: Duration) -> Self {
        Self {
            time_to_live: None,
            time_to_idle: Some(tti),
        }
    }

    pub fn is_eternal(&self) -> bool {
        self.time_to_live.is_none() && self.time_to_idle.is_none()
    }

    // == Is Expired ==
    /// Checks whether an entry is stale at `now` (Unix milliseconds).
    ///
    /// An entry is still live at exactly `ttl` after its write; it expires
    /// once strictly more time has passed.
    pub fn is_expired<K, V>(&self, entry: &CacheEntry<K, V>, now: u64) -> bool {
        let past = |elapsed: u64, bound: Option<Duration>| {
            bound.is_some_and(|bound| elapsed as u128 > bound.as_millis())
        };
        past(entry.write_age(now), self.time_to_live) || past(entry.idle_time(now), self.time_to_idle)
    }

    /// Remaining time to live in milliseconds, None when eternal.
    pub fn remaining_millis<K, V>(&self, entry: &CacheEntry<K, V>, now: u64) -> Option<u64> {
        let left = |elapsed: u64, bound: Duration| (bound.as_millis() as u64).saturating_sub(elapsed);
        let ttl = self.time_to_live.map(|ttl| left(entry.write_age(now), ttl));
        let tti = self.time_to_idle.map(|tti| left(entry.idle_time(now), tti));
        match (ttl, tti) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Payload;
    use crate::config::TierKind;

    fn entry_at(now: u64) -> CacheEntry<&'static str, u32> {
        CacheEntry::new("k", Payload::Live(1), 1, TierKind::Heap, now)
    }

    #[test]
    fn test_eternal_never_expires() {
        let policy = ExpiryPolicy::eternal();
        assert!(policy.is_eternal());
        assert!(!policy.is_expired(&entry_at(0), u64::MAX));
        assert!(policy.remaining_millis(&entry_at(0), 10).is_none());
    }

    #[test]
    fn test_ttl_boundary() {
        let policy = ExpiryPolicy::after_write(Duration::from_secs(5));
        let entry = entry_at(1_000);

        assert!(!policy.is_expired(&entry, 1_000));
        assert!(!policy.is_expired(&entry, 6_000));
        assert!(policy.is_expired(&entry, 6_001));
        assert!(policy.is_expired(&entry, 7_000));
    }

    #[test]
    fn test_reads_do_not_extend_ttl() {
        let policy = ExpiryPolicy::after_write(Duration::from_secs(5));
        let mut entry = entry_at(0);
        entry.touch(4_000);

        assert!(policy.is_expired(&entry, 6_000));
    }

    #[test]
    fn test_tti_resets_on_access() {
        let policy = ExpiryPolicy::after_access(Duration::from_secs(2));
        let mut entry = entry_at(0);

        entry.touch(1_500);
        assert!(!policy.is_expired(&entry, 3_000));
        assert!(policy.is_expired(&entry, 3_600));
    }

    #[test]
    fn test_remaining_uses_tighter_bound() {
        let policy = ExpiryPolicy {
            time_to_live: Some(Duration::from_secs(10)),
            time_to_idle: Some(Duration::from_secs(3)),
        };
        let entry = entry_at(0);

        assert_eq!(policy.remaining_millis(&entry, 1_000), Some(2_000));
        assert_eq!(policy.remaining_millis(&entry, 5_000), Some(0));
    }
}
