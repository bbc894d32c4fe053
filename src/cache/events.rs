//! Event Bus Module
//!
//! Synchronous delivery of entry lifecycle events to registered listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

/// Kind of lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    /// Explicit invalidation
    Removed,
    /// Dropped because of ttl/tti
    Expired,
    /// Dropped because of capacity pressure
    Evicted,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Created,
        EventKind::Updated,
        EventKind::Removed,
        EventKind::Expired,
        EventKind::Evicted,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of event kinds a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter(u8);

impl EventFilter {
    pub fn all() -> Self {
        Self::of(&EventKind::ALL)
    }

    pub fn of(kinds: &[EventKind]) -> Self {
        Self(kinds.iter().fold(0, |bits, kind| bits | kind.bit()))
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        Self(kind.bit())
    }
}

/// A single lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent<K, V> {
    pub kind: EventKind,
    pub key: K,
    /// Value before the change, if any
    pub old_value: Option<V>,
    /// Value after the change, if any
    pub new_value: Option<V>,
}

impl<K, V> CacheEvent<K, V> {
    pub fn created(key: K, value: V) -> Self {
        Self {
            kind: EventKind::Created,
            key,
            old_value: None,
            new_value: Some(value),
        }
    }

    pub fn updated(key: K, old: Option<V>, value: V) -> Self {
        Self {
            kind: EventKind::Updated,
            key,
            old_value: old,
            new_value: Some(value),
        }
    }

    /// Removal of kind `Removed`, `Expired` or `Evicted`.
    pub fn removal(kind: EventKind, key: K, old: Option<V>) -> Self {
        Self {
            kind,
            key,
            old_value: old,
            new_value: None,
        }
    }
}

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<K, V> = Arc<dyn Fn(&CacheEvent<K, V>) + Send + Sync>;

struct Registration<K, V> {
    id: ListenerId,
    filter: EventFilter,
    handler: Handler<K, V>,
}

// == Event Bus ==
/// Ordered list of listeners.
pub struct EventBus<K, V> {
    listeners: RwLock<Vec<Registration<K, V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for EventBus<K, V> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> EventBus<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    // == Subscribe ==
    /// Registers a handler for the given kinds, after all earlier listeners.
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> ListenerId
    where
        F: Fn(&CacheEvent<K, V>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Registration {
            id,
            filter: filter.into(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|reg| reg.id != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// True when at least one listener wants `kind`.
    pub fn wants(&self, kind: EventKind) -> bool {
        self.listeners.read().iter().any(|reg| reg.filter.contains(kind))
    }

    // == Dispatch ==
    /// Invokes every matching listener in registration order.
    ///
    /// Handlers are called without the registry lock held, so they may use
    /// the cache (including subscribing). A panicking handler is logged and
    /// skipped.
    pub fn dispatch(&self, event: &CacheEvent<K, V>) {
        let handlers: Vec<(ListenerId, Handler<K, V>)> = self
            .listeners
            .read()
            .iter()
            .filter(|reg| reg.filter.contains(event.kind))
            .map(|reg| (reg.id, Arc::clone(&reg.handler)))
            .collect();

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(listener = id.0, kind = ?event.kind, "Cache listener panicked");
            }
        }
    }

    pub fn dispatch_all(&self, events: &[CacheEvent<K, V>]) {
        for event in events {
            self.dispatch(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_filter() {
        let filter = EventFilter::of(&[EventKind::Created, EventKind::Expired]);
        assert!(filter.contains(EventKind::Created));
        assert!(filter.contains(EventKind::Expired));
        assert!(!filter.contains(EventKind::Evicted));
        assert!(EventFilter::all().contains(EventKind::Removed));
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let bus: EventBus<String, u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventFilter::all(), move |e: &CacheEvent<String, u32>| {
                seen.lock().push(format!("{}:{}", tag, e.key));
            });
        }

        bus.dispatch(&CacheEvent::created("k".to_string(), 1));
        assert_eq!(*seen.lock(), vec!["first:k", "second:k"]);
    }

    #[test]
    fn test_dispatch_respects_filter() {
        let bus: EventBus<&str, u32> = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe(EventKind::Evicted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch(&CacheEvent::created("a", 1));
        bus.dispatch(&CacheEvent::removal(EventKind::Evicted, "a", Some(1)));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(bus.wants(EventKind::Evicted));
        assert!(!bus.wants(EventKind::Created));
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus: EventBus<&str, u32> = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        bus.subscribe(EventFilter::all(), |_| panic!("listener failure"));
        let counter = Arc::clone(&count);
        bus.subscribe(EventFilter::all(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch(&CacheEvent::created("a", 1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_and_clear() {
        let bus: EventBus<&str, u32> = EventBus::new();
        let a = bus.subscribe(EventFilter::all(), |_| {});
        bus.subscribe(EventFilter::all(), |_| {});

        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        assert_eq!(bus.len(), 1);

        bus.clear();
        assert!(bus.is_empty());
    }
}
