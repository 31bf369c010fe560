//! Per-key listeners and the state update/invalidate paths.
//!
//! `update_state` writes through to the store and then calls every listener
//! for the key with `(Some(new), previous)`. `invalidate_state` removes the
//! entry and calls every listener with `(None, None)`, meaning "your copy is
//! no longer valid, fetch fresh data".
//!
//! Dispatch is synchronous, in registration order, over a snapshot of the
//! listener list taken before the first call, so subscribing or unsubscribing
//! from inside a listener affects only later dispatches. A panicking listener
//! is caught and logged; the remaining listeners still run.

use crate::entry::CacheOptions;
use crate::key::CacheKey;
use crate::store::CacheStore;
use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Listener callback: `(new_value, previous_value)`.
///
/// `(None, None)` is the invalidation signal.
pub type Listener = Arc<dyn Fn(Option<&Value>, Option<&Value>) + Send + Sync>;

type ListenerMap = DashMap<String, Vec<(u64, Listener)>>;

/// Registry of per-key listeners, writing through to a [`CacheStore`].
///
/// Cheap to clone; clones share listeners and store.
///
/// # Example
///
/// ```
/// use cache_sync::{CacheConfig, CacheOptions, CacheStore, SubscriptionRegistry};
/// use cache_sync::storage::MemoryStorage;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let store = Arc::new(CacheStore::new(CacheConfig::default(), MemoryStorage::new()));
/// let registry = SubscriptionRegistry::new(store);
///
/// let subscription = registry.subscribe("course:42", |new, old| {
///     println!("course:42 changed from {:?} to {:?}", old, new);
/// });
/// registry.update_state("course:42", json!({"title": "Compilers"}), &CacheOptions::default());
/// subscription.unsubscribe();
/// ```
#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: Arc<CacheStore>,
    listeners: Arc<ListenerMap>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<CacheStore>) -> Self {
        SubscriptionRegistry {
            store,
            listeners: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Register a closure for `key`.
    pub fn subscribe<F>(&self, key: impl Into<CacheKey>, listener: F) -> Subscription
    where
        F: Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    {
        self.subscribe_listener(key, Arc::new(listener))
    }

    /// Register a shared listener for `key`.
    ///
    /// Registering the same `Arc` twice for one key is a no-op; the returned
    /// handle refers to the existing registration.
    pub fn subscribe_listener(&self, key: impl Into<CacheKey>, listener: Listener) -> Subscription {
        let key = key.into().storage_key();
        let mut slot = self.listeners.entry(key.clone()).or_default();

        let existing = slot
            .iter()
            .find(|(_, l)| Arc::ptr_eq(l, &listener))
            .map(|(id, _)| *id);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                slot.push((id, listener));
                id
            }
        };
        drop(slot);

        debug!("Subscribed listener {} to {}", id, key);
        Subscription {
            key,
            id,
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Number of listeners registered for `key`.
    pub fn listener_count(&self, key: impl Into<CacheKey>) -> usize {
        self.listeners
            .get(&key.into().storage_key())
            .map(|slot| slot.len())
            .unwrap_or(0)
    }

    /// Write `value` through to the store, then notify listeners with
    /// `(new, previous)`.
    pub fn update_state(&self, key: impl Into<CacheKey>, value: Value, options: &CacheOptions) {
        let key = key.into();
        let previous = self.store.write_value(&key, value.clone(), options);
        self.dispatch(&key.storage_key(), Some(&value), previous.as_ref());
    }

    /// Remove the entry, then signal every listener with `(None, None)`.
    pub fn invalidate_state(&self, key: impl Into<CacheKey>) {
        let key = key.into();
        self.store.invalidate(&key);
        self.dispatch(&key.storage_key(), None, None);
    }

    fn dispatch(&self, key: &str, new: Option<&Value>, previous: Option<&Value>) {
        let snapshot: Vec<(u64, Listener)> = match self.listeners.get(key) {
            Some(slot) => slot.clone(),
            None => return,
        };

        for (id, listener) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(new, previous)));
            if let Err(panic) = outcome {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!("Listener {} for {} panicked: {}", id, key, message);
            }
        }
    }
}

/// Handle to a registration. Call [`Subscription::unsubscribe`] to remove it.
///
/// Dropping the handle leaves the listener registered.
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    key: String,
    id: u64,
    listeners: Arc<ListenerMap>,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(self) {
        let now_empty = match self.listeners.get_mut(&self.key) {
            Some(mut slot) => {
                slot.retain(|(id, _)| *id != self.id);
                slot.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.listeners.remove_if(&self.key, |_, slot| slot.is_empty());
        }
        debug!("Unsubscribed listener {} from {}", self.id, self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::storage::MemoryStorage;
    use crate::store::CacheConfig;
    use serde_json::json;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(Option<Value>, Option<Value>)>>>;

    fn registry() -> SubscriptionRegistry {
        let store = CacheStore::with_clock(
            CacheConfig::default(),
            MemoryStorage::new(),
            Arc::new(MockClock::default()),
        );
        SubscriptionRegistry::new(Arc::new(store))
    }

    fn recorder(calls: &Calls) -> impl Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move |new, old| {
            calls
                .lock()
                .expect("lock")
                .push((new.cloned(), old.cloned()));
        }
    }

    #[test]
    fn test_update_delivers_new_and_previous() {
        let registry = registry();
        registry.update_state("k", json!("v1"), &CacheOptions::default());

        let calls: Calls = Arc::default();
        let _sub = registry.subscribe("k", recorder(&calls));
        registry.update_state("k", json!("v2"), &CacheOptions::default());

        let calls = calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (Some(json!("v2")), Some(json!("v1"))));
        assert_eq!(registry.store().read::<String>("k").as_deref(), Some("v2"));
    }

    #[test]
    fn test_invalidate_signals_absent_absent() {
        let registry = registry();
        registry.update_state("k", json!(1), &CacheOptions::default());

        let first: Calls = Arc::default();
        let second: Calls = Arc::default();
        let _a = registry.subscribe("k", recorder(&first));
        let _b = registry.subscribe("k", recorder(&second));

        registry.invalidate_state("k");

        assert_eq!(first.lock().expect("lock").as_slice(), &[(None, None)]);
        assert_eq!(second.lock().expect("lock").as_slice(), &[(None, None)]);
        assert!(!registry.store().has("k"));
    }

    #[test]
    fn test_duplicate_listener_is_idempotent() {
        let registry = registry();
        let calls: Calls = Arc::default();
        let listener: Listener = Arc::new(recorder(&calls));

        let a = registry.subscribe_listener("k", Arc::clone(&listener));
        let _b = registry.subscribe_listener("k", Arc::clone(&listener));
        assert_eq!(registry.listener_count("k"), 1);

        registry.update_state("k", json!(1), &CacheOptions::default());
        assert_eq!(calls.lock().expect("lock").len(), 1);

        a.unsubscribe();
        assert_eq!(registry.listener_count("k"), 0);
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let registry = registry();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for n in 0..3 {
            let order = Arc::clone(&order);
            subs.push(registry.subscribe("k", move |_, _| order.lock().expect("lock").push(n)));
        }

        registry.invalidate_state("k");
        assert_eq!(*order.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = registry();
        let calls: Calls = Arc::default();

        let _bad = registry.subscribe("k", |_, _| panic!("listener bug"));
        let _good = registry.subscribe("k", recorder(&calls));

        registry.update_state("k", json!(1), &CacheOptions::default());
        assert_eq!(calls.lock().expect("lock").len(), 1);
        assert!(registry.store().has("k"));
    }

    #[test]
    fn test_unsubscribe_during_dispatch_uses_snapshot() {
        let registry = registry();
        let calls: Calls = Arc::default();

        let later: Arc<Mutex<Option<Subscription>>> = Arc::default();
        let later_handle = Arc::clone(&later);
        let _first = registry.subscribe("k", move |_, _| {
            if let Some(sub) = later_handle.lock().expect("lock").take() {
                sub.unsubscribe();
            }
        });
        *later.lock().expect("lock") = Some(registry.subscribe("k", recorder(&calls)));

        registry.invalidate_state("k");
        assert_eq!(calls.lock().expect("lock").len(), 1, "snapshot still includes it");

        registry.invalidate_state("k");
        assert_eq!(calls.lock().expect("lock").len(), 1, "removed for later dispatches");
    }

    #[test]
    fn test_keys_are_isolated() {
        let registry = registry();
        let calls: Calls = Arc::default();
        let _sub = registry.subscribe("a", recorder(&calls));

        registry.update_state("b", json!(1), &CacheOptions::default());
        assert!(calls.lock().expect("lock").is_empty());
    }
}
