//! Keyed, cancellable delayed jobs.
//!
//! At most one job is pending per key. Scheduling a job for a key that already
//! has one pending cancels the old job and replaces it: this is how debounce
//! coalescing works.
//!
//! A job leaves the pending set the moment its delay elapses, before its body
//! runs. A later `schedule` or `cancel` for the same key therefore never
//! interrupts a job that has already started.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Slot {
    id: u64,
    handle: JoinHandle<()>,
}

/// Set of pending delayed jobs, keyed by string.
///
/// Cheap to clone; clones share the pending set.
#[derive(Clone, Default)]
pub struct Scheduler {
    slots: Arc<DashMap<String, Slot>>,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` after `delay`, replacing any job pending under `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: &str, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slots = Arc::clone(&self.slots);
        let owned_key = key.to_string();
        // The task waits until its slot is registered, so it can always find
        // it when claiming.
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            if armed_rx.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            // Claim the slot. If it now belongs to a newer job we were
            // superseded between waking and getting here.
            if slots.remove_if(&owned_key, |_, slot| slot.id == id).is_none() {
                return;
            }
            job.await;
        });

        if let Some(previous) = self.slots.insert(key.to_string(), Slot { id, handle }) {
            previous.handle.abort();
            debug!("Replaced pending job for {} (delay {:?})", key, delay);
        } else {
            debug!("Scheduled job for {} (delay {:?})", key, delay);
        }
        let _ = armed_tx.send(());
    }

    /// Cancel the pending job for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some((_, slot)) => {
                slot.handle.abort();
                debug!("Cancelled pending job for {}", key);
                !slot.handle.is_finished()
            }
            None => false,
        }
    }

    /// Cancel every pending job.
    pub fn cancel_all(&self) {
        let keys: Vec<String> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.slots
            .get(key)
            .map(|slot| !slot.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.handle.is_finished())
            .count()
    }
}
