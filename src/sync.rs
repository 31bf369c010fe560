//! Reconciliation engine: conditional remote fetches with retry and debounce.
//!
//! Per key the engine moves `IDLE -> SYNCING -> IDLE` for an immediate sync,
//! or `IDLE -> scheduled -> SYNCING -> IDLE` for a debounced one. At most one
//! debounced sync is pending per key; a new `force_sync` for that key cancels
//! and replaces it. Once SYNCING has started it runs to completion.
//!
//! Failed attempts back off linearly: attempt `i` (0-based) that fails waits
//! `retry_delay * (i + 1)` before the next one. The error of the final attempt
//! is returned to the caller.

use crate::entry::CacheOptions;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::observability::QueryStats;
use crate::remote::{RemoteResponse, RemoteSource};
use crate::scheduler::Scheduler;
use crate::store::CacheStore;
use crate::subscription::SubscriptionRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Per-call reconciliation policy.
///
/// # Example
///
/// ```
/// use cache_sync::SyncOptions;
/// use std::time::Duration;
///
/// let options = SyncOptions::default()
///     .debounced(Duration::from_millis(300))
///     .with_retry_attempts(5);
/// assert!(!options.immediate);
/// ```
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Run now (`true`) or after `debounce` (`false`).
    pub immediate: bool,

    /// Delay of a debounced sync.
    pub debounce: Duration,

    /// Total fetch attempts before giving up. Zero is treated as one.
    pub retry_attempts: u32,

    /// Base of the linear backoff between attempts.
    pub retry_delay: Duration,

    /// Lifetime of the refreshed entry; `None` keeps the entry's own
    /// lifetime on "not modified" and uses the store default on new data.
    pub max_age: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            immediate: true,
            debounce: Duration::from_millis(500),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            max_age: None,
        }
    }
}

impl SyncOptions {
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Defer the sync by `debounce`.
    pub fn debounced(mut self, debounce: Duration) -> Self {
        self.immediate = false;
        self.debounce = debounce;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Result of a completed sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// New data was stored and listeners were notified.
    Updated,

    /// The cached payload is current; its lifetime was extended.
    NotModified,
}

/// What `force_sync` did.
#[derive(Debug)]
pub enum SyncStatus {
    Done(SyncOutcome),
    Scheduled(PendingSync),
}

impl SyncStatus {
    /// Wait for the outcome, whether the sync ran immediately or was deferred.
    pub async fn outcome(self) -> Result<SyncOutcome> {
        match self {
            SyncStatus::Done(outcome) => Ok(outcome),
            SyncStatus::Scheduled(pending) => pending.wait().await,
        }
    }
}

/// A debounced sync that has not run yet.
///
/// Dropping it does not cancel the sync.
#[derive(Debug)]
pub struct PendingSync {
    key: String,
    rx: oneshot::Receiver<Result<SyncOutcome>>,
}

impl PendingSync {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the deferred sync to finish.
    ///
    /// # Errors
    /// Returns `Error::Superseded` if a later call replaced it, or the sync
    /// error once its attempts are exhausted
    pub async fn wait(self) -> Result<SyncOutcome> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Superseded(self.key)),
        }
    }
}

/// Marks a key as in flight for the lifetime of one sync.
struct InFlight {
    map: Arc<DashMap<String, usize>>,
    key: String,
}

impl InFlight {
    fn enter(map: &Arc<DashMap<String, usize>>, key: &str) -> Self {
        *map.entry(key.to_string()).or_insert(0) += 1;
        InFlight {
            map: Arc::clone(map),
            key: key.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(mut count) = self.map.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
        self.map.remove_if(&self.key, |_, count| *count == 0);
    }
}

/// Reconciles cached keys against a [`RemoteSource`].
///
/// Cheap to clone; clones share the scheduler and in-flight bookkeeping.
///
/// # Example
///
/// ```
/// use cache_sync::{CacheConfig, CacheStore, SubscriptionRegistry, SyncEngine, SyncOptions, SyncOutcome};
/// use cache_sync::remote::InMemoryRemote;
/// use cache_sync::storage::MemoryStorage;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cache_sync::Result<()> {
/// let store = Arc::new(CacheStore::new(CacheConfig::default(), MemoryStorage::new()));
/// let remote = InMemoryRemote::new();
/// remote.insert("course:42", json!({"title": "Compilers"}));
///
/// let engine = SyncEngine::new(SubscriptionRegistry::new(store.clone()), remote);
/// let outcome = engine.force_sync("course:42", &SyncOptions::default()).await?.outcome().await?;
/// assert_eq!(outcome, SyncOutcome::Updated);
///
/// let again = engine.force_sync("course:42", &SyncOptions::default()).await?.outcome().await?;
/// assert_eq!(again, SyncOutcome::NotModified);
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine<R> {
    registry: SubscriptionRegistry,
    remote: Arc<R>,
    scheduler: Scheduler,
    in_flight: Arc<DashMap<String, usize>>,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        SyncEngine {
            registry: self.registry.clone(),
            remote: Arc::clone(&self.remote),
            scheduler: self.scheduler.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<R: RemoteSource> SyncEngine<R> {
    pub fn new(registry: SubscriptionRegistry, remote: R) -> Self {
        SyncEngine {
            registry,
            remote: Arc::new(remote),
            scheduler: Scheduler::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        self.registry.store()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Timer set shared by debounced syncs and other deferred jobs.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Reconcile `key` now, or after `options.debounce` when not immediate.
    ///
    /// Any debounced sync already pending for the key is cancelled first.
    ///
    /// # Errors
    /// For an immediate sync, returns the last remote error once
    /// `retry_attempts` are exhausted. A deferred sync reports through
    /// [`PendingSync::wait`]
    pub async fn force_sync(
        &self,
        key: impl Into<CacheKey>,
        options: &SyncOptions,
    ) -> Result<SyncStatus> {
        let key = key.into();
        let job_key = key.storage_key();
        self.scheduler.cancel(&job_key);

        if options.immediate {
            return self.sync_now(&key, options).await.map(SyncStatus::Done);
        }

        let (tx, rx) = oneshot::channel();
        let engine = self.clone();
        let options = options.clone();
        let delay = options.debounce;
        self.scheduler.schedule(&job_key, delay, async move {
            let result = engine.sync_now(&key, &options).await;
            // The caller may have dropped its PendingSync.
            let _ = tx.send(result);
        });

        Ok(SyncStatus::Scheduled(PendingSync { key: job_key, rx }))
    }

    /// Cancel a pending debounced sync. Returns whether one was pending.
    pub fn cancel(&self, key: impl Into<CacheKey>) -> bool {
        self.scheduler.cancel(&key.into().storage_key())
    }

    /// Whether a debounced sync is waiting for `key`.
    pub fn is_pending(&self, key: impl Into<CacheKey>) -> bool {
        self.scheduler.is_pending(&key.into().storage_key())
    }

    /// Whether a sync for `key` is currently talking to the remote.
    pub fn is_syncing(&self, key: impl Into<CacheKey>) -> bool {
        self.in_flight.contains_key(&key.into().storage_key())
    }

    /// Counters for debugging dashboards.
    pub fn stats(&self) -> QueryStats {
        let cache = self.store().stats();
        QueryStats {
            queries: cache.total,
            stale: cache.expired,
            fetching: self.in_flight.len(),
        }
    }

    async fn sync_now(&self, key: &CacheKey, options: &SyncOptions) -> Result<SyncOutcome> {
        let storage_key = key.storage_key();
        let _in_flight = InFlight::enter(&self.in_flight, &storage_key);
        let attempts = options.retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.attempt(key, &storage_key, options).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(
                        "Sync {} attempt {}/{} failed: {}",
                        storage_key,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(options.retry_delay * (attempt + 1)).await;
                    }
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| Error::RemoteError(format!("sync {} made no attempt", storage_key)));
        error!(
            "✗ Sync {} failed after {} attempts: {}",
            storage_key, attempts, error
        );
        Err(error)
    }

    /// One conditional fetch. When the remote answers "not modified" but the
    /// entry has expired meanwhile, refetch without a precondition.
    async fn attempt(
        &self,
        key: &CacheKey,
        storage_key: &str,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        // Re-read each attempt: a push update may have landed meanwhile.
        let mut tag = self.store().entry_tag(key);
        loop {
            let response = self.remote.fetch(storage_key, tag.as_deref()).await?;
            if let Some(outcome) = self.apply(key, response, options) {
                return Ok(outcome);
            }
            if tag.take().is_none() {
                return Err(Error::RemoteError(format!(
                    "{} reported not modified for an unconditional fetch",
                    storage_key
                )));
            }
            warn!(
                "Remote reported {} not modified but the cached entry expired; refetching",
                storage_key
            );
        }
    }

    /// Returns `None` for a "not modified" answer with no live entry to extend.
    fn apply(
        &self,
        key: &CacheKey,
        response: RemoteResponse,
        options: &SyncOptions,
    ) -> Option<SyncOutcome> {
        match response {
            RemoteResponse::NotModified => {
                if !self.store().touch(key, options.max_age) {
                    return None;
                }
                debug!("✓ Sync {} not modified", key);
                Some(SyncOutcome::NotModified)
            }
            RemoteResponse::Modified { data, entry_tag } => {
                let cache_options = CacheOptions {
                    max_age: options.max_age,
                    version: None,
                    entry_tag,
                };
                self.registry.update_state(key, data, &cache_options);
                debug!("✓ Sync {} updated", key);
                Some(SyncOutcome::Updated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::remote::InMemoryRemote;
    use crate::storage::MemoryStorage;
    use crate::store::CacheConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine(remote: InMemoryRemote) -> (SyncEngine<InMemoryRemote>, MockClock) {
        let clock = MockClock::default();
        let store = CacheStore::with_clock(
            CacheConfig::default(),
            MemoryStorage::new(),
            Arc::new(clock.clone()),
        );
        let registry = SubscriptionRegistry::new(Arc::new(store));
        (SyncEngine::new(registry, remote), clock)
    }

    fn fast_retry() -> SyncOptions {
        SyncOptions::default().with_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_sync_stores_remote_data_and_notifies() {
        let remote = InMemoryRemote::new();
        remote.insert("k", json!({"v": 1}));
        let (engine, _clock) = engine(remote);

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let _sub = engine.registry().subscribe("k", move |new, _| {
            assert_eq!(new, Some(&json!({"v": 1})));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = engine
            .force_sync("k", &SyncOptions::default())
            .await
            .expect("sync")
            .outcome()
            .await
            .expect("outcome");
        assert_eq!(outcome, SyncOutcome::Updated);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(engine.store().read_value("k"), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_not_modified_extends_lifetime() {
        let remote = InMemoryRemote::new();
        remote.insert("k", json!("same"));
        let (engine, clock) = engine(remote);
        let options = SyncOptions::default().with_max_age(Duration::from_secs(1));

        engine.force_sync("k", &options).await.expect("first");
        let before = engine.store().entry("k").expect("cached").expires_at;

        clock.advance(Duration::from_millis(600));
        let status = engine.force_sync("k", &options).await.expect("second");
        assert!(matches!(status, SyncStatus::Done(SyncOutcome::NotModified)));

        let after = engine.store().entry("k").expect("cached");
        assert_eq!(after.expires_at, before + 600);
        assert_eq!(after.data, json!("same"));
    }

    #[tokio::test]
    async fn test_sync_stores_remote_tag() {
        let remote = InMemoryRemote::new();
        remote.insert("k", json!(1));
        let (engine, _clock) = engine(remote);

        engine.force_sync("k", &fast_retry()).await.expect("sync");
        assert_eq!(
            engine.store().entry_tag("k"),
            Some(crate::tag::entry_tag(&json!(1)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let remote = InMemoryRemote::new();
        remote.insert("k", json!(1));
        remote.fail_next(2);
        let (engine, _clock) = engine(remote);

        let status = engine.force_sync("k", &fast_retry()).await.expect("third attempt wins");
        assert!(matches!(status, SyncStatus::Done(SyncOutcome::Updated)));
        assert_eq!(engine.remote().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_error_and_leave_cache() {
        let remote = InMemoryRemote::new();
        remote.insert("k", json!(1));
        remote.fail_next(10);
        let (engine, _clock) = engine(remote);

        let result = engine.force_sync("k", &fast_retry()).await;
        assert!(matches!(result, Err(Error::RemoteError(_))));
        assert_eq!(engine.remote().calls(), 3);
        assert!(!engine.store().has("k"));
        assert!(!engine.is_syncing("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_pending_sync_is_superseded() {
        let remote = InMemoryRemote::new();
        remote.insert("k", json!(1));
        let (engine, _clock) = engine(remote);
        let options = SyncOptions::default().debounced(Duration::from_millis(300));

        let first = match engine.force_sync("k", &options).await.expect("schedule") {
            SyncStatus::Scheduled(pending) => pending,
            other => panic!("expected Scheduled, got {:?}", other),
        };
        let second = engine.force_sync("k", &options).await.expect("schedule");

        assert!(matches!(first.wait().await, Err(Error::Superseded(_))));
        assert_eq!(second.outcome().await.expect("runs"), SyncOutcome::Updated);
        assert_eq!(engine.remote().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_sync_cancels_pending() {
        let remote = InMemoryRemote::new();
        remote.insert("k", json!(1));
        let (engine, _clock) = engine(remote);

        engine
            .force_sync("k", &SyncOptions::default().debounced(Duration::from_millis(300)))
            .await
            .expect("schedule");
        assert!(engine.is_pending("k"));

        engine.force_sync("k", &SyncOptions::default()).await.expect("sync");
        assert!(!engine.is_pending("k"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.remote().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_count_in_flight() {
        let remote = InMemoryRemote::new().with_latency(Duration::from_millis(100));
        remote.insert("k", json!(1));
        let (engine, _clock) = engine(remote);

        let background = engine.clone();
        let task = tokio::spawn(async move {
            background.force_sync("k", &SyncOptions::default()).await.map(|_| ())
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.stats().fetching, 1);
        assert!(engine.is_syncing("k"));

        task.await.expect("join").expect("sync");
        let stats = engine.stats();
        assert_eq!(stats.fetching, 0);
        assert_eq!(stats.queries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_modified_after_expiry_refetches() {
        let remote = InMemoryRemote::new().with_latency(Duration::from_millis(50));
        remote.insert("k", json!("same"));
        let (engine, clock) = engine(remote);
        engine.registry().update_state(
            "k",
            json!("same"),
            &CacheOptions::default().with_max_age(Duration::from_millis(100)),
        );

        let background = engine.clone();
        let task = tokio::spawn(async move {
            background.force_sync("k", &SyncOptions::default()).await
        });

        // The entry dies while the conditional fetch is on the wire.
        tokio::time::sleep(Duration::from_millis(10)).await;
        clock.advance(Duration::from_millis(200));

        let status = task.await.expect("join").expect("sync");
        assert!(matches!(status, SyncStatus::Done(SyncOutcome::Updated)));
        assert_eq!(engine.remote().calls(), 2);
        assert_eq!(engine.store().read_value("k"), Some(json!("same")));
    }
}
