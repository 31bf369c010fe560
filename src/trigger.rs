//! Trigger orchestration: environment signals to bulk reconciliation.
//!
//! [`SyncTriggers`] reconciles a fixed key set when connectivity returns,
//! when the process becomes visible or focused, and on a fixed interval. Each
//! trigger is switched on or off through [`TriggerConfig`].
//!
//! Signals arrive on a `tokio::sync::broadcast` channel so one source (an OS
//! hook, a UI shell) can drive any number of orchestrators.
//!
//! Teardown aborts the orchestrator's tasks and cancels the deferred jobs it
//! scheduled; nothing it owns fires afterwards.

use crate::error::Result;
use crate::key::CacheKey;
use crate::remote::RemoteSource;
use crate::sync::{SyncEngine, SyncOptions, SyncOutcome};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Environment change reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvironmentSignal {
    ConnectivityRestored,
    Visible,
    Focused,
}

#[derive(Clone, Debug)]
pub struct TriggerConfig {
    /// Reconcile on `ConnectivityRestored`.
    pub on_reconnect: bool,

    /// Reconcile on `Visible` and `Focused`.
    pub on_focus: bool,

    /// Reconcile every `interval`, if set.
    pub interval: Option<Duration>,

    /// Retry policy for triggered syncs. They always run immediately.
    pub sync: SyncOptions,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig {
            on_reconnect: true,
            on_focus: true,
            interval: None,
            sync: SyncOptions::default(),
        }
    }
}

impl TriggerConfig {
    pub fn with_on_reconnect(mut self, enabled: bool) -> Self {
        self.on_reconnect = enabled;
        self
    }

    pub fn with_on_focus(mut self, enabled: bool) -> Self {
        self.on_focus = enabled;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_sync_options(mut self, options: SyncOptions) -> Self {
        self.sync = options;
        self
    }

    fn wants(&self, signal: EnvironmentSignal) -> bool {
        match signal {
            EnvironmentSignal::ConnectivityRestored => self.on_reconnect,
            EnvironmentSignal::Visible | EnvironmentSignal::Focused => self.on_focus,
        }
    }
}

/// Reconcile every key concurrently with an immediate sync.
///
/// Failures are logged; one key failing does not stop the others.
pub async fn reconcile_all<R: RemoteSource>(
    engine: &SyncEngine<R>,
    keys: &[CacheKey],
    options: &SyncOptions,
) -> Vec<Result<SyncOutcome>> {
    let options = SyncOptions {
        immediate: true,
        ..options.clone()
    };
    let options = &options;

    let syncs = keys.iter().map(|key| async move {
        match engine.force_sync(key, options).await {
            Ok(status) => status.outcome().await,
            Err(e) => Err(e),
        }
    });
    let results = join_all(syncs).await;

    for (key, result) in keys.iter().zip(&results) {
        if let Err(e) = result {
            warn!("Triggered sync of {} failed: {}", key, e);
        }
    }
    results
}

static NEXT_TRIGGERS_ID: AtomicU64 = AtomicU64::new(1);

/// Scheduler key for a debounced invalidation of `keys` owned by the
/// orchestrator `owner`.
///
/// Keys are sorted and comma-joined, so the same key set maps to the same job
/// in any order. The owner id keeps orchestrators sharing an engine from
/// replacing or cancelling each other's jobs.
pub fn invalidation_job_key(owner: u64, keys: &[CacheKey]) -> String {
    let mut names: Vec<String> = keys.iter().map(CacheKey::storage_key).collect();
    names.sort();
    names.dedup();
    format!("invalidate#{}:{}", owner, names.join(","))
}

/// Binds environment signals and a timer to reconciliation of a key set.
///
/// # Example
///
/// ```
/// use cache_sync::{CacheConfig, CacheStore, SubscriptionRegistry, SyncEngine};
/// use cache_sync::remote::InMemoryRemote;
/// use cache_sync::storage::MemoryStorage;
/// use cache_sync::trigger::{EnvironmentSignal, SyncTriggers, TriggerConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = Arc::new(CacheStore::new(CacheConfig::default(), MemoryStorage::new()));
/// let engine = SyncEngine::new(SubscriptionRegistry::new(store), InMemoryRemote::new());
///
/// let (signals, _) = tokio::sync::broadcast::channel(16);
/// let triggers = SyncTriggers::start(
///     engine,
///     ["course:1", "course:2"],
///     TriggerConfig::default().with_interval(Duration::from_secs(60)),
///     signals.subscribe(),
/// );
///
/// let _ = signals.send(EnvironmentSignal::Focused);
/// triggers.teardown();
/// # }
/// ```
pub struct SyncTriggers<R: RemoteSource> {
    id: u64,
    engine: SyncEngine<R>,
    keys: Arc<Vec<CacheKey>>,
    config: TriggerConfig,
    tasks: Vec<JoinHandle<()>>,
    owned_jobs: Arc<Mutex<HashSet<String>>>,
}

impl<R: RemoteSource> SyncTriggers<R> {
    /// Start listening. Must be called from within a tokio runtime.
    pub fn start<K: Into<CacheKey>>(
        engine: SyncEngine<R>,
        keys: impl IntoIterator<Item = K>,
        config: TriggerConfig,
        signals: broadcast::Receiver<EnvironmentSignal>,
    ) -> Self {
        let keys: Arc<Vec<CacheKey>> = Arc::new(keys.into_iter().map(Into::into).collect());
        let mut tasks = Vec::new();

        if config.on_reconnect || config.on_focus {
            tasks.push(tokio::spawn(listen(
                engine.clone(),
                Arc::clone(&keys),
                config.clone(),
                signals,
            )));
        }

        if let Some(period) = config.interval {
            tasks.push(tokio::spawn(poll(
                engine.clone(),
                Arc::clone(&keys),
                config.sync.clone(),
                period,
            )));
        }

        info!(
            "Sync triggers started for {} keys (reconnect: {}, focus: {}, interval: {:?})",
            keys.len(),
            config.on_reconnect,
            config.on_focus,
            config.interval
        );

        SyncTriggers {
            id: NEXT_TRIGGERS_ID.fetch_add(1, Ordering::Relaxed),
            engine,
            keys,
            config,
            tasks,
            owned_jobs: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Process-unique id, part of every job key this instance schedules.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }

    /// Reconcile every configured key now.
    pub async fn reconcile_now(&self) -> Vec<Result<SyncOutcome>> {
        reconcile_all(&self.engine, &self.keys, &self.config.sync).await
    }

    /// Invalidate `keys` and refetch them after `debounce`.
    ///
    /// Calls for the same key set within the window collapse into one
    /// invalidation and one refetch per key. Returns the job key.
    pub fn invalidate_debounced<K: Into<CacheKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        debounce: Duration,
    ) -> String {
        let mut keys: Vec<CacheKey> = keys.into_iter().map(Into::into).collect();
        keys.sort_by_key(CacheKey::storage_key);
        keys.dedup_by_key(|key| key.storage_key());
        let job_key = invalidation_job_key(self.id, &keys);

        self.jobs().insert(job_key.clone());

        let engine = self.engine.clone();
        let options = self.config.sync.clone();
        let owned_jobs = Arc::clone(&self.owned_jobs);
        let owned_key = job_key.clone();
        self.engine.scheduler().schedule(&job_key, debounce, async move {
            owned_jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&owned_key);
            for key in &keys {
                engine.registry().invalidate_state(key);
            }
            reconcile_all(&engine, &keys, &options).await;
        });

        job_key
    }

    /// Stop all triggers and cancel pending jobs this instance scheduled.
    pub fn teardown(self) {
        drop(self);
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.owned_jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: RemoteSource> Drop for SyncTriggers<R> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let jobs: Vec<String> = self.jobs().drain().collect();
        for job in &jobs {
            self.engine.scheduler().cancel(job);
        }
        debug!("Sync triggers torn down ({} pending jobs cancelled)", jobs.len());
    }
}

async fn listen<R: RemoteSource>(
    engine: SyncEngine<R>,
    keys: Arc<Vec<CacheKey>>,
    config: TriggerConfig,
    mut signals: broadcast::Receiver<EnvironmentSignal>,
) {
    loop {
        match signals.recv().await {
            Ok(signal) if config.wants(signal) => {
                debug!("{:?}: reconciling {} keys", signal, keys.len());
                reconcile_all(&engine, &keys, &config.sync).await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} environment signals, reconciling once", missed);
                reconcile_all(&engine, &keys, &config.sync).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn poll<R: RemoteSource>(
    engine: SyncEngine<R>,
    keys: Arc<Vec<CacheKey>>,
    options: SyncOptions,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        reconcile_all(&engine, &keys, &options).await;
    }
}
