//! High-level cache service for applications.
//!
//! Bundles the store, subscription registry and reconciliation engine behind
//! the handful of calls UI-facing code needs.

use crate::channel::{ChannelConfig, ChannelHandle, PushChannel, PushTransport};
use crate::clock::Clock;
use crate::entry::CacheOptions;
use crate::error::Result;
use crate::key::CacheKey;
use crate::observability::{CacheStats, QueryStats};
use crate::remote::RemoteSource;
use crate::storage::DurableStorage;
use crate::store::{CacheConfig, CacheStore};
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::sync::{SyncEngine, SyncOptions, SyncStatus};
use crate::trigger::{EnvironmentSignal, SyncTriggers, TriggerConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// High-level cache service.
///
/// Construct one at process start and pass clones to consumers; clones share
/// the same store, listeners and pending timers.
///
/// # Example
///
/// ```
/// use cache_sync::{CacheConfig, CacheOptions, CacheService, SyncOptions};
/// use cache_sync::remote::InMemoryRemote;
/// use cache_sync::storage::MemoryStorage;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cache_sync::Result<()> {
/// let remote = InMemoryRemote::new();
/// remote.insert("course:42", json!({"title": "Compilers"}));
///
/// let cache = CacheService::new(CacheConfig::default(), MemoryStorage::new(), remote);
/// let subscription = cache.subscribe("course:42", |new, _old| {
///     println!("course:42 is now {:?}", new);
/// });
///
/// cache.force_sync("course:42", &SyncOptions::default()).await?;
/// let course: Option<serde_json::Value> = cache.read("course:42");
/// assert_eq!(course, Some(json!({"title": "Compilers"})));
///
/// subscription.unsubscribe();
/// # Ok(())
/// # }
/// ```
pub struct CacheService<R: RemoteSource> {
    engine: SyncEngine<R>,
}

impl<R: RemoteSource> Clone for CacheService<R> {
    fn clone(&self) -> Self {
        CacheService {
            engine: self.engine.clone(),
        }
    }
}

impl<R: RemoteSource> CacheService<R> {
    /// Create a service on the system clock.
    pub fn new(config: CacheConfig, storage: impl DurableStorage + 'static, remote: R) -> Self {
        Self::from_store(Arc::new(CacheStore::new(config, storage)), remote)
    }

    /// Create a service with an explicit clock.
    pub fn with_clock(
        config: CacheConfig,
        storage: impl DurableStorage + 'static,
        clock: Arc<dyn Clock>,
        remote: R,
    ) -> Self {
        Self::from_store(
            Arc::new(CacheStore::with_clock(config, storage, clock)),
            remote,
        )
    }

    /// Wrap an existing store, e.g. one configured with custom metrics.
    pub fn from_store(store: Arc<CacheStore>, remote: R) -> Self {
        CacheService {
            engine: SyncEngine::new(SubscriptionRegistry::new(store), remote),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        self.engine.store()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        self.engine.registry()
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// Read a live cached value.
    pub fn read<T: DeserializeOwned>(&self, key: impl Into<CacheKey>) -> Option<T> {
        self.store().read(key)
    }

    /// Cache a value locally. Listeners are not notified; use
    /// [`CacheService::update`] for that.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey>,
        data: &T,
        options: &CacheOptions,
    ) {
        self.store().write(key, data, options)
    }

    /// Cache a value and notify the key's listeners.
    pub fn update(&self, key: impl Into<CacheKey>, data: Value, options: &CacheOptions) {
        self.registry().update_state(key, data, options)
    }

    /// Drop the cached value and signal the key's listeners to refetch.
    pub fn invalidate(&self, key: impl Into<CacheKey>) {
        self.registry().invalidate_state(key)
    }

    /// Drop every stored key matching `pattern`. Listeners are not notified.
    ///
    /// # Errors
    /// Returns `Error::InvalidPattern` if `pattern` is not a valid regex
    pub fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize> {
        self.store().invalidate_matching(pattern)
    }

    pub fn subscribe<F>(&self, key: impl Into<CacheKey>, listener: F) -> Subscription
    where
        F: Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    {
        self.registry().subscribe(key, listener)
    }

    /// Reconcile `key` with the remote; see [`SyncEngine::force_sync`].
    pub async fn force_sync(
        &self,
        key: impl Into<CacheKey>,
        options: &SyncOptions,
    ) -> Result<SyncStatus> {
        self.engine.force_sync(key, options).await
    }

    pub fn stats(&self) -> CacheStats {
        self.store().stats()
    }

    pub fn query_stats(&self) -> QueryStats {
        self.engine.stats()
    }

    /// Start environment-driven reconciliation of `keys`.
    pub fn triggers<K: Into<CacheKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        config: TriggerConfig,
        signals: broadcast::Receiver<EnvironmentSignal>,
    ) -> SyncTriggers<R> {
        SyncTriggers::start(self.engine.clone(), keys, config, signals)
    }

    /// Start a push channel feeding this service's listeners.
    pub fn connect_channel<T: PushTransport>(
        &self,
        transport: T,
        config: ChannelConfig,
    ) -> ChannelHandle {
        PushChannel::spawn(transport, self.registry().clone(), config)
    }

    /// Start the store's periodic cleanup pass.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        self.store().spawn_maintenance()
    }
}
