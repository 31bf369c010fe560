//! The cache store: time-bounded entries mirrored to durable storage.
//!
//! ```text
//! write ──► in-memory map ──► evict if over capacity ──► persist live entries
//! read  ──► live?  yes ──► payload
//!                  no  ──► remove (lazy deletion) ──► persist ──► None
//! ```
//!
//! The map is guarded by a mutex so the read-modify-write sequences of `write`,
//! eviction and pattern invalidation stay atomic on a multi-threaded runtime.
//! Storage and serialization failures are logged and absorbed: the store
//! degrades to memory-only for that cycle and never fails its caller.

use crate::clock::{Clock, SystemClock};
use crate::entry::{expiry, CacheEntry, CacheOptions, DEFAULT_MAX_AGE};
use crate::error::Result;
use crate::key::CacheKey;
use crate::observability::{CacheMetrics, CacheStats, NoOpMetrics};
use crate::storage::DurableStorage;
use crate::tag::entry_tag;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Store configuration.
///
/// # Example
///
/// ```
/// use cache_sync::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::default()
///     .with_max_entries(500)
///     .with_default_max_age(Duration::from_secs(60));
/// assert_eq!(config.max_entries, 500);
/// ```
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Capacity. Exceeding it on write triggers eviction.
    pub max_entries: usize,

    /// Lifetime used when a write supplies no `max_age`.
    pub default_max_age: Duration,

    /// Extra entries freed below `max_entries` by capacity eviction, so
    /// eviction does not run again on the very next insert.
    pub eviction_buffer: usize,

    /// Name of the blob the live-entry map is persisted under.
    pub storage_key: String,

    /// Period of the background cleanup pass started by `spawn_maintenance`.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_entries: 1000,
            default_max_age: DEFAULT_MAX_AGE,
            eviction_buffer: 100,
            storage_key: "cache_sync:entries".to_string(),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age = max_age;
        self
    }

    pub fn with_eviction_buffer(mut self, buffer: usize) -> Self {
        self.eviction_buffer = buffer;
        self
    }

    pub fn with_storage_key(mut self, name: impl Into<String>) -> Self {
        self.storage_key = name.into();
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

/// In-memory cache of versioned entries, backed by durable storage.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
///
/// # Example
///
/// ```
/// use cache_sync::{CacheConfig, CacheOptions, CacheStore};
/// use cache_sync::storage::MemoryStorage;
///
/// let store = CacheStore::new(CacheConfig::default(), MemoryStorage::new());
/// store.write("course:42", &"Compilers", &CacheOptions::default());
///
/// let title: Option<String> = store.read("course:42");
/// assert_eq!(title.as_deref(), Some("Compilers"));
/// ```
pub struct CacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    storage: Box<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
    metrics: Box<dyn CacheMetrics>,
    config: CacheConfig,
}

impl CacheStore {
    /// Create a store on the system clock, reloading live entries from `storage`.
    pub fn new(config: CacheConfig, storage: impl DurableStorage + 'static) -> Self {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    /// Create a store with an explicit clock.
    ///
    /// Entries found in durable storage are kept only if still live at load
    /// time; stale snapshots never resurrect.
    pub fn with_clock(
        config: CacheConfig,
        storage: impl DurableStorage + 'static,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let entries = load_snapshot(&storage, &config.storage_key, clock.now_millis());
        CacheStore {
            entries: Mutex::new(entries),
            storage: Box::new(storage),
            clock,
            metrics: Box::new(NoOpMetrics),
            config,
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current time according to the store's clock, in epoch milliseconds.
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize `data` and store it under `key`.
    ///
    /// A value that cannot be represented as JSON is logged and not stored.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey>,
        data: &T,
        options: &CacheOptions,
    ) {
        let key = key.into().storage_key();
        match serde_json::to_value(data) {
            Ok(value) => {
                self.insert(key, value, options);
            }
            Err(e) => {
                warn!("Not caching {}: value is not serializable: {}", key, e);
                self.metrics.record_error(&key, &e.to_string());
            }
        }
    }

    /// Store a JSON payload under `key`, returning the previous live payload.
    pub fn write_value(
        &self,
        key: impl Into<CacheKey>,
        data: Value,
        options: &CacheOptions,
    ) -> Option<Value> {
        self.insert(key.into().storage_key(), data, options)
    }

    fn insert(&self, key: String, data: Value, options: &CacheOptions) -> Option<Value> {
        let now = self.now();
        let max_age = options.max_age.unwrap_or(self.config.default_max_age);
        let tag = options
            .entry_tag
            .clone()
            .unwrap_or_else(|| entry_tag(&data));
        let entry = CacheEntry {
            data,
            created_at: now,
            expires_at: expiry(now, max_age),
            entry_tag: tag,
            version: options.version.clone().unwrap_or_default(),
        };

        let mut entries = self.lock();
        let previous = entries
            .insert(key.clone(), entry)
            .filter(|old| old.is_live(now))
            .map(|old| old.data);

        if entries.len() > self.config.max_entries {
            let evicted = self.evict(&mut entries, now, &key);
            if evicted > 0 {
                self.metrics.record_eviction(evicted);
            }
        }

        self.persist(&entries, now);
        drop(entries);

        self.metrics.record_write(&key);
        debug!("✓ Cache WRITE {} (max_age: {:?})", key, max_age);
        previous
    }

    /// Capacity eviction. Expired entries go first; if still over capacity the
    /// oldest by `created_at` go until `eviction_buffer` slots are free.
    /// `keep` (the entry just written) is never chosen.
    fn evict(&self, entries: &mut HashMap<String, CacheEntry>, now: u64, keep: &str) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));

        let max = self.config.max_entries;
        if entries.len() > max {
            let target = max - self.config.eviction_buffer.min(max);
            let excess = entries.len() - target;

            let mut by_age: Vec<(u64, String)> = entries
                .iter()
                .filter(|(k, _)| k.as_str() != keep)
                .map(|(k, e)| (e.created_at, k.clone()))
                .collect();
            by_age.sort_unstable();

            for (_, key) in by_age.into_iter().take(excess) {
                entries.remove(&key);
            }
        }

        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("Cache eviction removed {} entries ({} remain)", evicted, entries.len());
        }
        evicted
    }

    /// Read and deserialize a live payload.
    ///
    /// Returns `None` when absent, expired (the entry is deleted as a side
    /// effect), or not decodable as `T`.
    pub fn read<T: DeserializeOwned>(&self, key: impl Into<CacheKey>) -> Option<T> {
        let key = key.into();
        let value = self.read_value(&key)?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                let key = key.storage_key();
                warn!("Cached value for {} does not decode: {}", key, e);
                self.metrics.record_error(&key, &e.to_string());
                None
            }
        }
    }

    /// Read a live payload as raw JSON.
    pub fn read_value(&self, key: impl Into<CacheKey>) -> Option<Value> {
        self.entry(key).map(|entry| entry.data)
    }

    /// Snapshot of the live entry under `key`, with lazy deletion of a dead one.
    pub fn entry(&self, key: impl Into<CacheKey>) -> Option<CacheEntry> {
        let key = key.into().storage_key();
        let now = self.now();
        let mut entries = self.lock();

        match entries.get(&key).map(|entry| entry.is_live(now)) {
            Some(true) => {
                self.metrics.record_hit(&key);
                entries.get(&key).cloned()
            }
            Some(false) => {
                entries.remove(&key);
                self.persist(&entries, now);
                debug!("Cache entry {} expired, removed", key);
                self.metrics.record_miss(&key);
                None
            }
            None => {
                self.metrics.record_miss(&key);
                None
            }
        }
    }

    /// Whether a live entry exists. Deletes a dead one like `read` does.
    pub fn has(&self, key: impl Into<CacheKey>) -> bool {
        self.entry(key).is_some()
    }

    /// Entry tag of the live entry under `key`.
    pub fn entry_tag(&self, key: impl Into<CacheKey>) -> Option<String> {
        self.entry(key).map(|entry| entry.entry_tag)
    }

    /// Restart a live entry's lifetime, keeping its payload and tag.
    ///
    /// `max_age` defaults to the lifetime the entry was written with.
    /// Returns `false` if no live entry exists.
    pub fn touch(&self, key: impl Into<CacheKey>, max_age: Option<Duration>) -> bool {
        let key = key.into().storage_key();
        let now = self.now();
        let mut entries = self.lock();

        match entries.get(&key).map(|entry| entry.is_live(now)) {
            Some(true) => {
                if let Some(entry) = entries.get_mut(&key) {
                    let lifetime = max_age.unwrap_or_else(|| entry.max_age());
                    entry.refresh(now, lifetime);
                    debug!("✓ Cache TOUCH {} (expires_at: {})", key, entry.expires_at);
                }
                self.persist(&entries, now);
                true
            }
            Some(false) => {
                entries.remove(&key);
                self.persist(&entries, now);
                false
            }
            None => false,
        }
    }

    /// Remove the exact composed key. Returns whether anything was removed.
    pub fn invalidate(&self, key: impl Into<CacheKey>) -> bool {
        let key = key.into().storage_key();
        let now = self.now();
        let mut entries = self.lock();
        let removed = entries.remove(&key).is_some();
        if removed {
            self.persist(&entries, now);
            debug!("✓ Cache INVALIDATE {}", key);
        }
        removed
    }

    /// Remove every stored key the regex matches. Returns the number removed.
    pub fn invalidate_by_pattern(&self, pattern: &Regex) -> usize {
        let now = self.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !pattern.is_match(key));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries, now);
        }
        debug!("✓ Cache INVALIDATE /{}/ -> {} entries", pattern.as_str(), removed);
        removed
    }

    /// Compile `pattern` and invalidate every matching key.
    ///
    /// # Errors
    /// Returns `Error::InvalidPattern` if `pattern` is not a valid regex
    pub fn invalidate_matching(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;
        Ok(self.invalidate_by_pattern(&regex))
    }

    /// Remove all entries, in memory and the durable copy.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        if let Err(e) = self.storage.remove_item(&self.config.storage_key) {
            warn!("Failed to remove cache snapshot: {}", e);
            self.metrics.record_error(&self.config.storage_key, &e.to_string());
        }
        warn!("⚠ Cache CLEAR executed - all entries removed");
    }

    /// Cleanup pass: drop expired entries and persist. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let now = self.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries, now);
            debug!("Cache cleanup removed {} expired entries", removed);
        }
        removed
    }

    /// Run `cleanup` every `config.cleanup_interval` on a background task.
    ///
    /// The task holds only a weak reference and ends once the store is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let store: Weak<CacheStore> = Arc::downgrade(self);
        let period = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.cleanup();
                    }
                    None => break,
                }
            }
        })
    }

    /// Storage keys of all live entries.
    pub fn keys(&self) -> Vec<String> {
        let now = self.now();
        self.lock()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of stored entries, live or not yet cleaned up.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.now();
        let entries = self.lock();
        let valid = entries.values().filter(|e| e.is_live(now)).count();
        CacheStats {
            total: entries.len(),
            valid,
            expired: entries.len() - valid,
            max_entries: self.config.max_entries,
        }
    }

    /// Print cache statistics to debug log.
    pub fn log_stats(&self) {
        let stats = self.stats();
        debug!(
            "Cache Stats: {} entries ({} valid, {} expired), capacity {}",
            stats.total, stats.valid, stats.expired, stats.max_entries
        );
    }

    /// Mirror all live entries to durable storage. Failures are absorbed.
    fn persist(&self, entries: &HashMap<String, CacheEntry>, now: u64) {
        let live: HashMap<&String, &CacheEntry> = entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .collect();

        let result = serde_json::to_string(&live)
            .map_err(crate::error::Error::from)
            .and_then(|blob| self.storage.set_item(&self.config.storage_key, &blob));

        if let Err(e) = result {
            warn!("Cache snapshot not persisted, continuing memory-only: {}", e);
            self.metrics.record_error(&self.config.storage_key, &e.to_string());
        }
    }
}

fn load_snapshot(
    storage: &dyn DurableStorage,
    name: &str,
    now: u64,
) -> HashMap<String, CacheEntry> {
    let blob = match storage.get_item(name) {
        Ok(Some(blob)) => blob,
        Ok(None) => return HashMap::new(),
        Err(e) => {
            warn!("Cache snapshot unreadable, starting empty: {}", e);
            return HashMap::new();
        }
    };

    match serde_json::from_str::<HashMap<String, CacheEntry>>(&blob) {
        Ok(mut entries) => {
            let stored = entries.len();
            entries.retain(|_, entry| entry.is_live(now) && entry.expires_at > entry.created_at);
            info!(
                "Cache snapshot loaded: {} live entries ({} stale dropped)",
                entries.len(),
                stored - entries.len()
            );
            entries
        }
        Err(e) => {
            warn!("Cache snapshot corrupt, starting empty: {}", e);
            HashMap::new()
        }
    }
}
