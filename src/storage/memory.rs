//! In-memory durable storage (for tests and memory-only deployments).
//!
//! Uses DashMap for lock-free concurrent access. Clones share the same map, so
//! a test can hand one clone to a store, drop the store, and build a second
//! store from another clone to simulate a process restart.

use super::DurableStorage;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe in-memory blob storage.
///
/// # Example
///
/// ```
/// use cache_sync::storage::{DurableStorage, MemoryStorage};
///
/// let storage = MemoryStorage::new();
/// storage.set_item("snapshot", "{}").unwrap();
/// assert_eq!(storage.get_item("snapshot").unwrap().as_deref(), Some("{}"));
/// ```
#[derive(Clone, Default)]
pub struct MemoryStorage {
    items: Arc<DashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            items: Arc::new(DashMap::new()),
        }
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total stored bytes.
    pub fn total_bytes(&self) -> usize {
        self.items.iter().map(|item| item.value().len()).sum()
    }
}

impl DurableStorage for MemoryStorage {
    fn get_item(&self, name: &str) -> Result<Option<String>> {
        Ok(self.items.get(name).map(|item| item.value().clone()))
    }

    fn set_item(&self, name: &str, value: &str) -> Result<()> {
        self.items.insert(name.to_string(), value.to_string());
        debug!("✓ MemoryStorage SET {} ({} bytes)", name, value.len());
        Ok(())
    }

    fn remove_item(&self, name: &str) -> Result<()> {
        self.items.remove(name);
        debug!("✓ MemoryStorage REMOVE {}", name);
        Ok(())
    }
}
