//! Durable key-value storage backing the cache store.

use crate::error::Result;
use std::sync::Arc;

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Trait for durable string-blob storage.
///
/// The cache store persists its whole live-entry map as one JSON blob under a
/// fixed name, and reloads it on startup. Implementations must survive process
/// restart to be useful; [`MemoryStorage`] does not and exists for tests and
/// memory-only deployments.
///
/// Errors returned here never reach cache callers. The store logs them and
/// keeps running memory-only for that cycle.
pub trait DurableStorage: Send + Sync {
    /// Read a blob.
    ///
    /// # Returns
    /// - `Ok(Some(blob))` - Blob present
    /// - `Ok(None)` - Nothing stored under `name`
    ///
    /// # Errors
    /// Returns `Err` if the storage cannot be read
    fn get_item(&self, name: &str) -> Result<Option<String>>;

    /// Store a blob, replacing any previous one.
    ///
    /// # Errors
    /// Returns `Err` on write failure (quota exceeded, I/O error)
    fn set_item(&self, name: &str, value: &str) -> Result<()>;

    /// Remove a blob. Removing a missing blob is not an error.
    ///
    /// # Errors
    /// Returns `Err` if the storage cannot be modified
    fn remove_item(&self, name: &str) -> Result<()>;
}

impl<S: DurableStorage + ?Sized> DurableStorage for Arc<S> {
    fn get_item(&self, name: &str) -> Result<Option<String>> {
        (**self).get_item(name)
    }

    fn set_item(&self, name: &str, value: &str) -> Result<()> {
        (**self).set_item(name, value)
    }

    fn remove_item(&self, name: &str) -> Result<()> {
        (**self).remove_item(name)
    }
}
