//! In-memory remote source for testing.

use super::{RemoteResponse, RemoteSource};
use crate::error::{Error, Result};
use crate::tag::entry_tag;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Authoritative values held in memory, answering conditional fetches.
///
/// Tags are the content tags of the stored values, so a cache populated from
/// this remote gets `NotModified` until the value changes.
///
/// # Testing Different Scenarios
///
/// - **Not modified**: fetch twice without changing the value
/// - **Update**: `insert` a new value between fetches
/// - **Transient failure**: `fail_next(n)` fails the next `n` fetches
/// - **In-flight**: `with_latency` delays every answer
///
/// # Example
///
/// ```
/// use cache_sync::remote::{InMemoryRemote, RemoteResponse, RemoteSource};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cache_sync::Result<()> {
/// let remote = InMemoryRemote::new();
/// remote.insert("course:42", json!({"title": "Compilers"}));
///
/// let tag = match remote.fetch("course:42", None).await? {
///     RemoteResponse::Modified { entry_tag, .. } => entry_tag,
///     RemoteResponse::NotModified => None,
/// };
/// let again = remote.fetch("course:42", tag.as_deref()).await?;
/// assert_eq!(again, RemoteResponse::NotModified);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    data: Arc<DashMap<String, Value>>,
    failures: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
        self
    }

    /// Insert or replace the authoritative value for `key`.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) {
        self.data.remove(key);
    }

    /// Fail the next `count` fetches with `Error::RemoteError`.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of fetches answered or failed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RemoteSource for InMemoryRemote {
    async fn fetch(&self, key: &str, tag: Option<&str>) -> Result<RemoteResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.take_failure() {
            return Err(Error::RemoteError(format!("injected failure for {}", key)));
        }

        let value = self
            .data
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::RemoteError(format!("{} not found", key)))?;

        let current = entry_tag(&value);
        if tag == Some(current.as_str()) {
            return Ok(RemoteResponse::NotModified);
        }

        Ok(RemoteResponse::Modified {
            data: value,
            entry_tag: Some(current),
        })
    }
}
