//! Remote source of truth for reconciliation.
//!
//! The `RemoteSource` trait decouples the engine from the transport used to
//! reach the server. Implement it for your API client, or use
//! [`InMemoryRemote`] in tests.
//!
//! # Contract
//!
//! A fetch takes the logical key and the entry tag of the cached copy, if any.
//! It answers either "not modified" (the cached copy is current, like HTTP 304)
//! or a fresh payload with an optional server-side tag. Transport and
//! authorization failures are returned as `Err` and retried by the engine.

use crate::error::Result;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

#[cfg(feature = "http")]
pub mod http;
pub mod inmemory;

#[cfg(feature = "http")]
pub use http::HttpRemote;
pub use inmemory::InMemoryRemote;

/// Answer to a conditional fetch.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteResponse {
    /// The tag sent still matches; keep the cached payload.
    NotModified,

    /// Fresh payload. `entry_tag`, when present, is stored in place of the
    /// locally computed content tag.
    Modified {
        data: Value,
        entry_tag: Option<String>,
    },
}

/// Trait for remote sources.
///
/// Futures must be `Send` because debounced syncs run on spawned tasks.
pub trait RemoteSource: Send + Sync + 'static {
    /// Fetch `key`, conditionally on `entry_tag`.
    ///
    /// # Returns
    /// - `Ok(RemoteResponse::NotModified)` - cached copy is current
    /// - `Ok(RemoteResponse::Modified { .. })` - fresh data
    ///
    /// # Errors
    /// Returns `Err` on transport, authorization or server failure
    fn fetch(
        &self,
        key: &str,
        entry_tag: Option<&str>,
    ) -> impl Future<Output = Result<RemoteResponse>> + Send;
}

impl<R: RemoteSource> RemoteSource for Arc<R> {
    fn fetch(
        &self,
        key: &str,
        entry_tag: Option<&str>,
    ) -> impl Future<Output = Result<RemoteResponse>> + Send {
        (**self).fetch(key, entry_tag)
    }
}
