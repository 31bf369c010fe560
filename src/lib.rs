//! # cache-sync
//!
//! A client-side cache and state-synchronization engine.
//!
//! ## Features
//!
//! - **Time-bounded cache:** entries expire, are lazily deleted on access and
//!   evicted oldest-first when over capacity
//! - **Durable mirror:** live entries are snapshotted to a pluggable
//!   [`storage::DurableStorage`] and reloaded on start; stale data never
//!   resurrects
//! - **Subscriptions:** per-key listeners receive `(new, previous)` on update
//!   and `(None, None)` on invalidation
//! - **Reconciliation:** conditional fetches against a [`remote::RemoteSource`]
//!   with linear retry backoff and per-key debounce
//! - **Push channel:** server-pushed invalidate/update events with exponential
//!   reconnect backoff
//! - **Triggers:** reconcile a key set on connectivity, focus or a timer
//!
//! ## Quick Start
//!
//! ```
//! use cache_sync::{CacheConfig, CacheOptions, CacheService, SyncOptions};
//! use cache_sync::remote::InMemoryRemote;
//! use cache_sync::storage::MemoryStorage;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cache_sync::Result<()> {
//! let remote = InMemoryRemote::new();
//! remote.insert("course:42", json!({"title": "Compilers"}));
//!
//! // 1. Construct once, share clones
//! let cache = CacheService::new(CacheConfig::default(), MemoryStorage::new(), remote);
//!
//! // 2. Local writes and reads
//! cache.write("draft", &"unsaved", &CacheOptions::default().with_max_age(Duration::from_secs(30)));
//! assert_eq!(cache.read::<String>("draft").as_deref(), Some("unsaved"));
//!
//! // 3. Listen for changes
//! let subscription = cache.subscribe("course:42", |new, old| {
//!     println!("{:?} -> {:?}", old, new);
//! });
//!
//! // 4. Reconcile with the server
//! cache.force_sync("course:42", &SyncOptions::default()).await?;
//!
//! subscription.unsubscribe();
//! # Ok(())
//! # }
//! ```
//!
//! ## Cargo features
//!
//! - `http`: [`remote::HttpRemote`], a reqwest-based remote source
//! - `websocket`: [`channel::WebSocketTransport`], a tokio-tungstenite push transport

#[macro_use]
extern crate log;

pub mod channel;
pub mod clock;
pub mod entry;
pub mod error;
pub mod key;
pub mod observability;
pub mod remote;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod tag;
pub mod trigger;

// Re-exports for convenience
pub use channel::{ChannelConfig, ChannelHandle, PushChannel, PushMessage, PushTransport};
pub use clock::{Clock, MockClock, SystemClock};
pub use entry::{CacheEntry, CacheOptions};
pub use error::{Error, Result};
pub use key::CacheKey;
pub use observability::{CacheMetrics, CacheStats, QueryStats};
pub use remote::{RemoteResponse, RemoteSource};
pub use service::CacheService;
pub use store::{CacheConfig, CacheStore};
pub use subscription::{Subscription, SubscriptionRegistry};
pub use sync::{PendingSync, SyncEngine, SyncOptions, SyncOutcome, SyncStatus};
pub use trigger::{EnvironmentSignal, SyncTriggers, TriggerConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
