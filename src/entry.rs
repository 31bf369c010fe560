//! Cache entries and per-write options.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default lifetime of an entry when the caller supplies no `max_age`.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// A versioned, time-bounded copy of server-derived data.
///
/// Timestamps are epoch milliseconds. `expires_at > created_at` always holds;
/// an entry is live iff `now < expires_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Value,
    pub created_at: u64,
    pub expires_at: u64,
    pub entry_tag: String,
    #[serde(default)]
    pub version: String,
}

impl CacheEntry {
    pub fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }

    pub fn is_expired(&self, now: u64) -> bool {
        !self.is_live(now)
    }

    /// Lifetime the entry was written with.
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(self.created_at))
    }

    /// Time left before expiry, `None` once dead.
    pub fn ttl_remaining(&self, now: u64) -> Option<Duration> {
        if self.is_live(now) {
            Some(Duration::from_millis(self.expires_at - now))
        } else {
            None
        }
    }

    /// Restart the entry's lifetime at `now`, keeping the payload.
    pub(crate) fn refresh(&mut self, now: u64, max_age: Duration) {
        self.created_at = now;
        self.expires_at = expiry(now, max_age);
    }
}

/// `now + max_age`, with `max_age` clamped to at least 1 ms.
pub(crate) fn expiry(now: u64, max_age: Duration) -> u64 {
    let millis = (max_age.as_millis() as u64).max(1);
    now.saturating_add(millis)
}

/// Caller-supplied policy for a single write.
///
/// # Example
///
/// ```
/// use cache_sync::CacheOptions;
/// use std::time::Duration;
///
/// let options = CacheOptions::default()
///     .with_max_age(Duration::from_secs(30))
///     .with_version("v2");
/// assert_eq!(options.max_age, Some(Duration::from_secs(30)));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheOptions {
    /// Entry lifetime. `None` uses the store's default (5 minutes unless configured).
    pub max_age: Option<Duration>,

    /// Opaque caller version string, stored alongside the entry.
    ///
    /// Never used as a conditional precondition; that is the entry tag's job.
    pub version: Option<String>,

    /// Explicit entry tag, taking precedence over the computed content tag.
    ///
    /// Set by reconciliation when the remote response carries its own tag.
    pub entry_tag: Option<String>,
}

impl CacheOptions {
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_entry_tag(mut self, tag: impl Into<String>) -> Self {
        self.entry_tag = Some(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(created_at: u64, expires_at: u64) -> CacheEntry {
        CacheEntry {
            data: json!(1),
            created_at,
            expires_at,
            entry_tag: "0000001".to_string(),
            version: String::new(),
        }
    }

    #[test]
    fn test_liveness_boundary() {
        let e = entry(1_000, 2_000);
        assert!(e.is_live(1_999));
        assert!(e.is_expired(2_000));
        assert_eq!(e.ttl_remaining(1_500), Some(Duration::from_millis(500)));
        assert_eq!(e.ttl_remaining(2_500), None);
    }

    #[test]
    fn test_zero_max_age_is_clamped() {
        assert_eq!(expiry(1_000, Duration::ZERO), 1_001);
    }

    #[test]
    fn test_refresh_keeps_payload() {
        let mut e = entry(1_000, 2_000);
        e.refresh(1_800, e.max_age());
        assert_eq!(e.created_at, 1_800);
        assert_eq!(e.expires_at, 2_800);
        assert_eq!(e.data, json!(1));
    }

    #[test]
    fn test_persisted_field_names() {
        let encoded = serde_json::to_value(entry(1, 2)).expect("serialize");
        assert!(encoded.get("createdAt").is_some());
        assert!(encoded.get("expiresAt").is_some());
        assert!(encoded.get("entryTag").is_some());
    }
}
