//! Property-based tests for entry tags and cache keys.
//!
//! # Properties Tested
//!
//! 1. **Determinism**: tag(x) == tag(x) across separate calls
//! 2. **Shape**: content tags are always 7 base-36 characters
//! 3. **Canonical keys**: parameter order never changes the storage key
//! 4. **Expiry**: a write is readable before `max_age` and gone after

use cache_sync::storage::MemoryStorage;
use cache_sync::tag::{entry_tag, TAG_LEN};
use cache_sync::{CacheConfig, CacheKey, CacheOptions, CacheStore, MockClock};
use proptest::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Serialize)]
struct Course {
    id: u64,
    title: String,
    credits: u8,
    tags: Vec<String>,
}

prop_compose! {
    fn arb_course()(
        id in any::<u64>(),
        title in ".{0,40}",
        credits in 0u8..12,
        tags in prop::collection::vec("[a-z]{1,8}", 0..5),
    ) -> Course {
        Course { id, title, credits, tags }
    }
}

proptest! {
    #[test]
    fn prop_tag_is_deterministic(course in arb_course()) {
        let first = entry_tag(&course);
        let second = entry_tag(&course.clone());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_tag_shape(course in arb_course()) {
        let tag = entry_tag(&course);
        prop_assert_eq!(tag.len(), TAG_LEN);
        prop_assert!(tag.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn prop_param_order_is_irrelevant(
        pairs in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..8)
    ) {
        let forward: Map<String, Value> =
            pairs.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect();
        let reverse: Map<String, Value> =
            pairs.iter().rev().map(|(k, v)| (k.clone(), Value::from(*v))).collect();

        let a = CacheKey::new("search").with_params(Value::Object(forward));
        let b = CacheKey::new("search").with_params(Value::Object(reverse));
        prop_assert_eq!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn prop_expiry(max_age_ms in 1u64..100_000, value in any::<i64>()) {
        let clock = MockClock::default();
        let store = CacheStore::with_clock(
            CacheConfig::default(),
            MemoryStorage::new(),
            Arc::new(clock.clone()),
        );
        let max_age = Duration::from_millis(max_age_ms);

        store.write("k", &value, &CacheOptions::default().with_max_age(max_age));
        prop_assert_eq!(store.read::<i64>("k"), Some(value));

        clock.advance(max_age);
        prop_assert_eq!(store.read::<i64>("k"), None);
        prop_assert!(!store.has("k"));
    }
}
