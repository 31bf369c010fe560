//! Cache key composition.
//!
//! A logical key may carry a parameter object (filters, paging, ...). The
//! storage key is the logical key plus a canonical rendering of the
//! parameters, with object properties sorted at every depth, so that
//! semantically identical parameter sets always land on the same entry.

use serde_json::Value;
use std::fmt;

/// A logical cache key with optional parameters.
///
/// `&str` and `String` convert into a parameterless key, so most call sites
/// pass plain strings.
///
/// ```
/// use cache_sync::CacheKey;
/// use serde_json::json;
///
/// let a = CacheKey::new("courses").with_params(json!({"page": 2, "dept": "cs"}));
/// let b = CacheKey::new("courses").with_params(json!({"dept": "cs", "page": 2}));
/// assert_eq!(a.storage_key(), b.storage_key());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CacheKey {
    key: String,
    params: Option<Value>,
}

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        CacheKey {
            key: key.into(),
            params: None,
        }
    }

    /// Attach a parameter object. `null` is treated as no parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = if params.is_null() { None } else { Some(params) };
        self
    }

    /// The logical key without parameters.
    pub fn base(&self) -> &str {
        &self.key
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Compose the storage key: `key` or `key:{canonical params}`.
    pub fn storage_key(&self) -> String {
        match &self.params {
            None => self.key.clone(),
            Some(params) => {
                let mut out = String::with_capacity(self.key.len() + 32);
                out.push_str(&self.key);
                out.push(':');
                write_canonical(params, &mut out);
                out
            }
        }
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        CacheKey::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey::new(key)
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        CacheKey::new(key.as_str())
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Canonical JSON: compact, object keys sorted recursively.
///
/// Written out by hand rather than relying on `serde_json::Map` ordering,
/// which depends on whether `preserve_order` is enabled anywhere in the
/// dependency graph.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(k) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
