//! Push-channel wire messages.
//!
//! Frames are JSON objects discriminated by `type`:
//!
//! ```text
//! {"type": "invalidate", "key": "course:42"}
//! {"type": "update", "key": "course:42", "data": {...}, "version": "7"}
//! {"type": "batch-invalidate", "keys": ["course:1", "course:2"]}
//! ```
//!
//! Unknown `type` values decode to [`PushMessage::Unknown`] and are ignored.

use crate::entry::CacheOptions;
use crate::error::{Error, Result};
use crate::subscription::SubscriptionRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded server-pushed event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PushMessage {
    Invalidate {
        key: String,
    },
    Update {
        key: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    BatchInvalidate {
        keys: Vec<String>,
    },
    /// Any `type` this client does not know.
    #[serde(other)]
    Unknown,
}

impl PushMessage {
    /// Decode one text frame.
    ///
    /// # Errors
    /// Returns `Error::DeserializationError` for frames that are not JSON or
    /// lack the fields their `type` requires
    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PushMessage::Invalidate { .. } => "invalidate",
            PushMessage::Update { .. } => "update",
            PushMessage::BatchInvalidate { .. } => "batch-invalidate",
            PushMessage::Unknown => "unknown",
        }
    }

    /// Forward the event to the registry's invalidate/update paths.
    pub fn apply(self, registry: &SubscriptionRegistry) {
        match self {
            PushMessage::Invalidate { key } => registry.invalidate_state(key),
            PushMessage::Update { key, data, version } => {
                let options = CacheOptions {
                    version,
                    ..CacheOptions::default()
                };
                registry.update_state(key, data, &options);
            }
            PushMessage::BatchInvalidate { keys } => {
                for key in keys {
                    registry.invalidate_state(key);
                }
            }
            PushMessage::Unknown => {}
        }
    }
}
