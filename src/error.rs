//! Error types for the cache and synchronization engine.

use std::fmt;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the engine.
///
/// Most of these never reach a caller. The cache is an optimization, not a
/// source of truth, so storage and serialization failures are logged and
/// absorbed where they happen. Only reconciliation failures (after retries)
/// and explicit configuration mistakes are surfaced.
#[derive(Debug, Clone)]
pub enum Error {
    /// The durable storage backing failed (quota exceeded, I/O failure).
    ///
    /// **Recovery:** the store keeps running memory-only for that cycle.
    StorageError(String),

    /// A value could not be serialized to JSON.
    ///
    /// Common causes:
    /// - Maps with non-string keys
    /// - Custom `Serialize` implementations that return an error
    SerializationError(String),

    /// Stored or received JSON could not be decoded.
    ///
    /// Common causes:
    /// - Corrupt snapshot in durable storage
    /// - Malformed push-channel frame
    /// - Reading a key with a type that does not match what was written
    DeserializationError(String),

    /// The remote source failed (transport, authorization, server error).
    ///
    /// Retried by the reconciliation engine; surfaced once attempts are exhausted.
    RemoteError(String),

    /// The push channel failed to connect or dropped.
    ChannelError(String),

    /// An invalidation pattern was not a valid regular expression.
    InvalidPattern(String),

    /// Invalid configuration supplied by the caller.
    ConfigError(String),

    /// A debounced sync was replaced or cancelled before it ran.
    Superseded(String),

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::RemoteError(msg) => write!(f, "Remote error: {}", msg),
            Error::ChannelError(msg) => write!(f, "Channel error: {}", msg),
            Error::InvalidPattern(msg) => write!(f, "Invalid pattern: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Superseded(key) => write!(f, "Pending sync for {} was superseded", key),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::StorageError(e.to_string())
        } else if e.is_syntax() || e.is_eof() || e.is_data() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::InvalidPattern(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::RemoteError(format!("HTTP error: {}", e))
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::ChannelError(format!("WebSocket error: {}", e))
    }
}
