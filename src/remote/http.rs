//! HTTP remote source using reqwest.
//!
//! Issues `GET {base_url}/{key}` with `If-None-Match` set to the cached entry
//! tag. A `304 Not Modified` answer maps to `RemoteResponse::NotModified`; a
//! 2xx answer's JSON body becomes the fresh payload and its `ETag` header the
//! stored entry tag.

use super::{RemoteResponse, RemoteSource};
use crate::error::{Error, Result};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Request timeout used by [`HttpRemote::new`].
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Remote source backed by a JSON-over-HTTP API.
///
/// Clone is cheap; `reqwest::Client` shares its connection pool.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    /// Create a client for `base_url` with a default timeout.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use an existing client, sharing its pool and settings.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        HttpRemote { client, base_url }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

/// Strip the weak prefix and quotes from an `ETag` header value.
fn normalize_etag(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    raw.trim_matches('"').to_string()
}

impl RemoteSource for HttpRemote {
    async fn fetch(&self, key: &str, entry_tag: Option<&str>) -> Result<RemoteResponse> {
        let url = self.url_for(key);
        let mut request = self.client.get(&url).header(header::ACCEPT, "application/json");
        if let Some(tag) = entry_tag {
            request = request.header(header::IF_NONE_MATCH, format!("\"{}\"", tag));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!("✓ HTTP 304 {}", url);
            return Ok(RemoteResponse::NotModified);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteError(format!(
                "{} returned {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let tag = response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(normalize_etag)
            .filter(|tag| !tag.is_empty());

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::DeserializationError(format!("{}: {}", url, e)))?;

        debug!("✓ HTTP 200 {} (etag: {:?})", url, tag);
        Ok(RemoteResponse::Modified {
            data,
            entry_tag: tag,
        })
    }
}
