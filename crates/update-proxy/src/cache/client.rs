use super::entry::{decode_headers, encode_headers, CacheEntry};
use super::store::{
    MemoryNamespace, StoreNamespace, HEADER_EXPIRES, HEADER_HEADERS, HEADER_STALE, HEADER_TTL,
    STALE_ALLOW,
};
use crate::clock::Clock;
use crate::error::{ProxyError, Result};
use bytes::Bytes;
use http::{HeaderValue, Method, Request, StatusCode};
use std::sync::Arc;

const STORE_URI: &str = "https://cache/";

/// Translates cache entries to and from the store wire format.
///
/// Store failures are never surfaced: a failed read is a miss and a failed
/// write is logged and dropped.
#[derive(Clone)]
pub struct CacheClient {
    namespace: Arc<dyn StoreNamespace>,
    clock: Arc<dyn Clock>,
}

impl CacheClient {
    /// Client resolving keys through `namespace`, with TTLs measured on `clock`.
    pub fn new(namespace: Arc<dyn StoreNamespace>, clock: Arc<dyn Clock>) -> Self {
        Self { namespace, clock }
    }

    /// Client over a fresh in-process namespace.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let namespace = Arc::new(MemoryNamespace::new(clock.clone()));
        Self::new(namespace, clock)
    }

    /// Clock shared with the stores.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Store `entry` under `key`, replacing whatever was there.
    pub async fn set_cache(&self, key: &str, entry: &CacheEntry) {
        if let Err(err) = self.try_set(key, entry).await {
            tracing::warn!(key, error = %err, "cache write failed");
        }
    }

    /// Entry under `key` if it has not expired.
    pub async fn get_cache(&self, key: &str) -> Option<CacheEntry> {
        self.get(key, false).await
    }

    /// Entry under `key` regardless of expiry, for stale fallback.
    pub async fn get_cache_raw(&self, key: &str) -> Option<CacheEntry> {
        self.get(key, true).await
    }

    async fn get(&self, key: &str, allow_stale: bool) -> Option<CacheEntry> {
        match self.try_get(key, allow_stale).await {
            Ok(entry) => {
                tracing::debug!(key, hit = entry.is_some(), allow_stale, "cache lookup");
                entry
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn try_set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let ttl = ttl_seconds(entry.expires, self.clock.now_millis());
        let request = Request::builder()
            .method(Method::PUT)
            .uri(STORE_URI)
            .header(HEADER_TTL, HeaderValue::from(ttl))
            .header(HEADER_HEADERS, encode_headers(&entry.headers)?)
            .body(entry.data.clone())
            .map_err(|err| ProxyError::CacheWire(err.to_string()))?;

        let response = self.namespace.stub(key).fetch(request).await?;
        if response.status() != StatusCode::OK {
            return Err(ProxyError::CacheWire(format!(
                "store rejected put with {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn try_get(&self, key: &str, allow_stale: bool) -> Result<Option<CacheEntry>> {
        let mut builder = Request::builder().method(Method::GET).uri(STORE_URI);
        if allow_stale {
            builder = builder.header(HEADER_STALE, STALE_ALLOW);
        }
        let request = builder
            .body(Bytes::new())
            .map_err(|err| ProxyError::CacheWire(err.to_string()))?;

        let response = self.namespace.stub(key).fetch(request).await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            status => {
                return Err(ProxyError::CacheWire(format!(
                    "store answered get with {status}"
                )))
            }
        }

        let headers = decode_headers(response.headers().get(HEADER_HEADERS))?;
        let expires = response
            .headers()
            .get(HEADER_EXPIRES)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(Some(CacheEntry::new(response.into_body(), headers, expires)))
    }
}

/// Remaining lifetime in whole seconds, rounded up.
fn ttl_seconds(expires: u64, now: u64) -> i64 {
    let remaining = expires as i64 - now as i64;
    if remaining > 0 {
        (remaining + 999) / 1000
    } else {
        remaining / 1000
    }
}
