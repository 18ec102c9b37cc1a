use crate::clock::Clock;
use crate::error::{ProxyError, Result};
use bytes::Bytes;
use http::HeaderValue;
use std::time::Duration;

/// A cached payload together with the headers it was served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Raw payload bytes.
    pub data: Bytes,
    /// Response headers in their original order. Duplicates are kept.
    pub headers: Vec<(String, String)>,
    /// Absolute expiry, in milliseconds since the Unix epoch.
    pub expires: u64,
}

impl CacheEntry {
    /// Entry expiring at the absolute time `expires` (epoch milliseconds).
    pub fn new(data: impl Into<Bytes>, headers: Vec<(String, String)>, expires: u64) -> Self {
        Self {
            data: data.into(),
            headers,
            expires,
        }
    }

    /// Build an entry that expires `ttl` from the clock's current time.
    pub fn with_ttl(
        data: impl Into<Bytes>,
        headers: Vec<(String, String)>,
        ttl: Duration,
        clock: &dyn Clock,
    ) -> Self {
        let expires = clock.now_millis().saturating_add(ttl.as_millis() as u64);
        Self::new(data, headers, expires)
    }

    /// An entry is only usable as fresh while its expiry lies strictly in the future.
    pub fn is_fresh(&self, now_millis: u64) -> bool {
        self.expires > now_millis
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Encode a header list as the JSON `[[name, value], ...]` form used on the store wire.
pub(crate) fn encode_headers(headers: &[(String, String)]) -> Result<HeaderValue> {
    let json = serde_json::to_vec(headers)?;
    HeaderValue::from_bytes(&json)
        .map_err(|err| ProxyError::CacheWire(format!("header list not encodable: {err}")))
}

/// Decode the JSON header list. A missing value decodes as an empty list.
pub(crate) fn decode_headers(value: Option<&HeaderValue>) -> Result<Vec<(String, String)>> {
    match value {
        Some(value) => Ok(serde_json::from_slice(value.as_bytes())?),
        None => Ok(Vec::new()),
    }
}
