use crate::cache::{CacheClient, CacheEntry};
use crate::config::ProxyConfig;
use crate::upstream::{FetchedAsset, Upstream};
use bytes::Bytes;
use std::sync::Arc;

/// Header overridden on every proxied asset.
pub const CONTENT_DISPOSITION: &str = "content-disposition";

/// Where a proxied payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSource {
    Upstream,
    Cache,
}

/// Asset payload ready to be relayed to the caller.
#[derive(Debug, Clone)]
pub struct ProxiedAsset {
    /// Upstream headers with `Content-Disposition` replaced.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub source: AssetSource,
}

impl ProxiedAsset {
    fn new(headers: Vec<(String, String)>, body: Bytes, filename: &str, source: AssetSource) -> Self {
        Self {
            headers: with_disposition(headers, filename),
            body,
            source,
        }
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// `attachment; filename="<filename>"`, with quotes and control characters neutralised.
pub fn content_disposition(filename: &str) -> String {
    let mut escaped = String::with_capacity(filename.len());
    for ch in filename.chars().filter(|c| !c.is_control()) {
        if ch == '"' || ch == '\\' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    format!("attachment; filename=\"{escaped}\"")
}

fn with_disposition(mut headers: Vec<(String, String)>, filename: &str) -> Vec<(String, String)> {
    headers.retain(|(name, _)| !name.eq_ignore_ascii_case(CONTENT_DISPOSITION));
    headers.push((CONTENT_DISPOSITION.to_string(), content_disposition(filename)));
    headers
}

/// Relays release assets, keeping a copy of each successful download.
///
/// When the upstream fails, any cached copy is served regardless of its age;
/// only without one is the upstream retried, exactly once.
pub struct AssetProxy<U> {
    upstream: Arc<U>,
    cache: CacheClient,
    config: ProxyConfig,
}

impl<U> AssetProxy<U>
where
    U: Upstream,
{
    /// Proxy sharing `upstream` and `cache` with the rest of the service.
    pub fn new(upstream: Arc<U>, cache: CacheClient, config: ProxyConfig) -> Self {
        Self {
            upstream,
            cache,
            config,
        }
    }

    /// Fetch `asset_url` and present it as a download named `filename`.
    pub async fn download(&self, asset_url: &str, filename: &str) -> Option<ProxiedAsset> {
        let fetched = match self.upstream.fetch_asset(asset_url).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!(url = asset_url, error = %err, "asset fetch failed");

                if let Some(entry) = self.cache.get_cache_raw(asset_url).await {
                    tracing::info!(
                        url = asset_url,
                        bytes = entry.data.len(),
                        expires = entry.expires,
                        "serving cached asset"
                    );
                    return Some(ProxiedAsset::new(
                        entry.headers,
                        entry.data,
                        filename,
                        AssetSource::Cache,
                    ));
                }

                tracing::debug!(url = asset_url, "no cached copy, retrying upstream");
                match self.upstream.fetch_asset(asset_url).await {
                    Ok(fetched) => fetched,
                    Err(err) => {
                        tracing::warn!(url = asset_url, error = %err, "asset retry failed");
                        return None;
                    }
                }
            }
        };

        let FetchedAsset { headers, body } = fetched;
        let entry = CacheEntry::with_ttl(
            body.clone(),
            headers.clone(),
            self.config.asset_ttl,
            self.cache.clock(),
        );
        self.cache.set_cache(asset_url, &entry).await;

        tracing::info!(url = asset_url, bytes = body.len(), filename, "proxied asset");
        Some(ProxiedAsset::new(headers, body, filename, AssetSource::Upstream))
    }
}
