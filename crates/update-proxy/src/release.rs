use crate::cache::{CacheClient, CacheEntry};
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::upstream::Upstream;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// One downloadable file attached to a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    /// File name, the only input to platform classification.
    pub name: String,
    /// Public download URL.
    pub browser_download_url: String,
    /// API URL of the asset.
    #[serde(default)]
    pub url: String,
}

/// Upstream release descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    /// Git tag the release was cut from, e.g. `v1.2.0`.
    pub tag_name: String,
    /// Release notes. Empty when the upstream has none.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
    /// Publication time as sent upstream (RFC 3339).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub published_at: String,
    /// Attached files in upstream order.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    /// Decode a release document. Unknown fields are ignored.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode for the cache.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Look up an asset by exact name.
    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.name == name)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Resolves the latest release through the cache, falling back to stale
/// data when the upstream cannot be reached.
pub struct ReleaseResolver<U> {
    upstream: Arc<U>,
    cache: CacheClient,
    config: ProxyConfig,
}

impl<U> ReleaseResolver<U>
where
    U: Upstream,
{
    /// Resolver for the repository named in `config`.
    pub fn new(upstream: Arc<U>, cache: CacheClient, config: ProxyConfig) -> Self {
        Self {
            upstream,
            cache,
            config,
        }
    }

    /// Latest known release, or `None` when neither the upstream nor the
    /// cache can provide one.
    pub async fn latest_release(&self) -> Option<Release> {
        let key = self.config.latest_release_key();

        // Raw read: an expired entry is still needed for the fallback below.
        let cached = self.cache.get_cache_raw(&key).await;
        if let Some(entry) = &cached {
            if entry.is_fresh(self.cache.clock().now_millis()) {
                match Release::from_slice(&entry.data) {
                    Ok(release) => {
                        tracing::debug!(key = %key, tag = %release.tag_name, "serving cached release");
                        return Some(release);
                    }
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "cached release is unreadable");
                    }
                }
            }
        }

        match self.fetch_and_store(&key).await {
            Ok(release) => Some(release),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "latest release unavailable upstream");
                let entry = cached?;
                match Release::from_slice(&entry.data) {
                    Ok(release) => {
                        tracing::info!(
                            key = %key,
                            tag = %release.tag_name,
                            expires = entry.expires,
                            "serving stale release"
                        );
                        Some(release)
                    }
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "stale release is unreadable");
                        None
                    }
                }
            }
        }
    }

    async fn fetch_and_store(&self, key: &str) -> Result<Release> {
        let bytes = self.upstream.latest_release().await?;
        let release = Release::from_slice(&bytes)?;

        let entry = CacheEntry::with_ttl(
            release.to_vec()?,
            vec![("content-type".to_string(), "application/json".to_string())],
            self.config.release_ttl,
            self.cache.clock(),
        );
        self.cache.set_cache(key, &entry).await;

        tracing::info!(tag = %release.tag_name, assets = release.assets.len(), "fetched latest release");
        Ok(release)
    }
}
