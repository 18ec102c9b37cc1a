//! Update-check and asset proxy for desktop auto-updaters.
//!
//! The crate answers "is there a newer release for this platform, arch and
//! version" against GitHub Releases and relays the matching asset download.
//! Both release metadata and asset payloads go through a single-entry,
//! TTL-scoped cache that keeps serving stale data when the upstream host is
//! unreachable.
//!
//! ```ignore
//! use std::sync::Arc;
//! use update_proxy::{
//!     CacheClient, GithubClient, ProxyConfig, SystemClock, UpdateCheckRequest, UpdateService,
//!     UpdateStatus,
//! };
//!
//! # async fn demo() -> update_proxy::Result<()> {
//! let config = ProxyConfig::new("acme", "desktop-app");
//! let upstream = GithubClient::builder(config.clone()).build()?;
//! let cache = CacheClient::in_memory(Arc::new(SystemClock));
//! let service = UpdateService::new(upstream, cache, config);
//!
//! let request = UpdateCheckRequest::new("windows", "x86_64", "1.1.9");
//! match service.check_for_update(&request, "https://updates.example.com").await {
//!     UpdateStatus::Available(manifest) => println!("update to {}", manifest.name),
//!     UpdateStatus::UpToDate => println!("already at latest version"),
//!     UpdateStatus::NotFound(reason) => println!("nothing to offer: {reason}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod clock;
mod config;
mod error;
pub mod platform;
mod proxy;
mod release;
mod updater;
mod upstream;
pub mod version;

pub use cache::{CacheClient, CacheEntry, CacheStore, MemoryNamespace, StoreNamespace, StoreStub};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ProxyConfig, ASSET_CACHE_TTL, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT,
    RELEASE_CACHE_TTL,
};
pub use error::{ProxyError, Result};
pub use platform::{check_platform, check_platform_downloads, infer_arch, Arch, Platform};
pub use proxy::{content_disposition, AssetProxy, AssetSource, ProxiedAsset, CONTENT_DISPOSITION};
pub use release::{Asset, Release, ReleaseResolver};
pub use updater::{
    proxied_download_url, NotFound, ResolvedAsset, UpdateCheckRequest, UpdateManifest,
    UpdateService, UpdateStatus, DOWNLOAD_ASSET_PATH,
};
pub use upstream::{FetchedAsset, GithubClient, GithubClientBuilder, Upstream};
