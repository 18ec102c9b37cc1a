use crate::{
    cache::CacheClient,
    config::ProxyConfig,
    error::{ProxyError, Result},
    platform::{find_signature_asset, select_download_asset, select_update_asset, Platform},
    proxy::{AssetProxy, ProxiedAsset},
    release::{Asset, Release, ReleaseResolver},
    upstream::Upstream,
    version,
};
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;

/// Route under which proxied downloads are served.
pub const DOWNLOAD_ASSET_PATH: &str = "/github/download-asset";

/// An updater asking whether it should update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheckRequest {
    pub platform: String,
    pub arch: String,
    pub version: String,
}

impl UpdateCheckRequest {
    pub fn new(
        platform: impl Into<String>,
        arch: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            arch: arch.into(),
            version: version.into(),
        }
    }
}

/// Asset chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub filename: String,
    /// Upstream download URL of the asset.
    pub download_url: String,
    /// Detached signature text, when the release carries one.
    pub signature: Option<String>,
}

/// Payload handed to an updater when a newer release exists.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UpdateManifest {
    pub name: String,
    pub notes: String,
    pub pub_date: String,
    pub signature: Option<String>,
    pub url: String,
}

/// Why a request resolved to "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NotFound {
    #[error("unknown platform")]
    InvalidPlatform,
    #[error("client version is not valid semver")]
    InvalidVersion,
    #[error("no release is known")]
    NoRelease,
    #[error("release tag is not valid semver")]
    InvalidReleaseVersion,
    #[error("no asset matches the platform and architecture")]
    NoMatchingAsset,
    #[error("download link could not be built")]
    InvalidRootUrl,
}

/// Result of an update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// A newer version is available.
    Available(Box<UpdateManifest>),
    /// The caller already runs the latest version.
    UpToDate,
    /// The request cannot be answered.
    NotFound(NotFound),
}

/// Front door for update checks and downloads.
pub struct UpdateService<U> {
    upstream: Arc<U>,
    resolver: ReleaseResolver<U>,
    proxy: AssetProxy<U>,
}

impl<U> UpdateService<U>
where
    U: Upstream,
{
    /// Create a service sharing one upstream and one cache client.
    pub fn new(upstream: U, cache: CacheClient, config: ProxyConfig) -> Self {
        let upstream = Arc::new(upstream);
        Self {
            resolver: ReleaseResolver::new(upstream.clone(), cache.clone(), config.clone()),
            proxy: AssetProxy::new(upstream.clone(), cache, config),
            upstream,
        }
    }

    /// Latest release, fresh from cache, upstream, or stale cache.
    pub async fn latest_release(&self) -> Option<Release> {
        self.resolver.latest_release().await
    }

    /// Decide whether `request` should update, and to what.
    ///
    /// `root_url` is the externally visible origin of this service; the
    /// returned manifest points downloads back through it.
    pub async fn check_for_update(
        &self,
        request: &UpdateCheckRequest,
        root_url: &str,
    ) -> UpdateStatus {
        if request.platform.parse::<Platform>().is_err() {
            return UpdateStatus::NotFound(NotFound::InvalidPlatform);
        }

        let current = match version::client_version(&request.version) {
            Ok(current) => current,
            Err(_) => return UpdateStatus::NotFound(NotFound::InvalidVersion),
        };

        let Some(release) = self.resolver.latest_release().await else {
            return UpdateStatus::NotFound(NotFound::NoRelease);
        };

        let remote = match version::release_version(&release.tag_name) {
            Ok(remote) => remote,
            Err(err) => {
                tracing::warn!(tag = %release.tag_name, error = %err, "release tag is not semver");
                return UpdateStatus::NotFound(NotFound::InvalidReleaseVersion);
            }
        };

        if !version::is_newer(&remote, &current) {
            tracing::debug!(%remote, %current, "client is up to date");
            return UpdateStatus::UpToDate;
        }

        let Some((asset, target)) =
            select_update_asset(&request.platform, &request.arch, &release.assets)
        else {
            tracing::info!(
                platform = %request.platform,
                arch = %request.arch,
                tag = %release.tag_name,
                "no asset for platform"
            );
            return UpdateStatus::NotFound(NotFound::NoMatchingAsset);
        };

        let resolved = ResolvedAsset {
            filename: asset.name.clone(),
            download_url: asset.browser_download_url.clone(),
            signature: self.find_asset_signature(&asset.name, &release.assets).await,
        };

        let url = match proxied_download_url(root_url, &resolved) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(root_url, error = %err, "cannot build download link");
                return UpdateStatus::NotFound(NotFound::InvalidRootUrl);
            }
        };

        tracing::info!(
            platform = %target,
            arch = %request.arch,
            from = %current,
            to = %remote,
            asset = %resolved.filename,
            signed = resolved.signature.is_some(),
            "update available"
        );

        UpdateStatus::Available(Box::new(UpdateManifest {
            name: release.tag_name,
            notes: release.body,
            pub_date: release.published_at,
            signature: resolved.signature,
            url,
        }))
    }

    /// Installer for the "download latest" flow.
    pub async fn latest_download(&self, platform: &str, arch: &str) -> Option<ResolvedAsset> {
        platform.parse::<Platform>().ok()?;
        let release = self.resolver.latest_release().await?;
        let asset = select_download_asset(platform, arch, &release.assets)?;
        Some(ResolvedAsset {
            filename: asset.name.clone(),
            download_url: asset.browser_download_url.clone(),
            signature: None,
        })
    }

    /// Proxy an asset download through the cache.
    pub async fn download_asset(&self, asset_url: &str, filename: &str) -> Option<ProxiedAsset> {
        self.proxy.download(asset_url, filename).await
    }

    /// Text of `<filename>.sig`, if the release has one and it can be fetched.
    pub async fn find_asset_signature(&self, filename: &str, assets: &[Asset]) -> Option<String> {
        let signature = find_signature_asset(filename, assets)?;
        match self
            .upstream
            .fetch_asset(&signature.browser_download_url)
            .await
        {
            Ok(fetched) => Some(String::from_utf8_lossy(&fetched.body).into_owned()),
            Err(err) => {
                tracing::warn!(asset = %signature.name, error = %err, "signature fetch failed");
                None
            }
        }
    }
}

/// `<root>/github/download-asset?asset=<url>&filename=<name>`.
pub fn proxied_download_url(root_url: &str, asset: &ResolvedAsset) -> Result<String> {
    let base = format!("{}{}", root_url.trim_end_matches('/'), DOWNLOAD_ASSET_PATH);
    let mut url =
        Url::parse(&base).map_err(|err| ProxyError::InvalidUrl(format!("{base}: {err}")))?;
    url.query_pairs_mut()
        .append_pair("asset", &asset.download_url)
        .append_pair("filename", &asset.filename);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::upstream::FetchedAsset;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;

    struct MockUpstream {
        release: Option<Vec<u8>>,
        assets: HashMap<String, Vec<u8>>,
    }

    impl MockUpstream {
        fn new(release: Option<Release>) -> Self {
            Self {
                release: release.map(|r| serde_json::to_vec(&r).unwrap()),
                assets: HashMap::new(),
            }
        }

        fn insert(&mut self, url: &str, data: &[u8]) {
            self.assets.insert(url.to_string(), data.to_vec());
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn latest_release(&self) -> Result<Bytes> {
            self.release
                .clone()
                .map(Bytes::from)
                .ok_or_else(|| ProxyError::UpstreamStatus {
                    url: "mock".into(),
                    status: 404,
                })
        }

        async fn fetch_asset(&self, url: &str) -> Result<FetchedAsset> {
            self.assets
                .get(url)
                .map(|data| FetchedAsset {
                    headers: vec![],
                    body: Bytes::from(data.clone()),
                })
                .ok_or_else(|| ProxyError::UpstreamStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.into(),
            browser_download_url: format!("https://github.com/acme/app/releases/download/v1.2.0/{name}"),
            url: format!("https://api.github.com/repos/acme/app/releases/assets/{name}"),
        }
    }

    fn release(tag: &str, names: &[&str]) -> Release {
        Release {
            tag_name: tag.into(),
            body: "Bug fixes".into(),
            published_at: "2024-06-01T12:00:00Z".into(),
            assets: names.iter().map(|n| asset(n)).collect(),
        }
    }

    fn service(upstream: MockUpstream) -> UpdateService<MockUpstream> {
        let clock = Arc::new(ManualClock::new(1_000));
        UpdateService::new(
            upstream,
            CacheClient::in_memory(clock),
            ProxyConfig::new("acme", "app"),
        )
    }

    const ROOT: &str = "https://updates.example.com";

    #[tokio::test]
    async fn newer_release_is_offered_with_signature() {
        let release = release("v1.2.0", &["App_x64-setup.nsis.zip", "App_x64-setup.nsis.zip.sig"]);
        let mut upstream = MockUpstream::new(Some(release.clone()));
        upstream.insert(&release.assets[1].browser_download_url, b"dW50cnVzdGVkIGNvbW1lbnQ=");
        let service = service(upstream);

        let status = service
            .check_for_update(&UpdateCheckRequest::new("windows", "x86_64", "1.1.9"), ROOT)
            .await;

        let manifest = match status {
            UpdateStatus::Available(manifest) => manifest,
            other => panic!("expected update, got {other:?}"),
        };
        assert_eq!(manifest.name, "v1.2.0");
        assert_eq!(manifest.notes, "Bug fixes");
        assert_eq!(manifest.pub_date, "2024-06-01T12:00:00Z");
        assert_eq!(manifest.signature.as_deref(), Some("dW50cnVzdGVkIGNvbW1lbnQ="));

        let url = Url::parse(&manifest.url).unwrap();
        assert_eq!(url.path(), "/github/download-asset");
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["asset"], release.assets[0].browser_download_url);
        assert_eq!(query["filename"], "App_x64-setup.nsis.zip");
    }

    #[tokio::test]
    async fn missing_signature_is_not_an_error() {
        let service = service(MockUpstream::new(Some(release("v1.2.0", &["App_x64.app.tar.gz"]))));
        match service
            .check_for_update(&UpdateCheckRequest::new("darwin", "x86_64", "1.0.0"), ROOT)
            .await
        {
            UpdateStatus::Available(manifest) => assert!(manifest.signature.is_none()),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unfetchable_signature_is_absent() {
        // The .sig asset exists but the mock has no body for it.
        let service = service(MockUpstream::new(Some(release(
            "v1.2.0",
            &["App_x64.app.tar.gz", "App_x64.app.tar.gz.sig"],
        ))));
        match service
            .check_for_update(&UpdateCheckRequest::new("darwin", "x86_64", "1.0.0"), ROOT)
            .await
        {
            UpdateStatus::Available(manifest) => assert!(manifest.signature.is_none()),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_version_is_up_to_date() {
        let service = service(MockUpstream::new(Some(release("v1.2.0", &["App-x64-setup.zip"]))));
        let status = service
            .check_for_update(&UpdateCheckRequest::new("windows", "x86_64", "1.2.0"), ROOT)
            .await;
        assert_eq!(status, UpdateStatus::UpToDate);

        let status = service
            .check_for_update(&UpdateCheckRequest::new("windows", "x86_64", "2.0.0"), ROOT)
            .await;
        assert_eq!(status, UpdateStatus::UpToDate);
    }

    #[tokio::test]
    async fn invalid_release_tag_is_not_found() {
        let service = service(MockUpstream::new(Some(release("not-a-version", &["App-x64-setup.zip"]))));
        for version in ["0.0.1", "1.2.0", "99.0.0"] {
            let status = service
                .check_for_update(&UpdateCheckRequest::new("windows", "x86_64", version), ROOT)
                .await;
            assert_eq!(status, UpdateStatus::NotFound(NotFound::InvalidReleaseVersion));
        }
    }

    #[tokio::test]
    async fn request_validation_precedes_release_lookup() {
        let service = service(MockUpstream::new(None));
        assert_eq!(
            service
                .check_for_update(&UpdateCheckRequest::new("beos", "x86_64", "1.0.0"), ROOT)
                .await,
            UpdateStatus::NotFound(NotFound::InvalidPlatform)
        );
        assert_eq!(
            service
                .check_for_update(&UpdateCheckRequest::new("linux", "x86_64", "one"), ROOT)
                .await,
            UpdateStatus::NotFound(NotFound::InvalidVersion)
        );
        assert_eq!(
            service
                .check_for_update(&UpdateCheckRequest::new("linux", "x86_64", "1.0.0"), ROOT)
                .await,
            UpdateStatus::NotFound(NotFound::NoRelease)
        );
    }

    #[tokio::test]
    async fn no_matching_asset_is_not_found() {
        let service = service(MockUpstream::new(Some(release("v1.2.0", &["App.dmg"]))));
        let status = service
            .check_for_update(&UpdateCheckRequest::new("linux", "x86_64", "1.0.0"), ROOT)
            .await;
        assert_eq!(status, UpdateStatus::NotFound(NotFound::NoMatchingAsset));
    }

    #[tokio::test]
    async fn latest_download_uses_installer_rules() {
        let service = service(MockUpstream::new(Some(release(
            "v1.2.0",
            &["App_x64-setup.nsis.zip", "App_aarch64.dmg", "App_x64-setup.exe"],
        ))));

        let resolved = service.latest_download("windows", "x64").await.unwrap();
        assert_eq!(resolved.filename, "App_x64-setup.nsis.zip");
        assert!(resolved.signature.is_none());

        let resolved = service.latest_download("mac", "m1").await.unwrap();
        assert_eq!(resolved.filename, "App_aarch64.dmg");

        assert!(service.latest_download("linux", "x86_64").await.is_none());
        assert!(service.latest_download("amiga", "x64").await.is_none());
    }

    #[test]
    fn download_url_is_form_encoded() {
        let resolved = ResolvedAsset {
            filename: "My App 1.0.zip".into(),
            download_url: "https://github.com/a/b/releases/download/v1.0/My.App.zip?x=1&y=2".into(),
            signature: None,
        };
        let url = proxied_download_url("https://updates.example.com/", &resolved).unwrap();
        assert_eq!(
            url,
            "https://updates.example.com/github/download-asset?asset=https%3A%2F%2Fgithub.com%2Fa%2Fb%2Freleases%2Fdownload%2Fv1.0%2FMy.App.zip%3Fx%3D1%26y%3D2&filename=My+App+1.0.zip"
        );
        assert!(proxied_download_url("not a root", &resolved).is_err());
    }
}
