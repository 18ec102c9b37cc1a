use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, Url};
use std::time::Duration;

const RELEASE_ACCEPT: &str = "application/vnd.github.preview";
const ASSET_ACCEPT: &str = "application/octet-stream";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Hosts that may receive the access token besides the configured API origin.
const GITHUB_HOSTS: &[&str] = &["github.com", "api.github.com"];

/// A fully buffered upstream asset response.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    /// Upstream response headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Complete response body.
    pub body: Bytes,
}

/// Abstraction over the upstream release host.
///
/// Implementations return an error for transport failures and for any
/// non-success status.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Raw JSON document describing the latest release.
    async fn latest_release(&self) -> Result<Bytes>;

    /// Download the asset at `url` in full.
    async fn fetch_asset(&self, url: &str) -> Result<FetchedAsset>;
}

/// Builder for [`GithubClient`].
pub struct GithubClientBuilder {
    config: ProxyConfig,
    client: Option<Client>,
}

impl GithubClientBuilder {
    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<GithubClient> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(self.config.request_timeout)
                .connect_timeout(CONNECT_TIMEOUT)
                .build()?,
        };
        let latest_url = latest_release_url(&self.config)?;

        Ok(GithubClient {
            config: self.config,
            client,
            latest_url,
        })
    }
}

/// GitHub Releases backed [`Upstream`].
#[derive(Clone)]
pub struct GithubClient {
    config: ProxyConfig,
    client: Client,
    latest_url: Url,
}

impl GithubClient {
    /// Create a new builder.
    pub fn builder(config: ProxyConfig) -> GithubClientBuilder {
        GithubClientBuilder {
            config,
            client: None,
        }
    }

    /// Endpoint queried for the latest release.
    pub fn latest_url(&self) -> &Url {
        &self.latest_url
    }

    /// Whether the access token may be sent to `url`.
    ///
    /// Only the configured API origin and GitHub's own HTTPS hosts qualify;
    /// asset URLs can be supplied by callers and must never see the token.
    pub fn sends_credential_to(&self, url: &Url) -> bool {
        if url.origin() == self.config.api_base.origin() {
            return true;
        }
        url.scheme() == "https"
            && url
                .host_str()
                .is_some_and(|host| GITHUB_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h)))
    }

    fn authorize(&self, request: RequestBuilder, url: &Url) -> RequestBuilder {
        let request = request.header(USER_AGENT, &self.config.user_agent);
        match self.config.credential() {
            Some(token) if self.sends_credential_to(url) => {
                request.header(AUTHORIZATION, format!("token {token}"))
            }
            Some(_) => {
                tracing::debug!(%url, "withholding credential from foreign host");
                request
            }
            None => request,
        }
    }
}

/// Header pairs in wire order. Values that are not valid UTF-8 are skipped
/// rather than altered.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| match std::str::from_utf8(value.as_bytes()) {
            Ok(value) => Some((name.as_str().to_string(), value.to_string())),
            Err(_) => {
                tracing::debug!(header = %name, "dropping non-UTF-8 upstream header");
                None
            }
        })
        .collect()
}

fn latest_release_url(config: &ProxyConfig) -> Result<Url> {
    let slug = format!("repos/{}/{}/releases/latest", config.owner, config.repo);
    config
        .api_base
        .join(&slug)
        .map_err(|err| ProxyError::InvalidUrl(format!("{slug}: {err}")))
}

#[async_trait]
impl Upstream for GithubClient {
    async fn latest_release(&self) -> Result<Bytes> {
        tracing::debug!(url = %self.latest_url, "fetching latest release");
        let request = self
            .client
            .get(self.latest_url.clone())
            .header(ACCEPT, RELEASE_ACCEPT);
        let response = self.authorize(request, &self.latest_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::UpstreamStatus {
                url: self.latest_url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn fetch_asset(&self, url: &str) -> Result<FetchedAsset> {
        let parsed = Url::parse(url).map_err(|err| ProxyError::InvalidUrl(format!("{url}: {err}")))?;
        let request = self.client.get(parsed.clone()).header(ACCEPT, ASSET_ACCEPT);
        let response = self.authorize(request, &parsed).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let headers = header_pairs(response.headers());
        let body = response.bytes().await?;
        Ok(FetchedAsset { headers, body })
    }
}
