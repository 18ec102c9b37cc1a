//! Configuration shared by the resolver, matcher and proxy.

use reqwest::Url;
use std::time::Duration;

/// Default GitHub REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com/";

/// User agent sent upstream unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!("update-proxy/", env!("CARGO_PKG_VERSION"));

/// How long a fetched release document stays fresh.
pub const RELEASE_CACHE_TTL: Duration = Duration::from_secs(600);

/// How long a proxied asset stays fresh.
pub const ASSET_CACHE_TTL: Duration = Duration::from_secs(1800);

/// Upstream request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Repository identity, credentials and cache lifetimes.
///
/// Passed by value into every component; nothing reads it from global state.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Owner of the upstream repository.
    pub owner: String,
    /// Name of the upstream repository.
    pub repo: String,
    /// Optional access token attached as `Authorization: token <..>`.
    pub token: Option<String>,
    /// Fixed user agent for every upstream request.
    pub user_agent: String,
    /// Base URL of the release API.
    pub api_base: Url,
    /// TTL applied to cached release metadata.
    pub release_ttl: Duration,
    /// TTL applied to cached asset payloads.
    pub asset_ttl: Duration,
    /// Per-request timeout for the upstream client.
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            api_base: Url::parse(DEFAULT_API_BASE).expect("default API base URL"),
            release_ttl: RELEASE_CACHE_TTL,
            asset_ttl: ASSET_CACHE_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ProxyConfig {
    /// Create a config for `owner/repo` with default settings.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Self::default()
        }
    }

    /// Set the access token. Empty strings are treated as "no token".
    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    /// Set the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the API base URL.
    pub fn api_base(mut self, api_base: Url) -> Self {
        self.api_base = api_base;
        self
    }

    /// Set the release metadata TTL.
    pub fn release_ttl(mut self, ttl: Duration) -> Self {
        self.release_ttl = ttl;
        self
    }

    /// Set the asset payload TTL.
    pub fn asset_ttl(mut self, ttl: Duration) -> Self {
        self.asset_ttl = ttl;
        self
    }

    /// Set the upstream request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Token to attach upstream, if any.
    pub fn credential(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Cache key for the latest release of the configured repository.
    pub fn latest_release_key(&self) -> String {
        format!("{}/{}:latest-release", self.owner, self.repo)
    }
}
