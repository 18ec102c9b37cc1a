/// Convenient result alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur while resolving releases or proxying assets.
///
/// None of these cross the public service boundary: [`crate::UpdateService`]
/// collapses them into "not found" or a stale fallback.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    /// Transport-level failure talking to the upstream host.
    #[error("upstream fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    /// The upstream host answered with a non-success status.
    #[error("upstream returned {status} for {url}")]
    UpstreamStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code returned by the upstream.
        status: u16,
    },
    /// A release document or header list could not be decoded.
    #[error("decoding failed: {0}")]
    Decode(#[from] serde_json::Error),
    /// Failed to parse a semantic version.
    #[error("version error: {0}")]
    Version(#[from] semver::Error),
    /// The cache store rejected a request or returned a malformed response.
    #[error("cache wire error: {0}")]
    CacheWire(String),
    /// A configured or derived URL was invalid.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    /// Helper for wrapping validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        ProxyError::Other(msg.into())
    }

    /// Whether this error came from the upstream host rather than local state.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ProxyError::Fetch(_) | ProxyError::UpstreamStatus { .. }
        )
    }
}
