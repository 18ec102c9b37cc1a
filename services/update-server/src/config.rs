//! Command-line and environment configuration.

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use tracing_subscriber::EnvFilter;
use update_proxy::{ProxyConfig, DEFAULT_API_BASE, DEFAULT_USER_AGENT};

/// Command-line arguments for the update server
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "UPDATE_PROXY_BIND", default_value = "0.0.0.0:8787")]
    pub bind: String,

    /// Owner of the GitHub repository publishing releases
    #[arg(long, env = "GITHUB_OWNER")]
    pub owner: String,

    /// Name of the GitHub repository publishing releases
    #[arg(long, env = "GITHUB_REPO")]
    pub repo: String,

    /// Access token for private repositories or higher rate limits
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// User agent sent to GitHub
    #[arg(long, env = "UPDATE_PROXY_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Base URL of the GitHub REST API
    #[arg(long, env = "GITHUB_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Public origin used in download links (derived from the request when unset)
    #[arg(long, env = "UPDATE_PROXY_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    pub debug: bool,
}

impl ServerArgs {
    /// Proxy configuration described by these arguments.
    pub fn proxy_config(&self) -> Result<ProxyConfig> {
        let mut api_base = self.api_base.clone();
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        let api_base = Url::parse(&api_base)
            .with_context(|| format!("invalid --api-base {}", self.api_base))?;

        Ok(ProxyConfig::new(&self.owner, &self.repo)
            .token(self.github_token.clone())
            .user_agent(&self.user_agent)
            .api_base(api_base))
    }

    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> EnvFilter {
        if self.debug {
            EnvFilter::new("debug,update_proxy=debug,update_server=debug,tower_http=debug")
        } else {
            EnvFilter::new("info,update_proxy=info,update_server=info")
        }
    }
}
