//! HTTP front end for the update proxy.
//!
//! Exposes update checks, proxied downloads and the latest release over
//! axum. All decisions are made by [`UpdateService`]; this crate only maps
//! requests onto it and its answers onto status codes.

pub mod config;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use update_proxy::{
    CacheClient, Clock, GithubClient, MemoryNamespace, SystemClock, UpdateService,
    DOWNLOAD_ASSET_PATH,
};

pub use config::ServerArgs;

/// Interval between sweeps of expired cache entries.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<UpdateService<GithubClient>>,
    /// Origin used in download links; derived per request when `None`.
    pub public_url: Option<String>,
}

impl AppState {
    /// Wrap `service`. An empty public URL counts as unset.
    pub fn new(service: UpdateService<GithubClient>, public_url: Option<String>) -> Self {
        Self {
            service: Arc::new(service),
            public_url: public_url.filter(|url| !url.is_empty()),
        }
    }

    /// Build the service described by `args` on top of `cache`.
    pub fn from_args(args: &ServerArgs, cache: CacheClient) -> Result<Self> {
        let config = args.proxy_config()?;
        let upstream = GithubClient::builder(config.clone())
            .build()
            .context("failed to build GitHub client")?;
        Ok(Self::new(
            UpdateService::new(upstream, cache, config),
            args.public_url.clone(),
        ))
    }
}

/// All routes, with permissive CORS and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check/:platform/:arch/:version", get(routes::check))
        .route(DOWNLOAD_ASSET_PATH, get(routes::download_asset))
        .route("/download/:platform/:arch", get(routes::download_latest))
        .route("/latest", any(routes::latest))
        .route("/ping", get(routes::ping))
        .fallback(routes::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `args.bind` and serve until Ctrl+C.
pub async fn run(args: ServerArgs) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let namespace = Arc::new(MemoryNamespace::new(clock.clone()));
    let state = AppState::from_args(&args, CacheClient::new(namespace.clone(), clock))?;
    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", args.bind))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        owner = %args.owner,
        repo = %args.repo,
        public_url = args.public_url.as_deref().unwrap_or("<from request>"),
        "update server listening"
    );

    let sweeper = namespace.spawn_sweeper(CACHE_SWEEP_INTERVAL);
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");
    sweeper.abort();
    served?;

    tracing::info!("update server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
