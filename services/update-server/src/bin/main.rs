//! Update server daemon
//!
//! Answers updater checks and relays release assets from GitHub.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use update_server::ServerArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| args.default_filter());
    fmt().with_env_filter(filter).init();

    tracing::info!("Starting update server...");
    update_server::run(args).await
}
