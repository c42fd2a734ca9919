//! IPFS Livestream - screen livestreaming over IPFS.
//!
//! A broadcaster records the screen in fixed-duration segments, uploads each
//! one to a content store and republishes a manifest under a stable name.
//! Watchers poll that name and mirror the manifest until the stream ends.

pub mod capture;
pub mod commands;
pub mod config;
pub mod store;
pub mod stream;
pub mod utils;

use clap::Parser;
use commands::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parse the command line and run the selected command
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ipfs_livestream=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting IPFS Livestream v{}", env!("CARGO_PKG_VERSION"));

    commands::dispatch(cli).await
}
