//! `watch` command

use crate::config::LivestreamConfig;
use crate::store::IpfsStore;
use crate::stream::{WatchOptions, Watcher};
use anyhow::Result;

/// Follow `name` until its stream ends or Ctrl-C is pressed
pub async fn watch(config: &LivestreamConfig, name: &str) -> Result<()> {
    let store = IpfsStore::new(&config.api_url, &config.gateway_url);
    let mut watcher = Watcher::new(
        store,
        WatchOptions {
            data_dir: config.watch_dir(),
            segment_duration: config.sample_duration,
            cache_addr: config.cache_addr,
        },
    );

    tokio::select! {
        result = watcher.watch(name) => {
            let manifest = result.map_err(|e| {
                tracing::error!(code = e.code(), "Watching {} failed: {}", name, e);
                e
            })?;
            println!("Stream {} ended after {} parts", name, manifest.len());
            for part in &manifest.segments {
                println!("{}", part);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, stopping");
        }
    }

    Ok(())
}
