//! `broadcast` command

use crate::capture::FfmpegRecorder;
use crate::config::LivestreamConfig;
use crate::store::{ContentStore, IpfsStore};
use crate::stream::{BroadcastOptions, Broadcaster};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

/// Broadcast until `samples` segments were captured, or until Ctrl-C when 0
pub async fn broadcast(config: &LivestreamConfig, samples: u32) -> Result<()> {
    let recorder = FfmpegRecorder::new(&config.ffmpeg);
    match (&config.video_device, &config.audio_device) {
        (Some(video), Some(audio)) => recorder.set_devices(video, audio),
        _ => recorder
            .use_default_devices()
            .await
            .context("Failed to pick default capture devices")?,
    }

    let store = connect(config).await?;

    let token = CancellationToken::new();
    let broadcaster = Broadcaster::new(
        recorder,
        store,
        BroadcastOptions {
            data_dir: config.broadcast_dir(),
            segment_duration: config.sample_duration,
            stream_key: config.stream_key.clone(),
        },
    )
    .with_cancellation(token.clone());

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT, finishing the broadcast...");
            token.cancel();
        }
    });

    let result = broadcaster.broadcast(samples).await;
    interrupt.abort();

    let manifest = result.map_err(|e| {
        tracing::error!(code = e.code(), "Broadcast failed: {}", e);
        e
    })?;

    println!(
        "Broadcast ended: {} parts published under '{}'",
        manifest.len(),
        config.stream_key
    );
    Ok(())
}

/// Connect to the IPFS node, replacing its bootstrap peers when configured
async fn connect(config: &LivestreamConfig) -> Result<IpfsStore> {
    let store = IpfsStore::new(&config.api_url, &config.gateway_url);

    if let Some(peers) = &config.bootstrap {
        store
            .set_bootstrap_list(peers)
            .await
            .context("Failed to set bootstrap peers")?;
    }

    let identity = store
        .identify()
        .await
        .with_context(|| format!("IPFS node at {} is not reachable", config.api_url))?;
    tracing::info!(
        "Connected to {} ({})",
        identity.id,
        identity.agent.as_deref().unwrap_or("unknown agent")
    );
    Ok(store)
}
