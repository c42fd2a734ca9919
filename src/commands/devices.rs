//! `devices` command

use crate::capture::FfmpegRecorder;
use crate::config::LivestreamConfig;
use anyhow::{Context, Result};

/// Print the capture devices ffmpeg reports on this platform
pub async fn devices(config: &LivestreamConfig) -> Result<()> {
    let recorder = FfmpegRecorder::new(&config.ffmpeg);
    let devices = recorder
        .available_devices()
        .await
        .context("Failed to list capture devices")?;

    if devices.is_empty() {
        println!("No capture devices found");
        return Ok(());
    }

    println!("Video devices:");
    for (index, name) in devices.video.iter().enumerate() {
        println!("  [{}] {}", index, name);
    }
    println!("Audio devices:");
    for (index, name) in devices.audio.iter().enumerate() {
        println!("  [{}] {}", index, name);
    }
    Ok(())
}
