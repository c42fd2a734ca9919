//! Command-line interface
//!
//! Subcommands:
//! - `ipfs-livestream broadcast` - capture the screen and publish the stream
//! - `ipfs-livestream watch <name>` - follow a published stream
//! - `ipfs-livestream devices` - list capture devices ffmpeg can see

pub mod broadcast;
pub mod devices;
pub mod watch;

use crate::config::LivestreamConfig;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ipfs-livestream")]
#[command(about = "Screen livestreaming over IPFS")]
#[command(version)]
pub struct Cli {
    /// TOML file with a [livestream] section
    #[arg(short, long, global = true, env = "LIVESTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture segments and publish the growing manifest
    Broadcast {
        /// Stop after this many segments; 0 runs until Ctrl-C
        #[arg(short, long, default_value = "0")]
        samples: u32,

        /// Video capture device, as listed by `devices`
        #[arg(long, requires = "audio_device")]
        video_device: Option<String>,

        /// Audio capture device, as listed by `devices`
        #[arg(long, requires = "video_device")]
        audio_device: Option<String>,
    },

    /// Follow a stream until it ends
    Watch {
        /// Stream name (the broadcaster's peer id)
        name: String,
    },

    /// List available capture devices
    Devices,
}

/// Load the configuration layers and run the selected command
pub async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = LivestreamConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Broadcast {
            samples,
            video_device,
            audio_device,
        } => {
            if let (Some(video), Some(audio)) = (video_device, audio_device) {
                config.video_device = Some(video);
                config.audio_device = Some(audio);
            }
            broadcast::broadcast(&config, samples).await
        }
        Commands::Watch { name } => watch::watch(&config, &name).await,
        Commands::Devices => devices::devices(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_broadcast_with_devices() {
        let cli = Cli::try_parse_from([
            "ipfs-livestream",
            "broadcast",
            "--samples",
            "3",
            "--video-device",
            "Integrated Camera",
            "--audio-device",
            "Microphone",
        ])
        .unwrap();

        match cli.command {
            Commands::Broadcast {
                samples,
                video_device,
                audio_device,
            } => {
                assert_eq!(samples, 3);
                assert_eq!(video_device.as_deref(), Some("Integrated Camera"));
                assert_eq!(audio_device.as_deref(), Some("Microphone"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_devices_come_in_pairs() {
        let result = Cli::try_parse_from(["ipfs-livestream", "broadcast", "--video-device", "1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_watch_with_config() {
        let cli = Cli::try_parse_from([
            "ipfs-livestream",
            "watch",
            "QmPeer",
            "--config",
            "/etc/livestream.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/livestream.toml")));
        assert!(matches!(cli.command, Commands::Watch { ref name } if name == "QmPeer"));
    }
}
