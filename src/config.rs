//! Livestream configuration with file and environment variable loading.
//!
//! Layers, later ones winning: defaults, the `[livestream]` section of a TOML
//! file, `LIVESTREAM_*` environment variables, then command-line flags
//! (applied by the commands).
//!
//! Environment variables:
//! - `LIVESTREAM_FFMPEG`: ffmpeg executable
//! - `LIVESTREAM_SAMPLES_PATH`: working directory root
//! - `LIVESTREAM_SAMPLE_DURATION`: segment duration, e.g. `10s`
//! - `LIVESTREAM_IPFS_API`: IPFS HTTP API base URL
//! - `LIVESTREAM_IPFS_GATEWAY`: IPFS gateway base URL
//! - `LIVESTREAM_STREAM_KEY`: key the manifest is published under
//! - `LIVESTREAM_CACHE_ADDR`: manifest responder address, empty or `off` disables it
//!
//! Default working directory: `~/.ipfs-livestream/samples`

use crate::store::SELF_KEY;
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CACHE_ADDR: &str = "0.0.0.0:8888";

/// Configuration shared by all commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivestreamConfig {
    pub ffmpeg: PathBuf,

    /// Root of the working directories; broadcasts use `broadcast/`,
    /// watchers `watch/`
    pub samples_path: PathBuf,

    #[serde(with = "humantime_duration")]
    pub sample_duration: Duration,

    pub api_url: String,

    pub gateway_url: String,

    pub stream_key: String,

    #[serde(with = "optional_addr")]
    pub cache_addr: Option<SocketAddr>,

    /// Capture devices; platform defaults are picked when either is unset
    pub video_device: Option<String>,
    pub audio_device: Option<String>,

    /// Replaces the node's bootstrap peers when set
    pub bootstrap: Option<Vec<String>>,
}

impl Default for LivestreamConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            samples_path: default_samples_path(),
            sample_duration: Duration::from_secs(10),
            api_url: "http://127.0.0.1:5001".to_string(),
            gateway_url: "http://127.0.0.1:8080".to_string(),
            stream_key: SELF_KEY.to_string(),
            cache_addr: DEFAULT_CACHE_ADDR.parse().ok(),
            video_device: None,
            audio_device: None,
            bootstrap: None,
        }
    }
}

/// Get the default working directory (~/.ipfs-livestream/samples).
fn default_samples_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".ipfs-livestream").join("samples"))
        .unwrap_or_else(|| PathBuf::from(".ipfs-livestream/samples"))
}

impl LivestreamConfig {
    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> AppResult<Self> {
        Self::load(None)
    }

    /// Read the `[livestream]` section of a TOML file.
    ///
    /// ```toml
    /// [livestream]
    /// sample_duration = "6s"
    /// api_url = "http://10.0.0.2:5001"
    /// cache_addr = "127.0.0.1:8888"
    /// ```
    ///
    /// A file without the section yields the defaults.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))
    }

    fn from_toml(contents: &str) -> AppResult<Self> {
        let table: toml::Table = contents
            .parse()
            .map_err(|e| AppError::Config(format!("failed to parse TOML: {}", e)))?;

        match table.get("livestream") {
            Some(section) => section
                .clone()
                .try_into()
                .map_err(|e| AppError::Config(format!("failed to parse [livestream] section: {}", e))),
            None => Ok(Self::default()),
        }
    }

    /// Override fields from `LIVESTREAM_*` variables looked up via `var`
    pub fn apply_env<F>(&mut self, var: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("LIVESTREAM_FFMPEG") {
            self.ffmpeg = PathBuf::from(v);
        }
        if let Some(v) = var("LIVESTREAM_SAMPLES_PATH") {
            self.samples_path = PathBuf::from(v);
        }
        if let Some(v) = var("LIVESTREAM_SAMPLE_DURATION") {
            self.sample_duration = humantime::parse_duration(&v).map_err(|e| {
                AppError::Config(format!("LIVESTREAM_SAMPLE_DURATION {:?}: {}", v, e))
            })?;
        }
        if let Some(v) = var("LIVESTREAM_IPFS_API") {
            self.api_url = v;
        }
        if let Some(v) = var("LIVESTREAM_IPFS_GATEWAY") {
            self.gateway_url = v;
        }
        if let Some(v) = var("LIVESTREAM_STREAM_KEY") {
            self.stream_key = v;
        }
        if let Some(v) = var("LIVESTREAM_CACHE_ADDR") {
            self.cache_addr = optional_addr::parse(&v)
                .map_err(|e| AppError::Config(format!("LIVESTREAM_CACHE_ADDR {:?}: {}", v, e)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.sample_duration.is_zero() {
            return Err(AppError::Config("sample_duration must be greater than zero".to_string()));
        }
        if u64::try_from(self.sample_duration.as_nanos()).is_err() {
            return Err(AppError::Config(format!(
                "sample_duration {} is too long",
                humantime::format_duration(self.sample_duration)
            )));
        }
        if self.stream_key.trim().is_empty() {
            return Err(AppError::Config("stream_key must not be empty".to_string()));
        }
        Ok(())
    }

    /// Working directory of a broadcast; emptied when it starts
    pub fn broadcast_dir(&self) -> PathBuf {
        self.samples_path.join("broadcast")
    }

    /// Where a watcher keeps the downloaded manifest
    pub fn watch_dir(&self) -> PathBuf {
        self.samples_path.join("watch")
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod optional_addr {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::{AddrParseError, SocketAddr};

    /// Empty or `off` disables the address
    pub fn parse(raw: &str) -> Result<Option<SocketAddr>, AddrParseError> {
        match raw.trim() {
            "" | "off" => Ok(None),
            addr => addr.parse().map(Some),
        }
    }

    pub fn serialize<S: Serializer>(addr: &Option<SocketAddr>, serializer: S) -> Result<S::Ok, S::Error> {
        match addr {
            Some(addr) => serializer.serialize_str(&addr.to_string()),
            None => serializer.serialize_str("off"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SocketAddr>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
