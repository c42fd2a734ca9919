//! Capture trait definitions
//!
//! Platform-agnostic interface for segment sources.

use crate::utils::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Produces one media segment per call
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Capture `duration` worth of media into `path`.
    ///
    /// Blocks for the whole duration. Fails with `AppError::Capture`.
    async fn capture(&self, path: &Path, duration: Duration) -> AppResult<()>;
}

#[async_trait]
impl<T: Recorder + ?Sized> Recorder for std::sync::Arc<T> {
    async fn capture(&self, path: &Path, duration: Duration) -> AppResult<()> {
        (**self).capture(path, duration).await
    }
}

/// Capture devices reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceList {
    /// Video (screen/camera) device names
    pub video: Vec<String>,

    /// Audio input device names
    pub audio: Vec<String>,
}

impl DeviceList {
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }
}
