//! Watcher
//!
//! Polls the manifest published under a stream name and mirrors it locally.
//! A download whose bytes hash to the previous fingerprint is treated as "no
//! updates" and the watcher sleeps for one segment duration; anything else
//! replaces the local view wholesale, including a manifest that shrank.

use super::manifest::{Manifest, MANIFEST_FILE};
use super::responder::{self, ManifestCache};
use crate::store::ContentStore;
use crate::utils::error::AppResult;
use crate::utils::fs::fingerprint;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Settings for a watcher
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Where the downloaded manifest is stored
    pub data_dir: PathBuf,

    /// Poll interval until a manifest with its own duration arrives
    pub segment_duration: Duration,

    /// Bind address of the manifest responder; `None` disables it
    pub cache_addr: Option<SocketAddr>,
}

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Updated { segments: usize },
}

/// Follows one stream through a content store
pub struct Watcher<S> {
    store: S,
    data_dir: PathBuf,
    manifest_path: PathBuf,
    fallback_interval: Duration,
    cache_addr: Option<SocketAddr>,
    view: Manifest,
    last_fingerprint: Option<String>,
    cache: ManifestCache,
}

impl<S: ContentStore> Watcher<S> {
    pub fn new(store: S, options: WatchOptions) -> Self {
        Self {
            store,
            manifest_path: options.data_dir.join(MANIFEST_FILE),
            data_dir: options.data_dir,
            fallback_interval: options.segment_duration,
            cache_addr: options.cache_addr,
            view: Manifest::new(options.segment_duration),
            last_fingerprint: None,
            cache: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Local copy of the last manifest that parsed
    pub fn view(&self) -> &Manifest {
        &self.view
    }

    /// Bytes served by the responder
    pub fn cache(&self) -> ManifestCache {
        Arc::clone(&self.cache)
    }

    /// Download the manifest once and apply it if it changed
    pub async fn poll_once(&mut self, stream_name: &str) -> AppResult<PollOutcome> {
        if !self.data_dir.exists() {
            tokio::fs::create_dir_all(&self.data_dir).await?;
        }

        self.store.download(stream_name, &self.manifest_path).await?;
        let bytes = tokio::fs::read(&self.manifest_path).await?;

        let digest = fingerprint(&bytes);
        if self.last_fingerprint.as_deref() == Some(digest.as_str()) {
            tracing::debug!("No updates from {}", stream_name);
            return Ok(PollOutcome::Unchanged);
        }

        let manifest = Manifest::from_bytes(&bytes)?;
        tracing::info!(
            "Manifest updated: {} parts, cursor {}{}",
            manifest.len(),
            manifest.cursor,
            if manifest.ended { ", ended" } else { "" }
        );

        self.view = manifest;
        self.last_fingerprint = Some(digest);
        *self.cache.write() = bytes;

        Ok(PollOutcome::Updated {
            segments: self.view.len(),
        })
    }

    /// Follow `stream_name` until its manifest is marked ended
    pub async fn watch(&mut self, stream_name: &str) -> AppResult<Manifest> {
        let responder = match self.cache_addr {
            Some(addr) => match responder::spawn(addr, self.cache()).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!("Manifest responder disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        tracing::info!("Watching {}", stream_name);
        let result = self.poll_until_ended(stream_name).await;

        if let Some(handle) = responder {
            handle.shutdown().await;
        }
        result
    }

    async fn poll_until_ended(&mut self, stream_name: &str) -> AppResult<Manifest> {
        loop {
            match self.poll_once(stream_name).await? {
                PollOutcome::Unchanged => {
                    tokio::time::sleep(self.poll_interval()).await;
                }
                PollOutcome::Updated { .. } if self.view.ended => {
                    tracing::info!("Stream {} ended with {} parts", stream_name, self.view.len());
                    return Ok(self.view.clone());
                }
                PollOutcome::Updated { .. } => {}
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        if self.view.segment_duration.is_zero() {
            self.fallback_interval
        } else {
            self.view.segment_duration
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Recorder;
    use crate::store::{ContentId, MemoryStore, SELF_KEY};
    use crate::stream::broadcaster::{BroadcastOptions, Broadcaster};
    use crate::utils::error::AppError;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::tempdir;

    const STREAM: &str = "stream-name";

    fn options(dir: &Path) -> WatchOptions {
        WatchOptions {
            data_dir: dir.join("watch"),
            segment_duration: Duration::from_secs(3),
            cache_addr: None,
        }
    }

    fn manifest_with(parts: &[&str], ended: bool) -> Manifest {
        let mut manifest = Manifest::new(Duration::from_secs(3));
        for part in parts {
            manifest.append_segment(ContentId::new(*part));
        }
        manifest.cursor = parts.len() as u64;
        manifest.ended = ended;
        manifest
    }

    fn publish(store: &MemoryStore, manifest: &Manifest) {
        let id = store.insert(&manifest.to_bytes().unwrap());
        store.bind(STREAM, &id);
    }

    #[tokio::test]
    async fn test_unchanged_manifest_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("peer"));
        publish(&store, &manifest_with(&["a"], false));
        let mut watcher = Watcher::new(store, options(dir.path()));

        assert_eq!(
            watcher.poll_once(STREAM).await.unwrap(),
            PollOutcome::Updated { segments: 1 }
        );
        let first = watcher.view().clone();

        assert_eq!(watcher.poll_once(STREAM).await.unwrap(), PollOutcome::Unchanged);
        assert_eq!(watcher.view(), &first);
    }

    #[tokio::test]
    async fn test_shrinking_manifest_replaces_view() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("peer"));
        let mut watcher = Watcher::new(store.clone(), options(dir.path()));

        publish(&store, &manifest_with(&["a", "b"], false));
        watcher.poll_once(STREAM).await.unwrap();
        assert_eq!(watcher.view().len(), 2);

        publish(&store, &manifest_with(&["c"], false));
        let outcome = watcher.poll_once(STREAM).await.unwrap();

        assert_eq!(outcome, PollOutcome::Updated { segments: 1 });
        assert_eq!(watcher.view().segments, vec![ContentId::new("c")]);
    }

    #[tokio::test]
    async fn test_cache_holds_raw_bytes() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("peer"));
        let manifest = manifest_with(&["a"], false);
        publish(&store, &manifest);
        let mut watcher = Watcher::new(store, options(dir.path()));

        assert!(watcher.cache().read().is_empty());
        watcher.poll_once(STREAM).await.unwrap();

        assert_eq!(*watcher.cache().read(), manifest.to_bytes().unwrap());
        assert!(dir.path().join("watch").join(MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_format_error() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("peer"));
        let id = store.insert(b"<html>gateway timeout</html>");
        store.bind(STREAM, &id);
        let mut watcher = Watcher::new(store, options(dir.path()));

        let err = watcher.poll_once(STREAM).await.unwrap_err();

        assert!(matches!(err, AppError::Format(_)));
        assert!(watcher.view().is_empty());
        assert!(watcher.cache().read().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_name_is_resolution_error() {
        let dir = tempdir().unwrap();
        let mut watcher = Watcher::new(MemoryStore::new("peer"), options(dir.path()));

        let err = watcher.poll_once("nobody").await.unwrap_err();

        assert!(matches!(err, AppError::Resolution(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_returns_once_ended() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("peer"));
        publish(&store, &manifest_with(&["a"], false));

        let publisher = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                publish(&store, &manifest_with(&["a", "b"], false));
                tokio::time::sleep(Duration::from_secs(10)).await;
                publish(&store, &manifest_with(&["a", "b", "c"], true));
            })
        };

        let mut watcher = Watcher::new(store, options(dir.path()));
        let last = watcher.watch(STREAM).await.unwrap();
        publisher.await.unwrap();

        assert!(last.ended);
        assert_eq!(last.len(), 3);
    }

    #[tokio::test]
    async fn test_watch_with_responder_shuts_down_cleanly() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("peer"));
        let manifest = manifest_with(&["a"], true);
        publish(&store, &manifest);
        let mut opts = options(dir.path());
        opts.cache_addr = Some("127.0.0.1:0".parse().unwrap());
        let mut watcher = Watcher::new(store, opts);

        let last = watcher.watch(STREAM).await.unwrap();

        assert_eq!(last, manifest);
    }

    #[tokio::test]
    async fn test_taken_responder_port_does_not_stop_watch() {
        let dir = tempdir().unwrap();
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let store = Arc::new(MemoryStore::new("peer"));
        let manifest = manifest_with(&["a", "b"], true);
        publish(&store, &manifest);
        let mut opts = options(dir.path());
        opts.cache_addr = Some(occupied.local_addr().unwrap());
        let mut watcher = Watcher::new(store, opts);

        let last = watcher.watch(STREAM).await.unwrap();

        assert_eq!(last, manifest);
        drop(occupied);
    }

    struct InstantRecorder;

    #[async_trait]
    impl Recorder for InstantRecorder {
        async fn capture(&self, path: &Path, _duration: Duration) -> AppResult<()> {
            std::fs::write(path, path.to_string_lossy().as_bytes())?;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_a_broadcast_to_its_end() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("peer-live"));
        let broadcaster = Broadcaster::new(
            InstantRecorder,
            store.clone(),
            BroadcastOptions {
                data_dir: dir.path().join("broadcast"),
                segment_duration: Duration::from_secs(2),
                stream_key: SELF_KEY.to_string(),
            },
        );

        let published = broadcaster.broadcast(2).await.unwrap();

        let mut watcher = Watcher::new(store.clone(), options(dir.path()));
        let seen = watcher.watch(store.peer_id()).await.unwrap();

        assert_eq!(seen, published);
        assert_eq!(seen.len(), 2);
        assert!(seen.ended);
    }
}
