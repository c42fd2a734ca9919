//! Broadcaster
//!
//! Drives the capture → upload → publish cycle:
//! - segments are captured one after another, each blocking for its duration
//! - the segment captured in the previous iteration is uploaded by a spawned
//!   task while the next one is being captured
//! - every finished upload appends its id to the manifest and asks the
//!   [`SyncGuard`] for a publication
//!
//! Manifest mutations from the loop and the upload tasks go through one lock
//! that is never held across an await.

use super::guard::SyncGuard;
use super::manifest::{Manifest, MANIFEST_FILE};
use super::state::BroadcastState;
use crate::capture::Recorder;
use crate::store::{ContentId, ContentStore};
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::{prepare_dir, write_atomic};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Upper bound of the wait before a segment upload starts
pub const STAGGER_CEILING: Duration = Duration::from_secs(10);

/// Settings for one broadcast
#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    /// Working directory for segments and the manifest; emptied on start
    pub data_dir: PathBuf,

    /// Target duration of every segment
    pub segment_duration: Duration,

    /// Store key the manifest is published under
    pub stream_key: String,
}

/// Delay before uploading a fresh segment: half a segment, at most 10s
pub fn stagger_delay(segment_duration: Duration) -> Duration {
    (segment_duration / 2).min(STAGGER_CEILING)
}

/// State shared between the capture loop and its upload tasks
struct Shared<S> {
    store: S,
    manifest: Mutex<Manifest>,
    guard: SyncGuard,
    manifest_path: PathBuf,
    stream_key: String,
}

impl<S: ContentStore> Shared<S> {
    /// Upload one segment, record it and request a publication
    async fn push_segment(self: Arc<Self>, sample: PathBuf, stagger: Duration) -> AppResult<()> {
        tracing::debug!("Preparing {:?} in {:?}", sample, stagger);
        tokio::time::sleep(stagger).await;

        tracing::info!("Uploading {:?}", sample);
        let id = self.store.upload(&sample).await?;
        tracing::info!("Added {}", id);

        let cursor = {
            let mut manifest = self.manifest.lock();
            manifest.append_segment(id);
            manifest.cursor
        };

        self.sync(cursor).await;
        Ok(())
    }

    /// Routine publication; failures are logged and absorbed
    async fn sync(&self, cursor: u64) {
        tracing::debug!("Synchronizing at cursor {}", cursor);
        match self.guard.try_publish(cursor, || self.publish_snapshot()).await {
            Some(Ok(id)) => tracing::info!("Synchronization is over for {}", id),
            Some(Err(e)) => tracing::warn!("Synchronization failed: {}", e),
            None => tracing::debug!("Aborted. Awaiting the previous synchronization to finish"),
        }
    }

    /// Persist the current manifest and point the stream name at it.
    ///
    /// Only ever runs inside the guard.
    async fn publish_snapshot(&self) -> AppResult<ContentId> {
        let bytes = {
            let mut manifest = self.manifest.lock();
            manifest.touch();
            manifest.to_bytes()?
        };

        write_atomic(&self.manifest_path, &bytes)?;
        let id = self.store.upload(&self.manifest_path).await?;
        self.store.publish(&self.stream_key, &id).await?;
        Ok(id)
    }
}

/// Captures segments and publishes the growing manifest
pub struct Broadcaster<R, S> {
    recorder: R,
    shared: Arc<Shared<S>>,
    data_dir: PathBuf,
    segment_duration: Duration,
    state: RwLock<BroadcastState>,
    cancel: CancellationToken,
}

impl<R, S> Broadcaster<R, S>
where
    R: Recorder,
    S: ContentStore + 'static,
{
    /// Create a broadcaster recording through `recorder` into `store`
    pub fn new(recorder: R, store: S, options: BroadcastOptions) -> Self {
        let manifest_path = options.data_dir.join(MANIFEST_FILE);
        Self {
            recorder,
            shared: Arc::new(Shared {
                store,
                manifest: Mutex::new(Manifest::new(options.segment_duration)),
                guard: SyncGuard::new(),
                manifest_path,
                stream_key: options.stream_key,
            }),
            data_dir: options.data_dir,
            segment_duration: options.segment_duration,
            state: RwLock::new(BroadcastState::Idle),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the loop at its next iteration boundary when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that ends the broadcast gracefully when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> BroadcastState {
        *self.state.read()
    }

    /// Snapshot of the manifest as it stands now
    pub fn manifest(&self) -> Manifest {
        self.shared.manifest.lock().clone()
    }

    /// Where the last published manifest is persisted
    pub fn manifest_path(&self) -> &Path {
        &self.shared.manifest_path
    }

    /// Run the broadcast until `sample_limit` segments were captured
    /// (0 = until cancelled), then publish the final manifest.
    pub async fn broadcast(&self, sample_limit: u32) -> AppResult<Manifest> {
        let current = self.state();
        if current != BroadcastState::Idle {
            return Err(AppError::InvalidState(format!(
                "broadcast already ran (state: {:?})",
                current
            )));
        }

        let result = self.run(sample_limit).await;
        match &result {
            Ok(manifest) => {
                *self.state.write() = BroadcastState::Ended;
                tracing::info!("Stream ended with {} parts", manifest.len());
            }
            Err(e) => {
                *self.state.write() = BroadcastState::Failed;
                tracing::error!("Broadcast aborted: {}", e);
            }
        }
        result
    }

    async fn run(&self, sample_limit: u32) -> AppResult<Manifest> {
        prepare_dir(&self.data_dir)?;

        let identity = self.shared.store.identify().await?;
        tracing::info!("Broadcasting with ID {}", identity.id);

        self.shared.manifest.lock().mark_started();
        *self.state.write() = BroadcastState::Capturing;

        let mut uploads = JoinSet::new();
        let mut pending_sample: Option<PathBuf> = None;
        let mut captured: u32 = 0;

        loop {
            reap_finished(&mut uploads)?;

            if sample_limit > 0 && captured >= sample_limit {
                tracing::info!("Captured {} samples, finishing", captured);
                break;
            }
            if self.cancel.is_cancelled() {
                tracing::info!("Broadcast cancelled after {} samples, finishing", captured);
                break;
            }

            if let Some(sample) = pending_sample.take() {
                self.launch_upload(&mut uploads, sample)?;
            }

            let cursor = self.shared.manifest.lock().cursor;
            let sample = self.data_dir.join(format!("sample_{}.mp4", cursor));
            tracing::info!("Recording... {:?}", sample);
            self.recorder.capture(&sample, self.segment_duration).await?;

            self.shared.manifest.lock().cursor += 1;
            pending_sample = Some(sample);
            captured += 1;
        }

        self.finalize(uploads, pending_sample).await
    }

    /// Spawn the upload of a captured segment
    fn launch_upload(&self, uploads: &mut JoinSet<AppResult<()>>, sample: PathBuf) -> AppResult<()> {
        if !sample.exists() {
            return Err(AppError::MissingSegment(sample));
        }

        let shared = Arc::clone(&self.shared);
        let stagger = stagger_delay(self.segment_duration);
        uploads.spawn(shared.push_segment(sample, stagger));
        Ok(())
    }

    /// Drain uploads and their publications, then publish `ended`
    async fn finalize(
        &self,
        mut uploads: JoinSet<AppResult<()>>,
        last_sample: Option<PathBuf>,
    ) -> AppResult<Manifest> {
        *self.state.write() = BroadcastState::Finalizing;

        if let Some(sample) = last_sample {
            self.launch_upload(&mut uploads, sample)?;
        }
        // Routine publications only run inside upload tasks, so once every
        // task has been joined the guard is idle.
        while let Some(joined) = uploads.join_next().await {
            upload_outcome(joined)?;
        }

        let cursor = {
            let mut manifest = self.shared.manifest.lock();
            manifest.mark_ended();
            manifest.cursor
        };

        if self.shared.guard.has_pending_work(cursor) {
            tracing::info!("Running the final synchronization...");
        } else {
            tracing::info!("Publishing the end of the stream...");
        }

        let id = self
            .shared
            .guard
            .try_publish(cursor, || self.shared.publish_snapshot())
            .await
            .ok_or_else(|| AppError::Publish("final synchronization was preempted".to_string()))?
            .map_err(|e| match e {
                AppError::Publish(_) => e,
                other => AppError::Publish(other.to_string()),
            })?;
        tracing::info!("Final manifest published as {}", id);

        Ok(self.manifest())
    }
}

/// Surface failures of upload tasks that already finished
fn reap_finished(uploads: &mut JoinSet<AppResult<()>>) -> AppResult<()> {
    while let Some(joined) = uploads.try_join_next() {
        upload_outcome(joined)?;
    }
    Ok(())
}

fn upload_outcome(joined: Result<AppResult<()>, JoinError>) -> AppResult<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(AppError::Upload(format!("upload task panicked: {}", e))),
    }
}
