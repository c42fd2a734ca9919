//! In-process content store
//!
//! Objects are keyed by a 128-bit BLAKE3 hash of their bytes and names are a
//! plain map from name to content id. Publishing under [`SELF_KEY`] binds the
//! store's peer id, mirroring how IPNS names work for a node's own key.
//!
//! Failure switches let callers simulate an unhealthy backend.

use super::{ContentId, ContentStore, PeerIdentity, SELF_KEY};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

#[derive(Default)]
struct Inner {
    objects: HashMap<ContentId, Vec<u8>>,
    names: HashMap<String, ContentId>,
    uploads: usize,
    publishes: usize,
    fail_uploads_after: Option<usize>,
    fail_publishes: bool,
    offline: bool,
}

/// Content store living entirely in memory
pub struct MemoryStore {
    peer_id: String,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store identified as `peer_id`
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The name that `publish(SELF_KEY, ..)` binds
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Store bytes directly, bypassing the filesystem
    pub fn insert(&self, data: &[u8]) -> ContentId {
        let id = content_id_for(data);
        self.inner.lock().objects.insert(id.clone(), data.to_vec());
        id
    }

    /// Point `name` at `content` directly
    pub fn bind(&self, name: &str, content: &ContentId) {
        self.inner
            .lock()
            .names
            .insert(name.to_string(), content.clone());
    }

    /// Fetch stored bytes by id
    pub fn get(&self, content: &ContentId) -> Option<Vec<u8>> {
        self.inner.lock().objects.get(content).cloned()
    }

    /// Content id currently bound to `name`
    pub fn resolve(&self, name: &str) -> Option<ContentId> {
        self.inner.lock().names.get(name).cloned()
    }

    /// Number of successful uploads so far
    pub fn upload_count(&self) -> usize {
        self.inner.lock().uploads
    }

    /// Number of successful name publications so far
    pub fn publish_count(&self) -> usize {
        self.inner.lock().publishes
    }

    /// Make every upload after the first `n` successful ones fail
    pub fn fail_uploads_after(&self, n: usize) {
        self.inner.lock().fail_uploads_after = Some(n);
    }

    /// Make name publication fail (or succeed again)
    pub fn fail_publishes(&self, fail: bool) {
        self.inner.lock().fail_publishes = fail;
    }

    /// Simulate an unreachable node: identity and resolution both fail
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    fn name_for_key(&self, key: &str) -> String {
        if key == SELF_KEY {
            self.peer_id.clone()
        } else {
            key.to_string()
        }
    }
}

fn content_id_for(data: &[u8]) -> ContentId {
    let hash = blake3::hash(data);
    ContentId::new(hex::encode(&hash.as_bytes()[..16]))
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn identify(&self) -> AppResult<PeerIdentity> {
        if self.inner.lock().offline {
            return Err(AppError::Identity("memory store is offline".to_string()));
        }
        Ok(PeerIdentity {
            id: self.peer_id.clone(),
            agent: Some(format!("memory-store/{}", env!("CARGO_PKG_VERSION"))),
        })
    }

    async fn upload(&self, path: &Path) -> AppResult<ContentId> {
        {
            let inner = self.inner.lock();
            if let Some(limit) = inner.fail_uploads_after {
                if inner.uploads >= limit {
                    return Err(AppError::Upload(format!(
                        "refusing to store {:?}: upload limit {} reached",
                        path, limit
                    )));
                }
            }
        }

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Upload(format!("failed to read {:?}: {}", path, e)))?;
        let id = content_id_for(&data);

        let mut inner = self.inner.lock();
        inner.objects.insert(id.clone(), data);
        inner.uploads += 1;
        Ok(id)
    }

    async fn publish(&self, key: &str, content: &ContentId) -> AppResult<()> {
        let name = self.name_for_key(key);
        let mut inner = self.inner.lock();
        if inner.fail_publishes {
            return Err(AppError::Publish(format!("cannot publish {} to {}", content, name)));
        }
        if !inner.objects.contains_key(content) {
            return Err(AppError::Publish(format!("unknown content id {}", content)));
        }
        inner.names.insert(name, content.clone());
        inner.publishes += 1;
        Ok(())
    }

    async fn download(&self, name: &str, dest: &Path) -> AppResult<()> {
        let data = {
            let inner = self.inner.lock();
            if inner.offline {
                return Err(AppError::Resolution(format!("cannot resolve {}: offline", name)));
            }
            let id = inner
                .names
                .get(name)
                .ok_or_else(|| AppError::Resolution(format!("name {} is not published", name)))?;
            inner
                .objects
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::Resolution(format!("content {} for {} is gone", id, name)))?
        };

        tokio::fs::write(dest, data).await?;
        Ok(())
    }
}
