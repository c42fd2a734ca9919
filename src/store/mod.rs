//! Content-addressed storage backends
//!
//! The stream engine only talks to storage through the [`ContentStore`]
//! trait:
//! - `IpfsStore` speaks to a local IPFS daemon (RPC API + gateway)
//! - `MemoryStore` keeps everything in process, for loopback runs and tests

pub mod ipfs;
pub mod memory;

pub use ipfs::IpfsStore;
pub use memory::MemoryStore;

use crate::utils::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Key that publishes under the store's own identity
pub const SELF_KEY: &str = "self";

/// Opaque identifier returned by the store for uploaded bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of the local store node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Peer id; names published under [`SELF_KEY`] resolve through it
    pub id: String,

    /// Agent/version string reported by the node, if any
    pub agent: Option<String>,
}

/// Storage operations the stream engine relies on.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Report the local node identity.
    ///
    /// Fails with `AppError::Identity` when the node is unreachable.
    async fn identify(&self) -> AppResult<PeerIdentity>;

    /// Upload the file at `path`, returning its content identifier.
    async fn upload(&self, path: &Path) -> AppResult<ContentId>;

    /// Bind the name owned by `key` to `content`.
    async fn publish(&self, key: &str, content: &ContentId) -> AppResult<()>;

    /// Resolve `name` and write the bytes it points at to `dest`.
    ///
    /// Fails with `AppError::Resolution` if the name cannot be resolved or
    /// fetched.
    async fn download(&self, name: &str, dest: &Path) -> AppResult<()>;
}

#[async_trait]
impl<T: ContentStore + ?Sized> ContentStore for std::sync::Arc<T> {
    async fn identify(&self) -> AppResult<PeerIdentity> {
        (**self).identify().await
    }

    async fn upload(&self, path: &Path) -> AppResult<ContentId> {
        (**self).upload(path).await
    }

    async fn publish(&self, key: &str, content: &ContentId) -> AppResult<()> {
        (**self).publish(key, content).await
    }

    async fn download(&self, name: &str, dest: &Path) -> AppResult<()> {
        (**self).download(name, dest).await
    }
}
