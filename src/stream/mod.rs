//! Stream engine
//!
//! The broadcaster captures, uploads and publishes; the watcher polls and
//! mirrors. The manifest is the contract between the two.

pub mod broadcaster;
pub mod guard;
pub mod manifest;
pub mod responder;
pub mod state;
pub mod watcher;

pub use broadcaster::{BroadcastOptions, Broadcaster};
pub use guard::SyncGuard;
pub use manifest::Manifest;
pub use state::BroadcastState;
pub use watcher::{PollOutcome, WatchOptions, Watcher};
