//! Broadcast state management
//!
//! Defines the broadcaster's lifecycle states.

use serde::{Deserialize, Serialize};

/// Current state of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastState {
    /// Not started yet
    #[default]
    Idle,
    /// Capturing segments; uploads run alongside
    Capturing,
    /// Draining uploads and running the final publication
    Finalizing,
    /// Final manifest published with `ended = true`
    Ended,
    /// Aborted by a fatal error
    Failed,
}

impl BroadcastState {
    /// Whether the broadcast has stopped for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}
