//! Core type definitions for Troupe.
//!
//! This crate defines the fundamental, plugin-agnostic types used throughout
//! the runtime:
//! - Agent, plugin, job, modification, snapshot and world identifiers (UUID v7)
//! - Host events emitted at every observable state change
//! - The `EventSink` seam that decouples emitters from consumers
//!
//! Domain-specific types (the character document, plugin manifests, job
//! records) belong in their respective crates, not here.

mod event;
mod ids;

pub use event::{EventSink, HostEvent, MemorySink, NullSink};
pub use ids::{AgentId, JobId, ModificationId, PluginId, SnapshotId, WorldId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
