//! Host events emitted at every observable state change.
//!
//! Events are the runtime's audit surface: character mutations, plugin
//! lifecycle transitions, environment variable updates and creation-job
//! progress all flow through the same tagged enum. Consumers subscribe by
//! implementing [`EventSink`]; emitters hold an `Arc<dyn EventSink>` and
//! never know who is listening.

use crate::{AgentId, JobId, PluginId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// An observable moment in the life of the host.
///
/// Serializes to a stable tagged JSON shape (`{"op": ..., "data": ...}`)
/// usable in logs and persisted audit streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum HostEvent {
    /// The character document changed through an applied diff.
    CharacterUpdated {
        agent_id: AgentId,
        /// Document version after the apply.
        version: u64,
        /// Number of operations applied.
        applied: usize,
    },

    /// The character document was restored from a snapshot.
    CharacterRolledBack {
        agent_id: AgentId,
        /// Document version after the restore.
        version: u64,
    },

    /// A plugin was registered with the lifecycle manager.
    PluginRegistered { plugin_id: PluginId, name: String },

    /// A plugin's components went live on the host.
    PluginLoaded { plugin_id: PluginId, name: String },

    /// A plugin's components were removed from the host.
    PluginUnloaded { plugin_id: PluginId, name: String },

    /// A plugin transitioned to the error state.
    PluginErrored { plugin_id: PluginId, error: String },

    /// An environment variable changed value or status.
    EnvVarUpdated {
        plugin_name: String,
        var_name: String,
        /// New status, lowercase wire form (e.g. "valid", "invalid").
        status: String,
    },

    /// A creation job moved to a new status.
    JobStateChanged {
        job_id: JobId,
        /// New status, lowercase wire form (e.g. "running", "failed").
        status: String,
    },
}

impl HostEvent {
    /// Serializes the event to its tagged JSON form.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an event back from its tagged JSON form.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Receives host events as they happen.
///
/// Implementations must be cheap and non-blocking; emitters call `emit`
/// inline on their own task.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: HostEvent);
}

/// Buffers every emitted event in memory.
///
/// The default sink for tests and embedded hosts that poll for activity.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<HostEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Drains and returns the buffered events.
    pub fn take(&self) -> Vec<HostEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: HostEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Drops every event. For hosts that do not observe runtime activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: HostEvent) {}
}
