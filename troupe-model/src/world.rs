use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use troupe_types::{AgentId, WorldId};

/// The long-lived per-agent context record.
///
/// Worlds outlive processes; runtime state that must survive a restart
/// (declared environment variable requirements, per-agent bookkeeping)
/// is filed under `metadata` keyed by a stable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub id: WorldId,
    pub agent_id: AgentId,
    pub name: String,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl World {
    /// Creates an empty world for an agent.
    #[must_use]
    pub fn new(agent_id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id: WorldId::new(),
            agent_id,
            name: name.into(),
            metadata: Map::new(),
        }
    }

    /// Reads a metadata section, if present.
    #[must_use]
    pub fn metadata_section(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Replaces a metadata section.
    pub fn set_metadata_section(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}
