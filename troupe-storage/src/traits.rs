//! The async storage traits the runtime is written against.
//!
//! All traits are object-safe and take `&self`; implementations are shared
//! as `Arc<dyn CacheStore>`-style handles across tasks.

use crate::StorageResult;
use async_trait::async_trait;
use serde_json::Value;
use troupe_model::{Character, World};
use troupe_types::{AgentId, WorldId};

/// Typed JSON key-value storage.
///
/// Used for runtime state that must survive restarts but has no richer
/// schema: modification history, plugin install records, job bookkeeping.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_value(&self, key: &str) -> StorageResult<Option<Value>>;

    async fn set_value(&self, key: &str, value: Value) -> StorageResult<()>;

    async fn delete_value(&self, key: &str) -> StorageResult<()>;
}

/// The durable home of each agent's character document.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_character(&self, agent_id: AgentId) -> StorageResult<Option<Character>>;

    /// Persists the full document. Replaces any previous version.
    async fn update_character(&self, agent_id: AgentId, character: &Character)
    -> StorageResult<()>;
}

/// Long-lived per-agent context records.
#[async_trait]
pub trait WorldStore: Send + Sync {
    async fn get_world(&self, world_id: WorldId) -> StorageResult<Option<World>>;

    /// Finds the world owned by an agent, if one exists.
    async fn find_world_for_agent(&self, agent_id: AgentId) -> StorageResult<Option<World>>;

    /// Persists the full world record. Replaces any previous version.
    async fn update_world(&self, world: &World) -> StorageResult<()>;
}
