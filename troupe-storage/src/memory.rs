//! In-memory store for tests and ephemeral hosts.

use crate::{AgentStore, CacheStore, StorageError, StorageResult, WorldStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use troupe_model::{Character, World};
use troupe_types::{AgentId, WorldId};

/// One struct implementing every storage trait over `RwLock` maps.
///
/// Values are cloned in and out; no references escape the locks. The
/// `fail_*` switches make the next update on that surface return a
/// backend error, for exercising failure paths in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cache: RwLock<HashMap<String, Value>>,
    characters: RwLock<HashMap<AgentId, Character>>,
    worlds: RwLock<HashMap<WorldId, World>>,
    fail_character_updates: AtomicBool,
    fail_world_updates: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, `update_character` fails with a backend error.
    pub fn fail_character_updates(&self, fail: bool) {
        self.fail_character_updates.store(fail, Ordering::SeqCst);
    }

    /// When set, `update_world` fails with a backend error.
    pub fn fail_world_updates(&self, fail: bool) {
        self.fail_world_updates.store(fail, Ordering::SeqCst);
    }

    /// Seeds a character without going through the trait surface.
    pub async fn seed_character(&self, agent_id: AgentId, character: Character) {
        self.characters.write().await.insert(agent_id, character);
    }

    /// Seeds a world without going through the trait surface.
    pub async fn seed_world(&self, world: World) {
        self.worlds.write().await.insert(world.id, world);
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_value(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: Value) -> StorageResult<()> {
        self.cache.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> StorageResult<()> {
        self.cache.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn get_character(&self, agent_id: AgentId) -> StorageResult<Option<Character>> {
        Ok(self.characters.read().await.get(&agent_id).cloned())
    }

    async fn update_character(
        &self,
        agent_id: AgentId,
        character: &Character,
    ) -> StorageResult<()> {
        if self.fail_character_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected character update failure".into()));
        }
        self.characters
            .write()
            .await
            .insert(agent_id, character.clone());
        Ok(())
    }
}

#[async_trait]
impl WorldStore for MemoryStore {
    async fn get_world(&self, world_id: WorldId) -> StorageResult<Option<World>> {
        Ok(self.worlds.read().await.get(&world_id).cloned())
    }

    async fn find_world_for_agent(&self, agent_id: AgentId) -> StorageResult<Option<World>> {
        Ok(self
            .worlds
            .read()
            .await
            .values()
            .find(|w| w.agent_id == agent_id)
            .cloned())
    }

    async fn update_world(&self, world: &World) -> StorageResult<()> {
        if self.fail_world_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected world update failure".into()));
        }
        self.worlds.write().await.insert(world.id, world.clone());
        Ok(())
    }
}
