//! Persistence layer for Troupe.
//!
//! Defines the async storage traits the runtime depends on and an
//! in-memory implementation for tests and ephemeral hosts:
//!
//! - [`CacheStore`]: typed JSON key-value storage (modification history,
//!   install records)
//! - [`AgentStore`]: the durable home of each agent's character document
//! - [`WorldStore`]: long-lived per-agent context records
//! - [`MemoryStore`]: one struct implementing all three over `RwLock` maps,
//!   with fault-injection switches for failure-path tests
//!
//! Production hosts plug their own backends in behind the same traits;
//! everything above this crate holds trait-object handles and never
//! names a concrete backend.

mod error;
mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use traits::{AgentStore, CacheStore, WorldStore};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Reads a cache value and deserializes it into `T`.
pub async fn get_json<T>(cache: &dyn CacheStore, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match cache.get_value(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serializes `value` and writes it to the cache.
pub async fn set_json<T>(cache: &dyn CacheStore, key: &str, value: &T) -> StorageResult<()>
where
    T: Serialize + Sync,
{
    cache.set_value(key, serde_json::to_value(value)?).await
}
