//! Plugin host runtime for Troupe.
//!
//! Owns the live component tables (actions, providers, evaluators,
//! services), drives plugin lifecycle through the
//! ready/building/loaded/unloaded/error state machine, and installs
//! plugins from the remote registry index.
//!
//! Components registered here are shared handles; removal is by
//! `Arc` identity, so two plugins exporting the same component name
//! never tear each other down.

mod catalog;
mod config;
mod error;
mod host;
mod manager;
mod registry;

pub use catalog::{
    CatalogClient, CatalogEntry, InstallStatus, InstalledPluginLoader, PluginInfo,
    RegistryConfig, INSTALLS_KEY,
};
pub use config::{ForgeSection, HostConfig, ModificationSection, RegistrySection};
pub use error::{InstallError, PluginError, PluginResult};
pub use host::HostRuntime;
pub use manager::LifecycleManager;
pub use registry::{ComponentCounts, LiveComponents, PluginPatch, PluginStatus, PluginUnit};
