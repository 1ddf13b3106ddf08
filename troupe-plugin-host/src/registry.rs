//! Plugin unit records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use troupe_plugin_sdk::{Action, Evaluator, Plugin, Provider, Service};
use troupe_types::PluginId;

/// Lifecycle state of one plugin unit.
///
/// `Building` is set externally (the forge marks a unit building while it
/// regenerates code) and blocks unforced loads, like `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Ready,
    Building,
    Loaded,
    Unloaded,
    Error,
}

impl PluginStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PluginStatus::Ready => "ready",
            PluginStatus::Building => "building",
            PluginStatus::Loaded => "loaded",
            PluginStatus::Unloaded => "unloaded",
            PluginStatus::Error => "error",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The component handles a loaded unit has live on the host.
///
/// Removal on unload goes through these exact `Arc`s, so a unit can only
/// ever take down what it put up.
#[derive(Clone, Default)]
pub struct LiveComponents {
    pub actions: Vec<Arc<dyn Action>>,
    pub providers: Vec<Arc<dyn Provider>>,
    pub evaluators: Vec<Arc<dyn Evaluator>>,
    pub services: Vec<Arc<dyn Service>>,
}

impl LiveComponents {
    #[must_use]
    pub fn counts(&self) -> ComponentCounts {
        ComponentCounts {
            actions: self.actions.len(),
            providers: self.providers.len(),
            evaluators: self.evaluators.len(),
            services: self.services.len(),
        }
    }
}

/// How many components of each kind a unit contributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCounts {
    pub actions: usize,
    pub providers: usize,
    pub evaluators: usize,
    pub services: usize,
}

/// One registered plugin.
///
/// Units are never physically deleted; they only transition status. The
/// instance survives an unload so a later load can revive it.
#[derive(Clone)]
pub struct PluginUnit {
    pub id: PluginId,
    pub name: String,
    pub version: String,
    pub status: PluginStatus,
    pub components: LiveComponents,
    /// Required variables still unsatisfied at the last check.
    pub missing_env_vars: Vec<String>,
    /// Last failure message, if any.
    pub error: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub unloaded_at: Option<DateTime<Utc>>,
    /// Present in the host process at construction time; never unloadable.
    pub original: bool,
    pub(crate) instance: Option<Arc<dyn Plugin>>,
}

impl PluginUnit {
    pub(crate) fn new(instance: Arc<dyn Plugin>, original: bool) -> Self {
        let manifest = instance.manifest();
        Self {
            id: PluginId::new(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            status: PluginStatus::Ready,
            components: LiveComponents::default(),
            missing_env_vars: Vec::new(),
            error: None,
            registered_at: Utc::now(),
            loaded_at: None,
            unloaded_at: None,
            original,
            instance: Some(instance),
        }
    }

    #[must_use]
    pub fn component_counts(&self) -> ComponentCounts {
        self.components.counts()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.status == PluginStatus::Loaded
    }
}

impl fmt::Debug for PluginUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("status", &self.status)
            .field("components", &self.components.counts())
            .field("missing_env_vars", &self.missing_env_vars)
            .field("error", &self.error)
            .field("original", &self.original)
            .finish_non_exhaustive()
    }
}

/// Partial update for a unit's bookkeeping fields. Unset fields keep
/// their value.
#[derive(Debug, Clone, Default)]
pub struct PluginPatch {
    pub status: Option<PluginStatus>,
    pub error: Option<String>,
    pub missing_env_vars: Option<Vec<String>>,
}

// ================================================================
// Tests
// ================================================================
