//! The live host runtime: component tables and shared handles.
//!
//! The runtime owns the four component tables plugins populate, the
//! service map, and the settings mirror. Registration replaces a
//! same-named component with a warning; removal matches on `Arc`
//! identity, never on name, so one unit can never take down another
//! unit's components.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::warn;
use troupe_env::EnvMirror;
use troupe_model::Character;
use troupe_plugin_sdk::{Action, Evaluator, HostApi, Provider, Service};
use troupe_storage::{AgentStore, CacheStore};
use troupe_types::{AgentId, EventSink, HostEvent};

pub struct HostRuntime {
    agent_id: AgentId,
    character: Arc<AsyncRwLock<Character>>,
    actions: RwLock<Vec<Arc<dyn Action>>>,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    evaluators: RwLock<Vec<Arc<dyn Evaluator>>>,
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
    /// Load order of active plugins.
    plugin_names: RwLock<Vec<String>>,
    settings: EnvMirror,
    agents: Arc<dyn AgentStore>,
    cache: Arc<dyn CacheStore>,
    events: Arc<dyn EventSink>,
}

impl HostRuntime {
    pub fn new(
        agent_id: AgentId,
        character: Arc<AsyncRwLock<Character>>,
        settings: EnvMirror,
        agents: Arc<dyn AgentStore>,
        cache: Arc<dyn CacheStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            agent_id,
            character,
            actions: RwLock::new(Vec::new()),
            providers: RwLock::new(Vec::new()),
            evaluators: RwLock::new(Vec::new()),
            services: RwLock::new(HashMap::new()),
            plugin_names: RwLock::new(Vec::new()),
            settings,
            agents,
            cache,
            events,
        }
    }

    // ================================================================
    // Component registration
    // ================================================================

    pub fn register_action(&self, action: Arc<dyn Action>) {
        if let Ok(mut actions) = self.actions.write() {
            let name = action.definition().name.clone();
            if let Some(slot) = actions.iter_mut().find(|a| a.definition().name == name) {
                warn!(action = %name, "replacing action with duplicate name");
                *slot = action;
            } else {
                actions.push(action);
            }
        }
    }

    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        if let Ok(mut providers) = self.providers.write() {
            let name = provider.definition().name.clone();
            if let Some(slot) = providers.iter_mut().find(|p| p.definition().name == name) {
                warn!(provider = %name, "replacing provider with duplicate name");
                *slot = provider;
            } else {
                providers.push(provider);
            }
        }
    }

    pub fn register_evaluator(&self, evaluator: Arc<dyn Evaluator>) {
        if let Ok(mut evaluators) = self.evaluators.write() {
            let name = evaluator.definition().name.clone();
            if let Some(slot) = evaluators.iter_mut().find(|e| e.definition().name == name) {
                warn!(evaluator = %name, "replacing evaluator with duplicate name");
                *slot = evaluator;
            } else {
                evaluators.push(evaluator);
            }
        }
    }

    pub fn register_service(&self, service: Arc<dyn Service>) {
        if let Ok(mut services) = self.services.write() {
            let key = service.service_type().to_string();
            if services.insert(key.clone(), service).is_some() {
                warn!(service = %key, "replacing service with duplicate type");
            }
        }
    }

    // ================================================================
    // Identity-based removal
    // ================================================================

    pub fn remove_action(&self, action: &Arc<dyn Action>) {
        if let Ok(mut actions) = self.actions.write() {
            actions.retain(|a| !Arc::ptr_eq(a, action));
        }
    }

    pub fn remove_provider(&self, provider: &Arc<dyn Provider>) {
        if let Ok(mut providers) = self.providers.write() {
            providers.retain(|p| !Arc::ptr_eq(p, provider));
        }
    }

    pub fn remove_evaluator(&self, evaluator: &Arc<dyn Evaluator>) {
        if let Ok(mut evaluators) = self.evaluators.write() {
            evaluators.retain(|e| !Arc::ptr_eq(e, evaluator));
        }
    }

    /// Removes the service only while this exact handle still holds its
    /// type key; a same-typed replacement from another unit survives.
    pub fn remove_service(&self, service: &Arc<dyn Service>) {
        if let Ok(mut services) = self.services.write() {
            let key = service.service_type();
            if services.get(key).is_some_and(|s| Arc::ptr_eq(s, service)) {
                services.remove(key);
            }
        }
    }

    // ================================================================
    // Lookup
    // ================================================================

    #[must_use]
    pub fn actions(&self) -> Vec<Arc<dyn Action>> {
        self.actions.read().map(|a| a.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.read().map(|p| p.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn evaluators(&self) -> Vec<Arc<dyn Evaluator>> {
        self.evaluators.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// Looks up a service by its type key.
    #[must_use]
    pub fn service(&self, service_type: &str) -> Option<Arc<dyn Service>> {
        self.services
            .read()
            .ok()
            .and_then(|s| s.get(service_type).cloned())
    }

    #[must_use]
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugin_names
            .read()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub(crate) fn add_plugin_name(&self, name: &str) {
        if let Ok(mut names) = self.plugin_names.write() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }

    pub(crate) fn remove_plugin_name(&self, name: &str) {
        if let Ok(mut names) = self.plugin_names.write() {
            names.retain(|n| n != name);
        }
    }

    // ================================================================
    // Shared handles
    // ================================================================

    #[must_use]
    pub fn character(&self) -> Arc<AsyncRwLock<Character>> {
        self.character.clone()
    }

    #[must_use]
    pub fn settings(&self) -> EnvMirror {
        self.settings.clone()
    }

    #[must_use]
    pub fn agents(&self) -> Arc<dyn AgentStore> {
        self.agents.clone()
    }

    #[must_use]
    pub fn cache(&self) -> Arc<dyn CacheStore> {
        self.cache.clone()
    }

    #[must_use]
    pub fn events(&self) -> Arc<dyn EventSink> {
        self.events.clone()
    }

    pub fn emit(&self, event: HostEvent) {
        self.events.emit(event);
    }
}

impl HostApi for HostRuntime {
    /// Resolution order: character secrets, character settings, then the
    /// runtime settings mirror. Falls through to the mirror when the
    /// character lock is contended, since callers are synchronous.
    fn setting(&self, key: &str) -> Option<String> {
        if let Ok(character) = self.character.try_read() {
            if let Some(value) = character.secret(key) {
                return Some(value.to_string());
            }
        }
        self.settings
            .read()
            .ok()
            .and_then(|settings| settings.get(key).cloned())
    }

    fn agent_id(&self) -> AgentId {
        self.agent_id
    }
}

// ================================================================
// Tests
// ================================================================
