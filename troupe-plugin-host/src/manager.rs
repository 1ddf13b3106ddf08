//! Central plugin lifecycle manager.
//!
//! Owns every registered [`PluginUnit`], drives the
//! ready/building/loaded/unloaded/error state machine, and mutates the
//! host's component tables on behalf of exactly one unit at a time.
//! Failure policy is asymmetric: a service that fails to start is skipped
//! and the load continues; a service that fails to stop aborts the whole
//! unload.

use crate::error::{PluginError, PluginResult};
use crate::host::HostRuntime;
use crate::registry::{LiveComponents, PluginPatch, PluginStatus, PluginUnit};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use troupe_plugin_sdk::{HostApi, Plugin, Service};
use troupe_types::{HostEvent, PluginId};

pub struct LifecycleManager {
    host: Arc<HostRuntime>,
    /// Registration order; units are never removed, only transitioned.
    units: RwLock<Vec<PluginUnit>>,
}

impl LifecycleManager {
    pub fn new(host: Arc<HostRuntime>) -> Self {
        Self {
            host,
            units: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn host(&self) -> &Arc<HostRuntime> {
        &self.host
    }

    // ================================================================
    // Registration
    // ================================================================

    /// Records a unit without touching the component tables. The unit
    /// starts `Ready` and keeps its instance for later loads.
    pub async fn register_plugin(&self, instance: Arc<dyn Plugin>) -> PluginResult<PluginId> {
        let mut units = self.units.write().await;
        let name = instance.manifest().name.clone();
        if units.iter().any(|u| u.name == name) {
            return Err(PluginError::DuplicateName(name));
        }

        let mut unit = PluginUnit::new(instance, false);
        unit.missing_env_vars = self.unsatisfied_requirements(&unit);
        let id = unit.id;
        info!(plugin_id = %id, plugin = %unit.name, "plugin registered");
        self.host.emit(HostEvent::PluginRegistered {
            plugin_id: id,
            name: unit.name.clone(),
        });
        units.push(unit);
        Ok(id)
    }

    /// Adopts a plugin that was part of the host at construction time.
    ///
    /// Its components go live immediately and the unit is marked
    /// `original`, which makes it permanently un-unloadable. Init and
    /// service start hooks are not run; the host booted these plugins
    /// itself.
    pub async fn adopt_original(&self, instance: Arc<dyn Plugin>) -> PluginResult<PluginId> {
        let mut units = self.units.write().await;
        let name = instance.manifest().name.clone();
        if units.iter().any(|u| u.name == name) {
            return Err(PluginError::DuplicateName(name));
        }

        let mut unit = PluginUnit::new(instance.clone(), true);
        let mut live = LiveComponents::default();
        for action in instance.actions() {
            self.host.register_action(action.clone());
            live.actions.push(action);
        }
        for provider in instance.providers() {
            self.host.register_provider(provider.clone());
            live.providers.push(provider);
        }
        for evaluator in instance.evaluators() {
            self.host.register_evaluator(evaluator.clone());
            live.evaluators.push(evaluator);
        }
        for service in instance.services() {
            self.host.register_service(service.clone());
            live.services.push(service);
        }
        unit.components = live;
        unit.status = PluginStatus::Loaded;
        unit.loaded_at = Some(Utc::now());
        self.host.add_plugin_name(&unit.name);

        let id = unit.id;
        info!(plugin_id = %id, plugin = %unit.name, "original plugin adopted");
        self.host.emit(HostEvent::PluginRegistered {
            plugin_id: id,
            name: unit.name.clone(),
        });
        self.host.emit(HostEvent::PluginLoaded {
            plugin_id: id,
            name: unit.name.clone(),
        });
        units.push(unit);
        Ok(id)
    }

    // ================================================================
    // Loading
    // ================================================================

    /// Takes a unit's components live.
    ///
    /// `force` retries units stuck in `Building` or `Error` and bypasses
    /// the configuration gate. Loading an already-loaded unit is a no-op
    /// either way.
    pub async fn load_plugin(&self, id: PluginId, force: bool) -> PluginResult<()> {
        let mut units = self.units.write().await;
        let unit = units
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(PluginError::NotFound(id))?;

        match unit.status {
            PluginStatus::Loaded => {
                debug!(plugin = %unit.name, "plugin already loaded");
                return Ok(());
            }
            PluginStatus::Ready | PluginStatus::Unloaded => {}
            _ if force => {}
            status => return Err(PluginError::NotReady { status }),
        }

        let instance = unit
            .instance
            .clone()
            .ok_or(PluginError::NoPluginInstance)?;

        let missing = self.unsatisfied_requirements(unit);
        unit.missing_env_vars = missing.clone();
        if !missing.is_empty() && !force {
            return Err(PluginError::NeedsConfiguration { missing });
        }

        let mut live = LiveComponents::default();
        for action in instance.actions() {
            self.host.register_action(action.clone());
            live.actions.push(action);
        }
        for provider in instance.providers() {
            self.host.register_provider(provider.clone());
            live.providers.push(provider);
        }
        for evaluator in instance.evaluators() {
            self.host.register_evaluator(evaluator.clone());
            live.evaluators.push(evaluator);
        }

        // Start failures are isolated: the service is skipped, the load
        // goes on.
        for service in instance.services() {
            match service.start(self.host.as_ref()).await {
                Ok(()) => {
                    self.host.register_service(service.clone());
                    live.services.push(service);
                }
                Err(err) => {
                    error!(
                        plugin = %unit.name,
                        service = service.service_type(),
                        error = %err,
                        "service failed to start, skipping"
                    );
                }
            }
        }

        if let Err(err) = instance.init(self.host.as_ref()).await {
            let message = err.to_string();
            self.rollback_components(&live).await;
            unit.status = PluginStatus::Error;
            unit.error = Some(message.clone());
            warn!(plugin = %unit.name, error = %message, "plugin init failed, components rolled back");
            self.host.emit(HostEvent::PluginErrored {
                plugin_id: id,
                error: message.clone(),
            });
            return Err(PluginError::InitFailed(message));
        }

        unit.components = live;
        unit.status = PluginStatus::Loaded;
        unit.loaded_at = Some(Utc::now());
        unit.error = None;
        self.host.add_plugin_name(&unit.name);
        info!(plugin_id = %id, plugin = %unit.name, "plugin loaded");
        self.host.emit(HostEvent::PluginLoaded {
            plugin_id: id,
            name: unit.name.clone(),
        });
        Ok(())
    }

    /// Best-effort teardown after a failed init. Services were already
    /// started, so they get a stop call before removal.
    async fn rollback_components(&self, live: &LiveComponents) {
        for action in &live.actions {
            self.host.remove_action(action);
        }
        for provider in &live.providers {
            self.host.remove_provider(provider);
        }
        for evaluator in &live.evaluators {
            self.host.remove_evaluator(evaluator);
        }
        for service in &live.services {
            if let Err(err) = service.stop().await {
                warn!(
                    service = service.service_type(),
                    error = %err,
                    "service failed to stop during rollback"
                );
            }
            self.host.remove_service(service);
        }
    }

    // ================================================================
    // Unloading
    // ================================================================

    /// Removes a unit's components from the host by identity.
    ///
    /// The first service stop failure aborts the unload and leaves the
    /// unit in `Error` with its remaining services registered, so a
    /// half-unloaded unit is visible rather than silent.
    pub async fn unload_plugin(&self, id: PluginId) -> PluginResult<()> {
        let mut units = self.units.write().await;
        let unit = units
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(PluginError::NotFound(id))?;

        if unit.original {
            return Err(PluginError::CannotUnloadOriginal);
        }
        if unit.status != PluginStatus::Loaded {
            info!(plugin = %unit.name, status = %unit.status, "plugin not loaded, nothing to unload");
            return Ok(());
        }
        if unit.instance.is_none() {
            return Err(PluginError::NoPluginInstance);
        }

        for action in &unit.components.actions {
            self.host.remove_action(action);
        }
        for provider in &unit.components.providers {
            self.host.remove_provider(provider);
        }
        for evaluator in &unit.components.evaluators {
            self.host.remove_evaluator(evaluator);
        }

        for service in unit.components.services.clone() {
            if let Err(err) = service.stop().await {
                let message = err.to_string();
                unit.status = PluginStatus::Error;
                unit.error = Some(message.clone());
                warn!(
                    plugin = %unit.name,
                    service = service.service_type(),
                    error = %message,
                    "service failed to stop, unload aborted"
                );
                self.host.emit(HostEvent::PluginErrored {
                    plugin_id: id,
                    error: message.clone(),
                });
                return Err(PluginError::ServiceStopFailed {
                    service: service.service_type().to_string(),
                    message,
                });
            }
            self.host.remove_service(&service);
        }

        unit.components = LiveComponents::default();
        unit.status = PluginStatus::Unloaded;
        unit.unloaded_at = Some(Utc::now());
        self.host.remove_plugin_name(&unit.name);
        info!(plugin_id = %id, plugin = %unit.name, "plugin unloaded");
        self.host.emit(HostEvent::PluginUnloaded {
            plugin_id: id,
            name: unit.name.clone(),
        });
        Ok(())
    }

    // ================================================================
    // Accessors
    // ================================================================

    pub async fn plugin(&self, id: PluginId) -> Option<PluginUnit> {
        self.units.read().await.iter().find(|u| u.id == id).cloned()
    }

    pub async fn plugin_by_name(&self, name: &str) -> Option<PluginUnit> {
        self.units
            .read()
            .await
            .iter()
            .find(|u| u.name == name)
            .cloned()
    }

    /// Snapshot of every unit in registration order.
    pub async fn plugins(&self) -> Vec<PluginUnit> {
        self.units.read().await.clone()
    }

    pub async fn loaded_plugins(&self) -> Vec<PluginUnit> {
        self.units
            .read()
            .await
            .iter()
            .filter(|u| u.is_loaded())
            .cloned()
            .collect()
    }

    /// Merges bookkeeping fields into a unit. External callers use this
    /// to park a unit in `Building` while its code is regenerated.
    pub async fn update_plugin_state(&self, id: PluginId, patch: PluginPatch) -> PluginResult<()> {
        let mut units = self.units.write().await;
        let unit = units
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(PluginError::NotFound(id))?;

        if let Some(status) = patch.status {
            unit.status = status;
        }
        if patch.error.is_some() {
            unit.error = patch.error;
        }
        if let Some(missing) = patch.missing_env_vars {
            unit.missing_env_vars = missing;
        }
        Ok(())
    }

    /// Required variables the host cannot currently resolve for this unit.
    fn unsatisfied_requirements(&self, unit: &PluginUnit) -> Vec<String> {
        let Some(instance) = &unit.instance else {
            return Vec::new();
        };
        instance
            .manifest()
            .required_env_vars
            .iter()
            .filter(|req| req.required)
            .filter(|req| {
                !self
                    .host
                    .setting(&req.name)
                    .is_some_and(|value| !value.trim().is_empty())
            })
            .map(|req| req.name.clone())
            .collect()
    }
}

// ================================================================
// Tests
// ================================================================
