//! Tracks declared environment variables across plugins for one agent.
//!
//! The authoritative copy of every variable's state lives in the agent's
//! world record so it survives restarts. Validated values are additionally
//! mirrored into a shared settings map the host hands to plugins; the
//! process environment itself is never written. Every mutation is
//! two-phase: the world record is persisted first, and only a successful
//! persist updates the mirror and emits events.

use crate::error::{EnvError, EnvResult};
use crate::validate::{Strategy, StrategyRegistry, ValidationOutcome};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use troupe_model::{Character, World};
use troupe_plugin_sdk::{EnvVarRequirement, EnvVarType, PluginManifest};
use troupe_storage::WorldStore;
use troupe_types::{AgentId, EventSink, HostEvent};

/// Shared map mirroring validated values into host settings.
///
/// Plugins read configuration through the host, and the host reads this
/// mirror synchronously, so it is a std lock rather than an async one.
pub type EnvMirror = Arc<std::sync::RwLock<HashMap<String, String>>>;

/// World metadata section holding `{ plugin -> { var -> state } }`.
pub const ENV_REQUIREMENTS_SECTION: &str = "envRequirements";

/// Lifecycle of one declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvVarStatus {
    #[default]
    Missing,
    Generating,
    Validating,
    Valid,
    Invalid,
}

impl EnvVarStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EnvVarStatus::Missing => "missing",
            EnvVarStatus::Generating => "generating",
            EnvVarStatus::Validating => "validating",
            EnvVarStatus::Valid => "valid",
            EnvVarStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for EnvVarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state of one declared variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarState {
    pub value: Option<String>,
    pub status: EnvVarStatus,
    #[serde(rename = "type")]
    pub var_type: EnvVarType,
    pub required: bool,
    pub can_generate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Generation and validation attempts so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
}

impl EnvVarState {
    fn from_requirement(req: &EnvVarRequirement) -> Self {
        Self {
            value: None,
            status: EnvVarStatus::Missing,
            var_type: req.var_type,
            required: req.required,
            can_generate: req.can_generate,
            provider: req.provider.clone(),
            description: req.description.clone(),
            attempts: 0,
            last_error: None,
            validated_at: None,
        }
    }
}

/// What happened during a manifest scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Manifests scanned.
    pub plugins: usize,
    /// Requirements seen for the first time.
    pub discovered: usize,
    /// Vars satisfied from the character's secret configuration.
    pub satisfied: usize,
    /// Required vars still not valid after the scan.
    pub missing: usize,
}

/// Partial update for one variable. Unset fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct EnvVarPatch {
    pub value: Option<String>,
    pub status: Option<EnvVarStatus>,
    pub last_error: Option<String>,
}

type Requirements = HashMap<String, HashMap<String, EnvVarState>>;

/// Environment variable manager for one agent.
pub struct EnvVarManager {
    agent_id: AgentId,
    character: Arc<RwLock<Character>>,
    worlds: Arc<dyn WorldStore>,
    mirror: EnvMirror,
    events: Arc<dyn EventSink>,
    registry: std::sync::RwLock<StrategyRegistry>,
    requirements: RwLock<Requirements>,
}

impl EnvVarManager {
    pub fn new(
        agent_id: AgentId,
        character: Arc<RwLock<Character>>,
        worlds: Arc<dyn WorldStore>,
        mirror: EnvMirror,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            agent_id,
            character,
            worlds,
            mirror,
            events,
            registry: std::sync::RwLock::new(StrategyRegistry::default()),
            requirements: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a validation strategy for a `(type, provider)` pair.
    pub fn register_strategy(
        &self,
        var_type: EnvVarType,
        provider: Option<&str>,
        strategy: Strategy,
    ) {
        if let Ok(mut registry) = self.registry.write() {
            registry.register(var_type, provider, strategy);
        }
    }

    /// Merges declared requirements from the given manifests into the
    /// tracked state, then sweeps the character's secret configuration for
    /// values satisfying still-missing variables.
    ///
    /// Rescans never clobber: an already-tracked variable keeps its value,
    /// status, and attempt count. Brand-new entries start `Missing`.
    pub async fn scan_requirements(
        &self,
        manifests: &[PluginManifest],
    ) -> EnvResult<ScanReport> {
        let mut world = self.load_world().await?;
        let mut tracked = self.requirements.write().await;
        let mut requirements = load_requirements(&world);

        let mut report = ScanReport {
            plugins: manifests.len(),
            ..Default::default()
        };
        for manifest in manifests {
            let plugin_vars = requirements.entry(manifest.name.clone()).or_default();
            for req in &manifest.required_env_vars {
                if !plugin_vars.contains_key(&req.name) {
                    plugin_vars.insert(req.name.clone(), EnvVarState::from_requirement(req));
                    report.discovered += 1;
                }
            }
        }

        // The character's secrets may already satisfy some of them.
        let mut satisfied: Vec<(String, String, String)> = Vec::new();
        {
            let character = self.character.read().await;
            for (plugin, vars) in &mut requirements {
                for (name, state) in vars.iter_mut() {
                    if state.status == EnvVarStatus::Valid {
                        continue;
                    }
                    if let Some(value) = character.secret(name) {
                        state.value = Some(value.to_string());
                        state.status = EnvVarStatus::Valid;
                        state.last_error = None;
                        state.validated_at = Some(Utc::now());
                        satisfied.push((plugin.clone(), name.clone(), value.to_string()));
                    }
                }
            }
        }
        report.satisfied = satisfied.len();
        report.missing = count_missing(&requirements);

        self.persist(&mut world, &requirements).await?;
        *tracked = requirements;
        drop(tracked);
        for (plugin, name, value) in satisfied {
            self.mirror_value(&name, &value);
            self.emit_update(&plugin, &name, EnvVarStatus::Valid);
        }

        info!(
            agent_id = %self.agent_id,
            plugins = report.plugins,
            discovered = report.discovered,
            satisfied = report.satisfied,
            missing = report.missing,
            "environment scan complete"
        );
        Ok(report)
    }

    /// Tracked variables for one plugin.
    pub async fn env_vars_for_plugin(
        &self,
        plugin: &str,
    ) -> Option<HashMap<String, EnvVarState>> {
        self.requirements.read().await.get(plugin).cloned()
    }

    /// Applies a patch to one variable.
    ///
    /// Two-phase: the world record is written first; only a successful
    /// persist mirrors the value and emits the update event. An unknown
    /// plugin or variable, or a missing world, drops the update with
    /// `Ok(false)`.
    pub async fn update_env_var(
        &self,
        plugin: &str,
        var: &str,
        patch: EnvVarPatch,
    ) -> EnvResult<bool> {
        let mut world = match self.load_world().await {
            Ok(world) => world,
            Err(EnvError::NoContext) => {
                warn!(plugin, var, "no world context, dropping env var update");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let mut tracked = self.requirements.write().await;
        let mut requirements = tracked.clone();
        let Some(state) = requirements
            .get_mut(plugin)
            .and_then(|vars| vars.get_mut(var))
        else {
            warn!(plugin, var, "unknown env var, dropping update");
            return Ok(false);
        };

        if let Some(value) = &patch.value {
            state.value = Some(value.clone());
        }
        if let Some(status) = patch.status {
            state.status = status;
            if status == EnvVarStatus::Valid {
                state.validated_at = Some(Utc::now());
            }
        }
        if patch.last_error.is_some() {
            state.last_error = patch.last_error.clone();
        }
        let status = state.status;

        self.persist(&mut world, &requirements).await?;
        *tracked = requirements;
        drop(tracked);
        if let Some(value) = &patch.value {
            self.mirror_value(var, value);
        }
        self.emit_update(plugin, var, status);
        debug!(plugin, var, status = %status, "env var updated");
        Ok(true)
    }

    /// Required variables not yet valid, as sorted `(plugin, var)` pairs.
    pub async fn missing_vars(&self) -> Vec<(String, String)> {
        let requirements = self.requirements.read().await;
        let mut missing: Vec<_> = requirements
            .iter()
            .flat_map(|(plugin, vars)| {
                vars.iter()
                    .filter(|(_, state)| state.required && state.status != EnvVarStatus::Valid)
                    .map(move |(name, _)| (plugin.clone(), name.clone()))
            })
            .collect();
        missing.sort();
        missing
    }

    pub async fn has_missing(&self) -> bool {
        !self.missing_vars().await.is_empty()
    }

    /// Not-yet-valid variables the manager may generate itself.
    pub async fn generatable_vars(&self) -> Vec<(String, String)> {
        let requirements = self.requirements.read().await;
        let mut vars: Vec<_> = requirements
            .iter()
            .flat_map(|(plugin, vars)| {
                vars.iter()
                    .filter(|(_, state)| {
                        state.can_generate && state.status != EnvVarStatus::Valid
                    })
                    .map(move |(name, _)| (plugin.clone(), name.clone()))
            })
            .collect();
        vars.sort();
        vars
    }

    /// Generates values for every generatable missing variable, validates
    /// them, persists, then mirrors the ones that came out valid. Returns
    /// how many became valid.
    pub async fn generate_missing(&self) -> EnvResult<usize> {
        let mut world = self.load_world().await?;
        let mut tracked = self.requirements.write().await;
        let mut requirements = tracked.clone();

        let mut mirrored = Vec::new();
        let mut updated = Vec::new();
        let mut newly_valid = 0usize;

        for (plugin, vars) in &mut requirements {
            for (name, state) in vars.iter_mut() {
                if state.status == EnvVarStatus::Valid || !state.can_generate {
                    continue;
                }
                let Some(value) = generate_value(state.var_type) else {
                    debug!(
                        plugin,
                        var = name,
                        var_type = ?state.var_type,
                        "variable type is not generatable"
                    );
                    continue;
                };
                state.attempts += 1;
                state.value = Some(value.clone());
                let outcome =
                    self.run_validation(state.var_type, state.provider.as_deref(), &value);
                if outcome.valid {
                    state.status = EnvVarStatus::Valid;
                    state.last_error = None;
                    state.validated_at = Some(Utc::now());
                    newly_valid += 1;
                    mirrored.push((name.clone(), value));
                } else {
                    state.status = EnvVarStatus::Invalid;
                    state.last_error = outcome.error;
                }
                updated.push((plugin.clone(), name.clone(), state.status));
            }
        }

        if updated.is_empty() {
            return Ok(0);
        }
        self.persist(&mut world, &requirements).await?;
        *tracked = requirements;
        drop(tracked);
        for (name, value) in mirrored {
            self.mirror_value(&name, &value);
        }
        for (plugin, name, status) in updated {
            self.emit_update(&plugin, &name, status);
        }
        info!(agent_id = %self.agent_id, generated = newly_valid, "generated environment variables");
        Ok(newly_valid)
    }

    /// Validates one variable's stored value and records the outcome.
    pub async fn validate_var(&self, plugin: &str, var: &str) -> EnvResult<ValidationOutcome> {
        let mut world = self.load_world().await?;
        let mut tracked = self.requirements.write().await;
        let mut requirements = tracked.clone();
        let Some(vars) = requirements.get_mut(plugin) else {
            return Err(EnvError::UnknownPlugin(plugin.to_string()));
        };
        let Some(state) = vars.get_mut(var) else {
            return Err(EnvError::UnknownVar {
                plugin: plugin.to_string(),
                var: var.to_string(),
            });
        };

        let value = state.value.clone().unwrap_or_default();
        let outcome = self.run_validation(state.var_type, state.provider.as_deref(), &value);
        state.attempts += 1;
        if outcome.valid {
            state.status = EnvVarStatus::Valid;
            state.last_error = None;
            state.validated_at = Some(Utc::now());
        } else {
            state.status = EnvVarStatus::Invalid;
            state.last_error = outcome.error.clone();
        }
        let status = state.status;

        self.persist(&mut world, &requirements).await?;
        *tracked = requirements;
        drop(tracked);
        if outcome.valid {
            self.mirror_value(var, &value);
        }
        self.emit_update(plugin, var, status);
        Ok(outcome)
    }

    fn run_validation(
        &self,
        var_type: EnvVarType,
        provider: Option<&str>,
        value: &str,
    ) -> ValidationOutcome {
        match self.registry.read() {
            Ok(registry) => registry.validate(var_type, provider, value),
            Err(_) => ValidationOutcome::failed("validation registry unavailable"),
        }
    }

    async fn load_world(&self) -> EnvResult<World> {
        match self.worlds.find_world_for_agent(self.agent_id).await {
            Ok(Some(world)) => Ok(world),
            Ok(None) => {
                warn!(agent_id = %self.agent_id, "no world record, cannot track environment variables");
                Err(EnvError::NoContext)
            }
            Err(err) => Err(EnvError::Persistence(err.to_string())),
        }
    }

    async fn persist(&self, world: &mut World, requirements: &Requirements) -> EnvResult<()> {
        let value = serde_json::to_value(requirements)
            .map_err(|err| EnvError::Persistence(err.to_string()))?;
        world.set_metadata_section(ENV_REQUIREMENTS_SECTION, value);
        self.worlds
            .update_world(world)
            .await
            .map_err(|err| EnvError::Persistence(err.to_string()))
    }

    fn mirror_value(&self, name: &str, value: &str) {
        if let Ok(mut mirror) = self.mirror.write() {
            mirror.insert(name.to_string(), value.to_string());
        }
    }

    fn emit_update(&self, plugin: &str, var: &str, status: EnvVarStatus) {
        self.events.emit(HostEvent::EnvVarUpdated {
            plugin_name: plugin.to_string(),
            var_name: var.to_string(),
            status: status.to_string(),
        });
    }
}

fn load_requirements(world: &World) -> Requirements {
    world
        .metadata_section(ENV_REQUIREMENTS_SECTION)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

fn count_missing(requirements: &Requirements) -> usize {
    requirements
        .values()
        .flat_map(|vars| vars.values())
        .filter(|state| state.required && state.status != EnvVarStatus::Valid)
        .count()
}

/// Produces a value for types whose format permits local generation.
fn generate_value(var_type: EnvVarType) -> Option<String> {
    match var_type {
        EnvVarType::Secret | EnvVarType::ApiKey | EnvVarType::PrivateKey => Some(random_hex(32)),
        EnvVarType::PublicKey | EnvVarType::Url | EnvVarType::Config => None,
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
