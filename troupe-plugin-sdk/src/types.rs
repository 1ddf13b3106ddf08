//! Plugin-facing data types: component definitions, manifests and
//! environment variable declarations.

use crate::{SdkError, SdkResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use troupe_types::AgentId;

/// Declares an action: something the agent can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,

    /// Alternative names the action answers to.
    #[serde(default)]
    pub similes: Vec<String>,
}

impl ActionDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            similes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_similes(mut self, similes: Vec<String>) -> Self {
        self.similes = similes;
        self
    }
}

/// Declares a provider: a context supplier consulted during composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub name: String,
    pub description: String,

    /// Dynamic providers are only consulted on request, never by default.
    #[serde(default)]
    pub dynamic: bool,
}

impl ProviderDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            dynamic: false,
        }
    }
}

/// Declares an evaluator: a post-interaction assessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorDefinition {
    pub name: String,
    pub description: String,

    /// Always-run evaluators skip the relevance check.
    #[serde(default)]
    pub always_run: bool,
}

impl EvaluatorDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            always_run: false,
        }
    }
}

/// What an action sees when it runs.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub agent_id: AgentId,
    /// The triggering message text.
    pub message: String,
    /// Accumulated state values from providers.
    pub values: Map<String, Value>,
}

/// What an action hands back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    pub text: Option<String>,
    pub values: Map<String, Value>,
}

/// What a provider sees when consulted.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    pub agent_id: AgentId,
    pub message: String,
}

/// What a provider contributes to composed state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPayload {
    pub text: String,
    pub values: Map<String, Value>,
}

/// What an evaluator sees after an interaction.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorContext {
    pub agent_id: AgentId,
    pub message: String,
    pub response: String,
}

/// A plugin's identity card.
///
/// Shipped alongside the plugin as `plugin.toml`; the installation client
/// reads it to learn what configuration the plugin needs before it can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Names of plugins that must be loaded first. Kept ahead of the
    /// env-var tables so TOML serialization stays well formed.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Environment variables the plugin declares.
    #[serde(default, rename = "env-vars")]
    pub required_env_vars: Vec<EnvVarRequirement>,
}

impl PluginManifest {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            required_env_vars: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_env_var(mut self, requirement: EnvVarRequirement) -> Self {
        self.required_env_vars.push(requirement);
        self
    }

    /// Parses a manifest from TOML text.
    pub fn from_toml_str(toml_text: &str) -> SdkResult<Self> {
        Ok(toml::from_str(toml_text)?)
    }

    /// Loads a manifest from a `plugin.toml` file.
    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path).map_err(SdkError::Io)?;
        Self::from_toml_str(&text)
    }

    /// Names of the required variables only.
    #[must_use]
    pub fn required_var_names(&self) -> Vec<String> {
        self.required_env_vars
            .iter()
            .filter(|r| r.required)
            .map(|r| r.name.clone())
            .collect()
    }
}

/// One environment variable a plugin declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVarRequirement {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type", default)]
    pub var_type: EnvVarType,

    /// Required variables gate plugin loading until satisfied.
    #[serde(default = "default_true")]
    pub required: bool,

    /// Whether the host may generate a value instead of asking for one.
    #[serde(default, rename = "can-generate")]
    pub can_generate: bool,

    /// Service provider hint used to pick a validation strategy
    /// (e.g. "openai").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

fn default_true() -> bool {
    true
}

impl EnvVarRequirement {
    #[must_use]
    pub fn new(name: impl Into<String>, var_type: EnvVarType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            var_type,
            required: true,
            can_generate: false,
            provider: None,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[must_use]
    pub fn generatable(mut self) -> Self {
        self.can_generate = true;
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Kinds of environment variables, driving validation and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EnvVarType {
    ApiKey,
    Secret,
    PrivateKey,
    PublicKey,
    Url,
    #[default]
    Config,
}

impl fmt::Display for EnvVarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvVarType::ApiKey => "api-key",
            EnvVarType::Secret => "secret",
            EnvVarType::PrivateKey => "private-key",
            EnvVarType::PublicKey => "public-key",
            EnvVarType::Url => "url",
            EnvVarType::Config => "config",
        };
        f.write_str(s)
    }
}
