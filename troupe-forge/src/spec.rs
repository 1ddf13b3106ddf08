//! What a requested plugin should contain.

use crate::error::{ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use troupe_plugin_sdk::EnvVarRequirement;

/// Longest plugin name the creation service accepts.
pub const MAX_NAME_LEN: usize = 64;

/// A requested component, described for the code generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub description: String,
}

impl ComponentSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Everything a creation request says about the plugin to build.
///
/// The name doubles as the artifact directory name, so it is format
/// checked before any job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpecification {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub actions: Vec<ComponentSpec>,

    #[serde(default)]
    pub providers: Vec<ComponentSpec>,

    #[serde(default)]
    pub evaluators: Vec<ComponentSpec>,

    #[serde(default)]
    pub services: Vec<ComponentSpec>,

    /// Package dependencies, name to version requirement.
    #[serde(default)]
    pub dependencies: HashMap<String, String>,

    /// Environment variables the generated plugin will declare.
    #[serde(default)]
    pub env_vars: Vec<EnvVarRequirement>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl PluginSpecification {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: default_version(),
            actions: Vec::new(),
            providers: Vec::new(),
            evaluators: Vec::new(),
            services: Vec::new(),
            dependencies: HashMap::new(),
            env_vars: Vec::new(),
        }
    }
}

/// Checks that a plugin name is safe to use as a directory name.
///
/// Rejections are ordered from the coarsest check to the finest so the
/// returned reason names the first thing wrong with the input.
pub fn validate_name(name: &str) -> ForgeResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ForgeError::InvalidName(format!(
            "name must be 1..={MAX_NAME_LEN} characters"
        )));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ForgeError::InvalidName(
            "name must not contain path separators".to_string(),
        ));
    }
    if name.contains("..") {
        return Err(ForgeError::InvalidName(
            "name must not contain traversal sequences".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(ForgeError::InvalidName(
            "name may only contain lowercase letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

// ================================================================
// Tests
// ================================================================
