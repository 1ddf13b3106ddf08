//! Host configuration, read from `troupe.toml`.
//!
//! Every key is optional; a missing file, an unreadable file, or a parse
//! failure all fall back to defaults with a log line, never an error.
//! The sections convert into the per-subsystem config structs so those
//! crates stay ignorant of the file format.

use crate::catalog::RegistryConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use troupe_character::ModificationConfig;
use troupe_forge::ForgeConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HostConfig {
    pub modification: ModificationSection,
    pub registry: RegistrySection,
    pub forge: ForgeSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModificationSection {
    pub max_per_window: usize,
    pub window_secs: u64,
    pub max_snapshots: usize,
    pub focus_areas: Option<Vec<String>>,
}

impl Default for ModificationSection {
    fn default() -> Self {
        Self {
            max_per_window: 5,
            window_secs: 3600,
            max_snapshots: 50,
            focus_areas: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegistrySection {
    pub index_url: String,
    pub cache_ttl_secs: u64,
    pub install_root: PathBuf,
    pub package_tool: String,
    pub git_tool: String,
}

impl Default for RegistrySection {
    fn default() -> Self {
        let defaults = RegistryConfig::default();
        Self {
            index_url: defaults.index_url,
            cache_ttl_secs: defaults.cache_ttl.as_secs(),
            install_root: defaults.install_root,
            package_tool: defaults.package_tool,
            git_tool: defaults.git_tool,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ForgeSection {
    pub max_concurrent_jobs: usize,
    pub max_jobs_per_hour: usize,
    pub job_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub retention_days: u64,
    pub workspace_root: PathBuf,
    pub run_lint: bool,
    pub run_tests: bool,
}

impl Default for ForgeSection {
    fn default() -> Self {
        let defaults = ForgeConfig::default();
        Self {
            max_concurrent_jobs: defaults.max_concurrent_jobs,
            max_jobs_per_hour: defaults.max_jobs_per_hour,
            job_timeout_secs: defaults.job_timeout.as_secs(),
            command_timeout_secs: defaults.command_timeout.as_secs(),
            max_output_bytes: defaults.max_output_bytes,
            retention_days: defaults.retention.as_secs() / 86_400,
            workspace_root: defaults.workspace_root,
            run_lint: defaults.run_lint,
            run_tests: defaults.run_tests,
        }
    }
}

impl HostConfig {
    /// Loads `troupe.toml` from the working directory.
    pub fn load() -> Self {
        Self::load_from(Path::new("troupe.toml"))
    }

    /// Loads a config file from an explicit path, falling back to
    /// defaults on any failure.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "no host config file, using defaults");
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<HostConfig>(&text) {
                Ok(config) => {
                    info!(path = %path.display(), "host configuration loaded");
                    config
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unparseable host config, using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable host config, using defaults");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn modification(&self) -> ModificationConfig {
        ModificationConfig {
            max_per_window: self.modification.max_per_window,
            window: Duration::from_secs(self.modification.window_secs),
            max_snapshots: self.modification.max_snapshots,
            focus_areas: self.modification.focus_areas.clone(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            index_url: self.registry.index_url.clone(),
            cache_ttl: Duration::from_secs(self.registry.cache_ttl_secs),
            install_root: self.registry.install_root.clone(),
            package_tool: self.registry.package_tool.clone(),
            git_tool: self.registry.git_tool.clone(),
        }
    }

    #[must_use]
    pub fn forge(&self) -> ForgeConfig {
        ForgeConfig {
            max_concurrent_jobs: self.forge.max_concurrent_jobs,
            max_jobs_per_hour: self.forge.max_jobs_per_hour,
            job_timeout: Duration::from_secs(self.forge.job_timeout_secs),
            command_timeout: Duration::from_secs(self.forge.command_timeout_secs),
            max_output_bytes: self.forge.max_output_bytes,
            retention: Duration::from_secs(self.forge.retention_days * 86_400),
            workspace_root: self.forge.workspace_root.clone(),
            run_lint: self.forge.run_lint,
            run_tests: self.forge.run_tests,
            ..ForgeConfig::default()
        }
    }
}

// ================================================================
// Tests
// ================================================================
