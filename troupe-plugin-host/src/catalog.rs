//! Registry installation client.
//!
//! Resolves plugin names against a remote JSON catalog, fetches plugins
//! through a package-manager or git transport, and records what got
//! installed. The catalog is best-effort: a fetch failure degrades to
//! "nothing installable" instead of erroring, so a dead registry can
//! never take the host down with it.

use crate::error::InstallError;
use crate::manager::LifecycleManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};
use troupe_env::EnvMirror;
use troupe_plugin_sdk::{EnvVarRequirement, Plugin, PluginManifest};
use troupe_storage::{get_json, set_json, CacheStore};
use troupe_types::PluginId;

/// Cache key for the persisted install records.
pub const INSTALLS_KEY: &str = "plugin-installs";

const STDERR_CAP: usize = 2048;

/// Where and how the client talks to the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub index_url: String,
    /// How long a fetched catalog stays fresh.
    pub cache_ttl: Duration,
    /// Directory plugins are installed under.
    pub install_root: PathBuf,
    /// Package-manager transport binary.
    pub package_tool: String,
    /// Source-control transport binary.
    pub git_tool: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            index_url: "https://registry.troupe.dev/index.json".to_string(),
            cache_ttl: Duration::from_secs(300),
            install_root: PathBuf::from("plugins"),
            package_tool: "npm".to_string(),
            git_tool: "git".to_string(),
        }
    }
}

/// One catalog row: how a plugin can be fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub description: String,
    /// Source-control transport coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Package-manager transport coordinates; preferred over the
    /// repository when both are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Whether an installed plugin is ready to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Installed,
    /// Required environment variables were unset at install time.
    NeedsConfiguration,
}

/// Persisted record of one installed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub status: InstallStatus,
    #[serde(default)]
    pub required_env_vars: Vec<EnvVarRequirement>,
    pub installed_at: DateTime<Utc>,
}

/// Materializes a plugin instance from an installed tree.
///
/// The client stays transport- and language-agnostic; the host decides
/// how an installed directory becomes a live [`Plugin`].
pub trait InstalledPluginLoader: Send + Sync {
    fn load(&self, info: &PluginInfo) -> Result<Arc<dyn Plugin>, InstallError>;
}

struct CachedCatalog {
    fetched_at: Instant,
    entries: HashMap<String, CatalogEntry>,
}

pub struct CatalogClient {
    config: RegistryConfig,
    http: reqwest::Client,
    cache: Arc<dyn CacheStore>,
    settings: EnvMirror,
    catalog: Mutex<Option<CachedCatalog>>,
}

impl CatalogClient {
    pub fn new(
        config: RegistryConfig,
        http: reqwest::Client,
        cache: Arc<dyn CacheStore>,
        settings: EnvMirror,
    ) -> Self {
        Self {
            config,
            http,
            cache,
            settings,
            catalog: Mutex::new(None),
        }
    }

    // ================================================================
    // Catalog
    // ================================================================

    /// Returns the registry catalog, fetching it when the cached copy has
    /// expired. Never errors: any fetch failure returns an empty catalog.
    pub async fn available_plugins(&self) -> HashMap<String, CatalogEntry> {
        let mut cached = self.catalog.lock().await;
        if let Some(catalog) = cached.as_ref() {
            if catalog.fetched_at.elapsed() < self.config.cache_ttl {
                return catalog.entries.clone();
            }
        }

        match self.fetch_catalog().await {
            Ok(entries) => {
                info!(url = %self.config.index_url, plugins = entries.len(), "registry catalog refreshed");
                *cached = Some(CachedCatalog {
                    fetched_at: Instant::now(),
                    entries: entries.clone(),
                });
                entries
            }
            Err(err) => {
                warn!(url = %self.config.index_url, error = %err, "registry catalog unavailable");
                HashMap::new()
            }
        }
    }

    async fn fetch_catalog(&self) -> reqwest::Result<HashMap<String, CatalogEntry>> {
        self.http
            .get(&self.config.index_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    // ================================================================
    // Installation
    // ================================================================

    /// Fetches a plugin through its transport and records the install.
    pub async fn install(&self, name: &str) -> Result<PluginInfo, InstallError> {
        let catalog = self.available_plugins().await;
        let entry = catalog
            .get(name)
            .ok_or_else(|| InstallError::NotFoundInRegistry(name.to_string()))?;

        tokio::fs::create_dir_all(&self.config.install_root).await?;
        let path = if let Some(package) = &entry.package {
            self.install_package(package, entry.version.as_deref())
                .await?
        } else if let Some(repository) = &entry.repository {
            self.clone_repository(name, repository).await?
        } else {
            return Err(InstallError::NoTransport(name.to_string()));
        };

        let manifest = self.read_manifest(name, &path).await;
        let version = manifest
            .as_ref()
            .map(|m| m.version.clone())
            .or_else(|| entry.version.clone())
            .unwrap_or_else(|| "latest".to_string());
        let required_env_vars = manifest.map(|m| m.required_env_vars).unwrap_or_default();

        let missing = self.unsatisfied(&required_env_vars);
        let status = if missing.is_empty() {
            InstallStatus::Installed
        } else {
            InstallStatus::NeedsConfiguration
        };
        let info = PluginInfo {
            name: name.to_string(),
            version,
            path,
            status,
            required_env_vars,
            installed_at: Utc::now(),
        };

        let mut records = self.installed().await;
        records.retain(|r| r.name != info.name);
        records.push(info.clone());
        if let Err(err) = set_json(self.cache.as_ref(), INSTALLS_KEY, &records).await {
            warn!(plugin = name, error = %err, "could not persist install record");
        }

        info!(plugin = name, status = ?info.status, path = %info.path.display(), "plugin installed");
        Ok(info)
    }

    async fn install_package(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<PathBuf, InstallError> {
        let coordinate = match version {
            Some(version) => format!("{package}@{version}"),
            None => package.to_string(),
        };
        let output = tokio::process::Command::new(&self.config.package_tool)
            .arg("add")
            .arg(&coordinate)
            .current_dir(&self.config.install_root)
            .output()
            .await?;
        if !output.status.success() {
            return Err(transport_failure(&self.config.package_tool, &output));
        }
        Ok(self
            .config
            .install_root
            .join("node_modules")
            .join(package))
    }

    async fn clone_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<PathBuf, InstallError> {
        let dest = self.config.install_root.join(name);
        // A leftover tree from a previous install would make the clone
        // refuse to run.
        if tokio::fs::metadata(&dest).await.is_ok() {
            tokio::fs::remove_dir_all(&dest).await?;
        }
        let output = tokio::process::Command::new(&self.config.git_tool)
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(repository)
            .arg(&dest)
            .output()
            .await?;
        if !output.status.success() {
            return Err(transport_failure(&self.config.git_tool, &output));
        }
        Ok(dest)
    }

    async fn read_manifest(&self, name: &str, path: &Path) -> Option<PluginManifest> {
        let manifest_path = path.join("plugin.toml");
        match tokio::fs::read_to_string(&manifest_path).await {
            Ok(text) => match PluginManifest::from_toml_str(&text) {
                Ok(manifest) => Some(manifest),
                Err(err) => {
                    warn!(plugin = name, error = %err, "unreadable plugin manifest, assuming no requirements");
                    None
                }
            },
            Err(_) => {
                warn!(plugin = name, "installed plugin has no manifest, assuming no requirements");
                None
            }
        }
    }

    // ================================================================
    // Install records
    // ================================================================

    pub async fn installed(&self) -> Vec<PluginInfo> {
        match get_json::<Vec<PluginInfo>>(self.cache.as_ref(), INSTALLS_KEY).await {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "could not read install records");
                Vec::new()
            }
        }
    }

    pub async fn find_installed(&self, name: &str) -> Option<PluginInfo> {
        self.installed().await.into_iter().find(|r| r.name == name)
    }

    /// Materializes an installed plugin and hands it to the lifecycle
    /// manager. Requirements are re-checked against the settings mirror
    /// at call time, so a plugin installed as `NeedsConfiguration` loads
    /// once its variables are set.
    pub async fn load_installed(
        &self,
        name: &str,
        loader: &dyn InstalledPluginLoader,
        lifecycle: &LifecycleManager,
    ) -> Result<PluginId, InstallError> {
        let info = self
            .find_installed(name)
            .await
            .ok_or_else(|| InstallError::NotInstalled(name.to_string()))?;

        let missing = self.unsatisfied(&info.required_env_vars);
        if !missing.is_empty() {
            return Err(InstallError::NeedsConfiguration { missing });
        }

        let id = match lifecycle.plugin_by_name(&info.name).await {
            Some(unit) => unit.id,
            None => {
                let plugin = loader.load(&info)?;
                lifecycle.register_plugin(plugin).await?
            }
        };
        lifecycle.load_plugin(id, false).await?;
        Ok(id)
    }

    /// Required variables with no non-empty value in the settings mirror.
    fn unsatisfied(&self, requirements: &[EnvVarRequirement]) -> Vec<String> {
        let Ok(settings) = self.settings.read() else {
            return Vec::new();
        };
        requirements
            .iter()
            .filter(|req| req.required)
            .filter(|req| !settings.get(&req.name).is_some_and(|v| !v.trim().is_empty()))
            .map(|req| req.name.clone())
            .collect()
    }
}

fn transport_failure(tool: &str, output: &std::process::Output) -> InstallError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut detail = stderr.trim().to_string();
    if detail.len() > STDERR_CAP {
        let mut end = STDERR_CAP;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        detail.truncate(end);
        detail.push_str(" [truncated]");
    }
    InstallError::InstallFailed(format!("{tool} failed ({}): {detail}", output.status))
}

// ================================================================
// Tests
// ================================================================
