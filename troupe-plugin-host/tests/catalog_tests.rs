//! End-to-end tests for the registry installation client.
//!
//! The registry index is served by a throwaway TCP listener and the
//! package/git transports are stub shell scripts, so every path from
//! catalog fetch to loaded plugin runs without touching the network
//! or real tooling.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock as AsyncRwLock;
use troupe_env::EnvMirror;
use troupe_model::Character;
use troupe_plugin_host::{
    CatalogClient, HostRuntime, InstallError, InstallStatus, InstalledPluginLoader,
    LifecycleManager, PluginInfo, PluginStatus, RegistryConfig,
};
use troupe_plugin_sdk::{Plugin, PluginManifest};
use troupe_storage::MemoryStore;
use troupe_types::{AgentId, NullSink};

// ── Harness ───────────────────────────────────────────────────────

/// Serves one HTTP request with the given JSON body, then goes away.
async fn serve_index(body: String) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = vec![0u8; 4096];
        let mut read = 0;
        loop {
            match socket.read(&mut buf[read..]).await {
                Ok(0) => break,
                Ok(n) => {
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}/index.json")
}

fn client(config: RegistryConfig) -> (CatalogClient, Arc<MemoryStore>, EnvMirror) {
    let store = Arc::new(MemoryStore::new());
    let mirror: EnvMirror = Arc::default();
    let client = CatalogClient::new(
        config,
        reqwest::Client::new(),
        store.clone(),
        mirror.clone(),
    );
    (client, store, mirror)
}

fn lifecycle(mirror: &EnvMirror, store: &Arc<MemoryStore>) -> LifecycleManager {
    let host = Arc::new(HostRuntime::new(
        AgentId::new(),
        Arc::new(AsyncRwLock::new(Character::new("Ada"))),
        mirror.clone(),
        store.clone(),
        store.clone(),
        Arc::new(NullSink),
    ));
    LifecycleManager::new(host)
}

/// Writes an executable stub script and returns its path as a tool name.
fn stub_tool(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.display().to_string()
}

/// A fake package manager: `<tool> add <pkg>[@version]`, run in the
/// install root, drops a manifest where npm would put the package.
fn package_script(manifest: &str) -> String {
    format!(
        r#"#!/bin/sh
pkg="${{2%@*}}"
printf '%s' "$2" > coordinate.txt
mkdir -p "node_modules/$pkg"
cat > "node_modules/$pkg/plugin.toml" <<'MANIFEST'
{manifest}MANIFEST
"#
    )
}

/// A fake git: `<tool> clone --depth 1 <repo> <dest>`.
fn git_script(manifest: &str) -> String {
    format!(
        r#"#!/bin/sh
dest="$5"
mkdir -p "$dest"
cat > "$dest/plugin.toml" <<'MANIFEST'
{manifest}MANIFEST
"#
    )
}

const WEATHER_MANIFEST: &str = r#"name = "weather"
version = "2.1.0"
description = "Hourly forecasts"

[[env-vars]]
name = "WEATHER_UNITS"
description = "Display units"
type = "config"
required = false
"#;

const PAYMENTS_MANIFEST: &str = r#"name = "payments"
version = "0.3.0"
description = "Payment rails"

[[env-vars]]
name = "API_KEY"
description = "Provider API key"
type = "api-key"
"#;

const MEMO_MANIFEST: &str = r#"name = "memo"
version = "0.1.0"

[[env-vars]]
name = "MEMO_TOKEN"
description = "Sync token"
type = "secret"
"#;

struct InstalledPlugin {
    manifest: PluginManifest,
}

#[async_trait]
impl Plugin for InstalledPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }
}

/// Materializes a plugin straight from its install record.
struct StubLoader;

impl InstalledPluginLoader for StubLoader {
    fn load(&self, info: &PluginInfo) -> Result<Arc<dyn Plugin>, InstallError> {
        let mut manifest = PluginManifest::new(&info.name, &info.version);
        manifest.required_env_vars = info.required_env_vars.clone();
        Ok(Arc::new(InstalledPlugin { manifest }))
    }
}

// ── Catalog fetch and caching ─────────────────────────────────────

#[tokio::test]
async fn unreachable_registry_degrades_to_empty_catalog() {
    let root = TempDir::new().unwrap();
    let config = RegistryConfig {
        index_url: "http://127.0.0.1:9/index.json".to_string(),
        install_root: root.path().join("plugins"),
        ..RegistryConfig::default()
    };
    let (client, _store, _mirror) = client(config);

    assert!(client.available_plugins().await.is_empty());

    let err = client.install("anything").await.unwrap_err();
    assert!(matches!(err, InstallError::NotFoundInRegistry(_)));
}

#[tokio::test]
async fn catalog_is_cached_for_the_ttl() {
    let root = TempDir::new().unwrap();
    let url = serve_index(
        r#"{
            "weather": { "description": "forecasts", "package": "weather-pkg" },
            "memo": { "repository": "https://example.com/memo.git" }
        }"#
        .to_string(),
    )
    .await;
    let config = RegistryConfig {
        index_url: url,
        install_root: root.path().join("plugins"),
        ..RegistryConfig::default()
    };
    let (client, _store, _mirror) = client(config);

    let first = client.available_plugins().await;
    assert_eq!(first.len(), 2);
    assert!(first.contains_key("weather"));

    // The one-shot server is gone; a second call within the TTL must
    // come from the cache.
    let second = client.available_plugins().await;
    assert_eq!(second, first);
}

#[tokio::test]
async fn expired_cache_refetches_and_degrades_on_failure() {
    let root = TempDir::new().unwrap();
    let url = serve_index(r#"{ "weather": { "package": "weather-pkg" } }"#.to_string()).await;
    let config = RegistryConfig {
        index_url: url,
        cache_ttl: Duration::ZERO,
        install_root: root.path().join("plugins"),
        ..RegistryConfig::default()
    };
    let (client, _store, _mirror) = client(config);

    assert_eq!(client.available_plugins().await.len(), 1);
    // TTL zero forces a refetch, the server is gone, so nothing comes back.
    assert!(client.available_plugins().await.is_empty());
}

// ── Installation transports ───────────────────────────────────────

#[tokio::test]
async fn package_transport_installs_and_records() {
    let root = TempDir::new().unwrap();
    let npm = stub_tool(root.path(), "npm", &package_script(WEATHER_MANIFEST));
    let url = serve_index(
        r#"{ "weather": { "package": "weather-pkg", "version": "2.1.0" } }"#.to_string(),
    )
    .await;
    let install_root = root.path().join("plugins");
    let config = RegistryConfig {
        index_url: url,
        install_root: install_root.clone(),
        package_tool: npm,
        ..RegistryConfig::default()
    };
    let (client, _store, _mirror) = client(config);

    let info = client.install("weather").await.unwrap();
    assert_eq!(info.name, "weather");
    assert_eq!(info.version, "2.1.0");
    assert_eq!(info.status, InstallStatus::Installed);
    assert_eq!(info.path, install_root.join("node_modules").join("weather-pkg"));
    assert_eq!(info.required_env_vars.len(), 1);
    assert!(!info.required_env_vars[0].required);

    // The tool saw the versioned coordinate.
    let coordinate = std::fs::read_to_string(install_root.join("coordinate.txt")).unwrap();
    assert_eq!(coordinate, "weather-pkg@2.1.0");

    let records = client.installed().await;
    assert_eq!(records.len(), 1);
    assert!(client.find_installed("weather").await.is_some());
    assert!(client.find_installed("memo").await.is_none());
}

#[tokio::test]
async fn git_transport_used_when_no_package() {
    let root = TempDir::new().unwrap();
    let git = stub_tool(root.path(), "git", &git_script(MEMO_MANIFEST));
    let url = serve_index(
        r#"{ "memo": { "repository": "https://example.com/memo.git" } }"#.to_string(),
    )
    .await;
    let install_root = root.path().join("plugins");
    let config = RegistryConfig {
        index_url: url,
        install_root: install_root.clone(),
        git_tool: git,
        ..RegistryConfig::default()
    };
    let (client, _store, _mirror) = client(config);

    let info = client.install("memo").await.unwrap();
    assert_eq!(info.path, install_root.join("memo"));
    assert_eq!(info.version, "0.1.0");
    // MEMO_TOKEN is required and unset.
    assert_eq!(info.status, InstallStatus::NeedsConfiguration);
}

#[tokio::test]
async fn install_without_transport_fails() {
    let root = TempDir::new().unwrap();
    let url = serve_index(r#"{ "stub": { "description": "no coordinates" } }"#.to_string()).await;
    let config = RegistryConfig {
        index_url: url,
        install_root: root.path().join("plugins"),
        ..RegistryConfig::default()
    };
    let (client, _store, _mirror) = client(config);

    let err = client.install("stub").await.unwrap_err();
    assert!(matches!(err, InstallError::NoTransport(_)));
}

#[tokio::test]
async fn failed_transport_surfaces_stderr() {
    let root = TempDir::new().unwrap();
    let npm = stub_tool(
        root.path(),
        "npm",
        "#!/bin/sh\necho 'registry exploded' >&2\nexit 3\n",
    );
    let url = serve_index(r#"{ "broken": { "package": "broken-pkg" } }"#.to_string()).await;
    let config = RegistryConfig {
        index_url: url,
        install_root: root.path().join("plugins"),
        package_tool: npm,
        ..RegistryConfig::default()
    };
    let (client, _store, _mirror) = client(config);

    let err = client.install("broken").await.unwrap_err();
    match err {
        InstallError::InstallFailed(message) => {
            assert!(message.contains("registry exploded"), "{message}");
        }
        other => panic!("expected InstallFailed, got {other}"),
    }
    assert!(client.find_installed("broken").await.is_none());
}

#[tokio::test]
async fn reinstall_replaces_the_record() {
    let root = TempDir::new().unwrap();
    let npm = stub_tool(root.path(), "npm", &package_script(WEATHER_MANIFEST));
    let url = serve_index(r#"{ "weather": { "package": "weather-pkg" } }"#.to_string()).await;
    let config = RegistryConfig {
        index_url: url,
        install_root: root.path().join("plugins"),
        package_tool: npm,
        ..RegistryConfig::default()
    };
    let (client, _store, _mirror) = client(config);

    let first = client.install("weather").await.unwrap();
    let second = client.install("weather").await.unwrap();
    assert_eq!(second.name, first.name);
    assert_eq!(client.installed().await.len(), 1);
}

// ── Loading installed plugins ─────────────────────────────────────

#[tokio::test]
async fn load_installed_requires_an_install_record() {
    let root = TempDir::new().unwrap();
    let config = RegistryConfig {
        index_url: "http://127.0.0.1:9/index.json".to_string(),
        install_root: root.path().join("plugins"),
        ..RegistryConfig::default()
    };
    let (client, store, mirror) = client(config);
    let manager = lifecycle(&mirror, &store);

    let err = client
        .load_installed("ghost", &StubLoader, &manager)
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::NotInstalled(_)));
}

#[tokio::test]
async fn needs_configuration_blocks_load_until_vars_are_set() {
    let root = TempDir::new().unwrap();
    let npm = stub_tool(root.path(), "npm", &package_script(PAYMENTS_MANIFEST));
    let url = serve_index(r#"{ "payments": { "package": "payments-pkg" } }"#.to_string()).await;
    let config = RegistryConfig {
        index_url: url,
        install_root: root.path().join("plugins"),
        package_tool: npm,
        ..RegistryConfig::default()
    };
    let (client, store, mirror) = client(config);
    let manager = lifecycle(&mirror, &store);

    let info = client.install("payments").await.unwrap();
    assert_eq!(info.status, InstallStatus::NeedsConfiguration);

    let err = client
        .load_installed("payments", &StubLoader, &manager)
        .await
        .unwrap_err();
    match err {
        InstallError::NeedsConfiguration { missing } => {
            assert_eq!(missing, vec!["API_KEY"]);
        }
        other => panic!("expected NeedsConfiguration, got {other}"),
    }
    assert!(manager.plugin_by_name("payments").await.is_none());

    mirror
        .write()
        .unwrap()
        .insert("API_KEY".to_string(), "sk-test".to_string());

    let id = client
        .load_installed("payments", &StubLoader, &manager)
        .await
        .unwrap();
    let unit = manager.plugin(id).await.unwrap();
    assert_eq!(unit.status, PluginStatus::Loaded);
    assert!(unit.missing_env_vars.is_empty());
}

#[tokio::test]
async fn load_installed_is_idempotent() {
    let root = TempDir::new().unwrap();
    let npm = stub_tool(root.path(), "npm", &package_script(WEATHER_MANIFEST));
    let url = serve_index(r#"{ "weather": { "package": "weather-pkg" } }"#.to_string()).await;
    let config = RegistryConfig {
        index_url: url,
        install_root: root.path().join("plugins"),
        package_tool: npm,
        ..RegistryConfig::default()
    };
    let (client, store, mirror) = client(config);
    let manager = lifecycle(&mirror, &store);

    client.install("weather").await.unwrap();
    let first = client
        .load_installed("weather", &StubLoader, &manager)
        .await
        .unwrap();
    let second = client
        .load_installed("weather", &StubLoader, &manager)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.plugins().await.len(), 1);
    assert_eq!(manager.loaded_plugins().await.len(), 1);
}
