//! Integration tests for the environment variable manager: manifest
//! scanning, lifecycle updates, generation, validation, and the
//! persist-then-mirror contract.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use troupe_env::{
    EnvError, EnvMirror, EnvVarManager, EnvVarPatch, EnvVarStatus, ENV_REQUIREMENTS_SECTION,
};
use troupe_model::{Character, World};
use troupe_plugin_sdk::{EnvVarRequirement, EnvVarType, PluginManifest};
use troupe_storage::{MemoryStore, WorldStore};
use troupe_types::{AgentId, HostEvent, MemorySink};

fn llm_manifest() -> PluginManifest {
    PluginManifest::new("llm", "1.0.0")
        .with_env_var(EnvVarRequirement::new("OPENAI_API_KEY", EnvVarType::ApiKey).with_provider("openai"))
        .with_env_var(EnvVarRequirement::new("LLM_BASE_URL", EnvVarType::Url).optional())
}

fn wallet_manifest() -> PluginManifest {
    PluginManifest::new("wallet", "0.3.0")
        .with_env_var(EnvVarRequirement::new("WALLET_SEED", EnvVarType::Secret).generatable())
}

struct Harness {
    manager: EnvVarManager,
    store: Arc<MemoryStore>,
    mirror: EnvMirror,
    sink: Arc<MemorySink>,
    agent_id: AgentId,
}

impl Harness {
    async fn new() -> Self {
        Self::with_character(Character::new("Ada")).await
    }

    async fn with_character(character: Character) -> Self {
        let agent_id = AgentId::new();
        let store = Arc::new(MemoryStore::new());
        store.seed_world(World::new(agent_id, "test world")).await;
        let mirror: EnvMirror = Arc::default();
        let sink = Arc::new(MemorySink::new());
        let manager = EnvVarManager::new(
            agent_id,
            Arc::new(RwLock::new(character)),
            store.clone(),
            mirror.clone(),
            sink.clone(),
        );
        Self {
            manager,
            store,
            mirror,
            sink,
            agent_id,
        }
    }

    async fn persisted_section(&self) -> serde_json::Value {
        let world = self
            .store
            .find_world_for_agent(self.agent_id)
            .await
            .unwrap()
            .unwrap();
        world
            .metadata_section(ENV_REQUIREMENTS_SECTION)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    fn mirrored(&self, name: &str) -> Option<String> {
        self.mirror.read().unwrap().get(name).cloned()
    }
}

// ── Scanning ──────────────────────────────────────────────────────

#[tokio::test]
async fn scan_discovers_and_persists_requirements() {
    let h = Harness::new().await;
    let report = h
        .manager
        .scan_requirements(&[llm_manifest(), wallet_manifest()])
        .await
        .unwrap();

    assert_eq!(report.plugins, 2);
    assert_eq!(report.discovered, 3);
    assert_eq!(report.satisfied, 0);
    // LLM_BASE_URL is optional and does not count as missing.
    assert_eq!(report.missing, 2);

    let vars = h.manager.env_vars_for_plugin("llm").await.unwrap();
    assert_eq!(vars.len(), 2);
    assert_eq!(vars["OPENAI_API_KEY"].status, EnvVarStatus::Missing);
    assert!(vars["OPENAI_API_KEY"].required);
    assert!(!vars["LLM_BASE_URL"].required);

    let section = h.persisted_section().await;
    assert_eq!(section["llm"]["OPENAI_API_KEY"]["status"], "missing");
    assert_eq!(section["wallet"]["WALLET_SEED"]["type"], "secret");
}

#[tokio::test]
async fn rescan_preserves_tracked_state() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();
    h.manager
        .update_env_var(
            "llm",
            "OPENAI_API_KEY",
            EnvVarPatch {
                value: Some("sk-test-key-0123456789abcdef".into()),
                status: Some(EnvVarStatus::Valid),
                last_error: None,
            },
        )
        .await
        .unwrap();

    let report = h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();
    assert_eq!(report.discovered, 0);
    assert_eq!(report.missing, 0);

    let vars = h.manager.env_vars_for_plugin("llm").await.unwrap();
    assert_eq!(vars["OPENAI_API_KEY"].status, EnvVarStatus::Valid);
    assert_eq!(
        vars["OPENAI_API_KEY"].value.as_deref(),
        Some("sk-test-key-0123456789abcdef")
    );
}

#[tokio::test]
async fn scan_satisfies_from_character_secrets() {
    let mut character = Character::new("Ada");
    character.secrets = serde_json::json!({ "OPENAI_API_KEY": "sk-from-character-settings" })
        .as_object()
        .cloned();
    let h = Harness::with_character(character).await;

    let report = h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();
    assert_eq!(report.satisfied, 1);
    assert_eq!(report.missing, 0);

    let vars = h.manager.env_vars_for_plugin("llm").await.unwrap();
    assert_eq!(vars["OPENAI_API_KEY"].status, EnvVarStatus::Valid);
    assert_eq!(
        h.mirrored("OPENAI_API_KEY").as_deref(),
        Some("sk-from-character-settings")
    );
    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        HostEvent::EnvVarUpdated { plugin_name, var_name, status }
            if plugin_name == "llm" && var_name == "OPENAI_API_KEY" && status == "valid"
    )));
}

#[tokio::test]
async fn scan_without_world_is_an_error() {
    let agent_id = AgentId::new();
    let store = Arc::new(MemoryStore::new());
    let manager = EnvVarManager::new(
        agent_id,
        Arc::new(RwLock::new(Character::new("Ada"))),
        store,
        Arc::default(),
        Arc::new(MemorySink::new()),
    );

    let err = manager.scan_requirements(&[llm_manifest()]).await.unwrap_err();
    assert!(matches!(err, EnvError::NoContext));
}

// ── Updates ───────────────────────────────────────────────────────

#[tokio::test]
async fn update_persists_then_mirrors_and_emits() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();
    h.sink.take();

    let applied = h
        .manager
        .update_env_var(
            "llm",
            "OPENAI_API_KEY",
            EnvVarPatch {
                value: Some("sk-live-key-0123456789abcdef".into()),
                status: Some(EnvVarStatus::Valid),
                last_error: None,
            },
        )
        .await
        .unwrap();
    assert!(applied);

    let section = h.persisted_section().await;
    assert_eq!(section["llm"]["OPENAI_API_KEY"]["status"], "valid");
    assert_eq!(
        section["llm"]["OPENAI_API_KEY"]["value"],
        "sk-live-key-0123456789abcdef"
    );
    assert_eq!(
        h.mirrored("OPENAI_API_KEY").as_deref(),
        Some("sk-live-key-0123456789abcdef")
    );
    assert_eq!(h.sink.events().len(), 1);
}

#[tokio::test]
async fn failed_persist_leaves_mirror_and_memory_untouched() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();
    h.sink.take();
    h.store.fail_world_updates(true);

    let err = h
        .manager
        .update_env_var(
            "llm",
            "OPENAI_API_KEY",
            EnvVarPatch {
                value: Some("sk-should-not-stick".into()),
                status: Some(EnvVarStatus::Valid),
                last_error: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::Persistence(_)));

    assert_eq!(h.mirrored("OPENAI_API_KEY"), None);
    let vars = h.manager.env_vars_for_plugin("llm").await.unwrap();
    assert_eq!(vars["OPENAI_API_KEY"].status, EnvVarStatus::Missing);
    assert!(vars["OPENAI_API_KEY"].value.is_none());
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn update_for_unknown_target_is_dropped() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();
    h.sink.take();

    let applied = h
        .manager
        .update_env_var("llm", "NO_SUCH_VAR", EnvVarPatch::default())
        .await
        .unwrap();
    assert!(!applied);

    let applied = h
        .manager
        .update_env_var("no-such-plugin", "OPENAI_API_KEY", EnvVarPatch::default())
        .await
        .unwrap();
    assert!(!applied);
    assert!(h.sink.events().is_empty());
}

// ── Accessors ─────────────────────────────────────────────────────

#[tokio::test]
async fn missing_and_generatable_listings() {
    let h = Harness::new().await;
    h.manager
        .scan_requirements(&[llm_manifest(), wallet_manifest()])
        .await
        .unwrap();

    assert!(h.manager.has_missing().await);
    assert_eq!(
        h.manager.missing_vars().await,
        vec![
            ("llm".to_string(), "OPENAI_API_KEY".to_string()),
            ("wallet".to_string(), "WALLET_SEED".to_string()),
        ]
    );
    assert_eq!(
        h.manager.generatable_vars().await,
        vec![("wallet".to_string(), "WALLET_SEED".to_string())]
    );
}

// ── Generation ────────────────────────────────────────────────────

#[tokio::test]
async fn generate_missing_fills_generatable_secrets() {
    let h = Harness::new().await;
    h.manager
        .scan_requirements(&[llm_manifest(), wallet_manifest()])
        .await
        .unwrap();
    h.sink.take();

    let generated = h.manager.generate_missing().await.unwrap();
    assert_eq!(generated, 1);

    let vars = h.manager.env_vars_for_plugin("wallet").await.unwrap();
    let seed = &vars["WALLET_SEED"];
    assert_eq!(seed.status, EnvVarStatus::Valid);
    assert_eq!(seed.attempts, 1);
    let value = seed.value.clone().unwrap();
    assert_eq!(value.len(), 64);
    assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(h.mirrored("WALLET_SEED"), Some(value));

    // The API key is not generatable and stays missing.
    let vars = h.manager.env_vars_for_plugin("llm").await.unwrap();
    assert_eq!(vars["OPENAI_API_KEY"].status, EnvVarStatus::Missing);
    assert!(h.sink.events().iter().all(|e| matches!(
        e,
        HostEvent::EnvVarUpdated { var_name, .. } if var_name == "WALLET_SEED"
    )));
}

#[tokio::test]
async fn generate_missing_with_nothing_to_do() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();
    assert_eq!(h.manager.generate_missing().await.unwrap(), 0);
}

// ── Validation ────────────────────────────────────────────────────

#[tokio::test]
async fn validate_var_records_failure_then_success() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();

    h.manager
        .update_env_var(
            "llm",
            "OPENAI_API_KEY",
            EnvVarPatch {
                value: Some("not-an-openai-key".into()),
                status: Some(EnvVarStatus::Validating),
                last_error: None,
            },
        )
        .await
        .unwrap();
    let outcome = h.manager.validate_var("llm", "OPENAI_API_KEY").await.unwrap();
    assert!(!outcome.valid);
    let vars = h.manager.env_vars_for_plugin("llm").await.unwrap();
    assert_eq!(vars["OPENAI_API_KEY"].status, EnvVarStatus::Invalid);
    assert!(vars["OPENAI_API_KEY"].last_error.is_some());

    h.manager
        .update_env_var(
            "llm",
            "OPENAI_API_KEY",
            EnvVarPatch {
                value: Some("sk-0123456789abcdefghijklmn".into()),
                status: Some(EnvVarStatus::Validating),
                last_error: None,
            },
        )
        .await
        .unwrap();
    let outcome = h.manager.validate_var("llm", "OPENAI_API_KEY").await.unwrap();
    assert!(outcome.valid);
    let vars = h.manager.env_vars_for_plugin("llm").await.unwrap();
    assert_eq!(vars["OPENAI_API_KEY"].status, EnvVarStatus::Valid);
    assert!(vars["OPENAI_API_KEY"].last_error.is_none());
    assert_eq!(vars["OPENAI_API_KEY"].attempts, 2);
}

#[tokio::test]
async fn validate_var_rejects_empty_values() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();

    let outcome = h.manager.validate_var("llm", "OPENAI_API_KEY").await.unwrap();
    assert!(!outcome.valid);
    assert_eq!(outcome.error.as_deref(), Some("empty value"));
}

#[tokio::test]
async fn validate_var_unknown_targets() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();

    let err = h.manager.validate_var("ghost", "X").await.unwrap_err();
    assert!(matches!(err, EnvError::UnknownPlugin(name) if name == "ghost"));

    let err = h.manager.validate_var("llm", "GHOST_VAR").await.unwrap_err();
    assert!(matches!(err, EnvError::UnknownVar { ref var, .. } if var == "GHOST_VAR"));
}

#[tokio::test]
async fn registered_strategy_takes_precedence() {
    let h = Harness::new().await;
    let manifest = PluginManifest::new("custom", "0.1.0").with_env_var(
        EnvVarRequirement::new("REGION", EnvVarType::Config).with_provider("acme"),
    );
    h.manager.scan_requirements(&[manifest]).await.unwrap();
    h.manager.register_strategy(
        EnvVarType::Config,
        Some("acme"),
        Arc::new(|value| {
            if value.starts_with("acme-") {
                Ok(())
            } else {
                Err("region must start with acme-".to_string())
            }
        }),
    );

    h.manager
        .update_env_var(
            "custom",
            "REGION",
            EnvVarPatch {
                value: Some("us-east".into()),
                status: None,
                last_error: None,
            },
        )
        .await
        .unwrap();
    let outcome = h.manager.validate_var("custom", "REGION").await.unwrap();
    assert!(!outcome.valid);
    assert_eq!(
        outcome.error.as_deref(),
        Some("region must start with acme-")
    );

    h.manager
        .update_env_var(
            "custom",
            "REGION",
            EnvVarPatch {
                value: Some("acme-west".into()),
                status: None,
                last_error: None,
            },
        )
        .await
        .unwrap();
    let outcome = h.manager.validate_var("custom", "REGION").await.unwrap();
    assert!(outcome.valid);
}

// ── Persisted shape ───────────────────────────────────────────────

#[tokio::test]
async fn persisted_state_round_trips_through_world_metadata() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[wallet_manifest()]).await.unwrap();
    h.manager.generate_missing().await.unwrap();

    // A second manager over the same world picks the state back up.
    let manager = EnvVarManager::new(
        h.agent_id,
        Arc::new(RwLock::new(Character::new("Ada"))),
        h.store.clone(),
        Arc::default(),
        Arc::new(MemorySink::new()),
    );
    let report = manager.scan_requirements(&[wallet_manifest()]).await.unwrap();
    assert_eq!(report.discovered, 0);
    assert_eq!(report.missing, 0);

    let vars = manager.env_vars_for_plugin("wallet").await.unwrap();
    assert_eq!(vars["WALLET_SEED"].status, EnvVarStatus::Valid);
    assert!(vars["WALLET_SEED"].validated_at.is_some());
}

#[tokio::test]
async fn states_serialize_with_wire_names() {
    let h = Harness::new().await;
    h.manager.scan_requirements(&[llm_manifest()]).await.unwrap();

    let section = h.persisted_section().await;
    let entry = &section["llm"]["OPENAI_API_KEY"];
    assert_eq!(entry["type"], "api-key");
    assert_eq!(entry["provider"], "openai");
    assert_eq!(entry["canGenerate"], false);
    assert_eq!(entry["attempts"], 0);
    let map: HashMap<String, serde_json::Value> =
        serde_json::from_value(entry.clone()).unwrap();
    assert!(!map.contains_key("lastError"));
    assert!(!map.contains_key("validatedAt"));
}
