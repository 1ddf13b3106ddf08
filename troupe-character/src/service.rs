//! Per-agent modification service: versioning, snapshots, rollback, rate
//! limiting, locking, and persistence around the diff engine.
//!
//! The service owns a monotonically increasing document version and a
//! bounded snapshot history. Apply outcomes are structured rather than
//! raised: parse and apply failures come back inside [`ApplyOutcome`] so
//! callers always learn how far a diff got. Only preconditions (not
//! started, locked, rate limited) surface as errors.

use crate::diff::{parse_diff, CharacterDiff};
use crate::error::{CharacterError, CharacterResult, UpdateError};
use crate::path::top_level_field;
use crate::updater::{self, diff_documents};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use troupe_model::Character;
use troupe_storage::{self as storage, AgentStore, CacheStore, StorageError};
use troupe_types::{AgentId, EventSink, HostEvent, ModificationId, SnapshotId};

/// Tuning knobs for the modification service.
#[derive(Debug, Clone)]
pub struct ModificationConfig {
    /// Applied modifications allowed per sliding window.
    pub max_per_window: usize,
    /// Width of the rate-limit window.
    pub window: Duration,
    /// Snapshot history bound; the oldest snapshot is evicted beyond it.
    pub max_snapshots: usize,
    /// When set, only operations whose top-level field is in this list
    /// are applied; the rest are skipped with a note.
    pub focus_areas: Option<Vec<String>>,
}

impl Default for ModificationConfig {
    fn default() -> Self {
        Self {
            max_per_window: 5,
            window: Duration::from_secs(60 * 60),
            max_snapshots: 50,
            focus_areas: None,
        }
    }
}

/// What happened to one submitted diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub success: bool,
    /// Operations actually applied.
    pub applied: usize,
    /// Document version after the call, when a new version was committed.
    pub version: Option<u64>,
    /// Failure reasons and per-operation skip notes. May be non-empty on
    /// success when focus filtering skipped operations.
    pub errors: Vec<String>,
}

impl ApplyOutcome {
    fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            applied: 0,
            version: None,
            errors,
        }
    }
}

/// One applied modification, as recorded in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterModification {
    pub id: ModificationId,
    /// Version the document reached through this modification.
    pub version: u64,
    /// The diff payload exactly as submitted.
    pub diff_text: String,
    pub reasoning: String,
    pub applied: usize,
    pub applied_at: DateTime<Utc>,
}

/// A full copy of the document at some version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSnapshot {
    pub id: SnapshotId,
    pub version: u64,
    pub character: Character,
    pub taken_at: DateTime<Utc>,
}

/// Cache representation of the service state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedModState {
    modifications: Vec<CharacterModification>,
    snapshots: Vec<CharacterSnapshot>,
    version: u64,
}

#[derive(Default)]
struct ServiceState {
    started: bool,
    locked: bool,
    version: u64,
    modifications: Vec<CharacterModification>,
    snapshots: Vec<CharacterSnapshot>,
    /// Timestamps of applied modifications inside the rate window.
    /// Failed attempts never land here.
    window: VecDeque<Instant>,
}

/// Controlled modification of one agent's character document.
pub struct ModificationService {
    agent_id: AgentId,
    character: Arc<RwLock<Character>>,
    agents: Arc<dyn AgentStore>,
    cache: Arc<dyn CacheStore>,
    events: Arc<dyn EventSink>,
    config: ModificationConfig,
    state: RwLock<ServiceState>,
}

impl ModificationService {
    pub fn new(
        agent_id: AgentId,
        character: Arc<RwLock<Character>>,
        agents: Arc<dyn AgentStore>,
        cache: Arc<dyn CacheStore>,
        events: Arc<dyn EventSink>,
        config: ModificationConfig,
    ) -> Self {
        Self {
            agent_id,
            character,
            agents,
            cache,
            events,
            config,
            state: RwLock::new(ServiceState::default()),
        }
    }

    /// Loads persisted state, or seeds a version-0 snapshot of the current
    /// document when none exists. Idempotent.
    pub async fn start(&self) -> CharacterResult<()> {
        let mut state = self.state.write().await;
        if state.started {
            return Ok(());
        }
        match storage::get_json::<PersistedModState>(self.cache.as_ref(), &self.cache_key()).await
        {
            Ok(Some(persisted)) => {
                state.version = persisted.version;
                state.modifications = persisted.modifications;
                state.snapshots = persisted.snapshots;
                debug!(
                    agent_id = %self.agent_id,
                    version = state.version,
                    snapshots = state.snapshots.len(),
                    "restored modification state"
                );
            }
            Ok(None) => self.seed_initial_snapshot(&mut state).await,
            Err(err) => {
                warn!(
                    agent_id = %self.agent_id,
                    error = %err,
                    "could not read modification state, starting fresh"
                );
                self.seed_initial_snapshot(&mut state).await;
            }
        }
        state.started = true;
        Ok(())
    }

    /// Parses and applies one diff payload.
    ///
    /// Preconditions are raised: [`CharacterError::NotStarted`],
    /// [`CharacterError::Locked`], [`CharacterError::RateLimited`]. Parse
    /// and apply failures come back structured with `success: false` and
    /// the live document untouched.
    ///
    /// A persistence failure after a successful apply does not undo the
    /// in-memory commit: the outcome carries `success: false`, the new
    /// version, and a persistence note. Memory and store converge on the
    /// next successful apply.
    pub async fn apply_diff(
        &self,
        diff_text: &str,
        focus: Option<&[String]>,
    ) -> CharacterResult<ApplyOutcome> {
        let mut state = self.state.write().await;
        if !state.started {
            return Err(CharacterError::NotStarted);
        }
        if state.locked {
            return Err(CharacterError::Locked);
        }
        self.check_rate_limit(&mut state)?;

        let diff = match parse_diff(diff_text) {
            Ok(diff) => diff,
            Err(err) => {
                info!(agent_id = %self.agent_id, error = %err, "diff rejected at parse");
                return Ok(ApplyOutcome::failure(vec![err.to_string()]));
            }
        };

        let mut errors = Vec::new();
        let focus_areas = focus.or(self.config.focus_areas.as_deref());
        let operations = match focus_areas {
            None => diff.operations.clone(),
            Some(areas) => {
                let mut kept = Vec::new();
                for op in &diff.operations {
                    if areas.iter().any(|area| area == top_level_field(&op.path)) {
                        kept.push(op.clone());
                    } else {
                        errors.push(format!("skipped '{}': outside focus areas", op.path));
                    }
                }
                kept
            }
        };
        if operations.is_empty() {
            errors.push("no operations to apply".to_string());
            return Ok(ApplyOutcome::failure(errors));
        }

        let filtered = CharacterDiff {
            operations,
            reasoning: diff.reasoning.clone(),
            timestamp: diff.timestamp,
        };
        let current = self.character.read().await.clone();
        let updated = match updater::apply_diff(&current, &filtered) {
            Ok(updated) => updated,
            Err(err) => {
                info!(agent_id = %self.agent_id, error = %err, "diff rejected at apply");
                errors.push(err.to_string());
                return Ok(ApplyOutcome::failure(errors));
            }
        };

        // Commit in memory first.
        let applied = filtered.operations.len();
        state.version += 1;
        let version = state.version;
        let now = Utc::now();
        self.push_snapshot(
            &mut state,
            CharacterSnapshot {
                id: SnapshotId::new(),
                version,
                character: updated.clone(),
                taken_at: now,
            },
        );
        state.modifications.push(CharacterModification {
            id: ModificationId::new(),
            version,
            diff_text: diff_text.to_string(),
            reasoning: filtered.reasoning,
            applied,
            applied_at: now,
        });
        state.window.push_back(Instant::now());
        *self.character.write().await = updated.clone();
        self.events.emit(HostEvent::CharacterUpdated {
            agent_id: self.agent_id,
            version,
            applied,
        });
        info!(agent_id = %self.agent_id, version, applied, "character modified");

        if let Err(err) = self.persist(&state, &updated).await {
            warn!(
                agent_id = %self.agent_id,
                version,
                error = %err,
                "modification committed in memory but persistence failed"
            );
            errors.push(format!("persistence failed: {err}"));
            return Ok(ApplyOutcome {
                success: false,
                applied,
                version: Some(version),
                errors,
            });
        }

        Ok(ApplyOutcome {
            success: true,
            applied,
            version: Some(version),
            errors,
        })
    }

    /// Restores the document captured by `snapshot_id`.
    ///
    /// The restore bumps the version and is itself recorded as a snapshot,
    /// so a rollback can be rolled back. Allowed while locked.
    pub async fn rollback(&self, snapshot_id: SnapshotId) -> CharacterResult<()> {
        let mut state = self.state.write().await;
        if !state.started {
            return Err(CharacterError::NotStarted);
        }
        let snapshot = state
            .snapshots
            .iter()
            .find(|s| s.id == snapshot_id)
            .ok_or(CharacterError::SnapshotNotFound(snapshot_id))?
            .clone();
        snapshot
            .character
            .validate_structure()
            .map_err(UpdateError::Validation)?;

        state.version += 1;
        let version = state.version;
        self.push_snapshot(
            &mut state,
            CharacterSnapshot {
                id: SnapshotId::new(),
                version,
                character: snapshot.character.clone(),
                taken_at: Utc::now(),
            },
        );
        *self.character.write().await = snapshot.character.clone();
        self.events.emit(HostEvent::CharacterRolledBack {
            agent_id: self.agent_id,
            version,
        });
        info!(
            agent_id = %self.agent_id,
            version,
            restored_version = snapshot.version,
            "character rolled back"
        );

        self.persist(&state, &snapshot.character)
            .await
            .map_err(|err| CharacterError::Persistence(err.to_string()))
    }

    /// Stops accepting diffs. Idempotent.
    pub async fn lock(&self) {
        let mut state = self.state.write().await;
        if !state.locked {
            debug!(agent_id = %self.agent_id, "modifications locked");
        }
        state.locked = true;
    }

    /// Resumes accepting diffs. Idempotent.
    pub async fn unlock(&self) {
        let mut state = self.state.write().await;
        if state.locked {
            debug!(agent_id = %self.agent_id, "modifications unlocked");
        }
        state.locked = false;
    }

    pub async fn is_locked(&self) -> bool {
        self.state.read().await.locked
    }

    pub async fn current_version(&self) -> u64 {
        self.state.read().await.version
    }

    /// Applied modifications, oldest first.
    pub async fn history(&self) -> Vec<CharacterModification> {
        self.state.read().await.modifications.clone()
    }

    /// Retained snapshots, oldest first.
    pub async fn snapshots(&self) -> Vec<CharacterSnapshot> {
        self.state.read().await.snapshots.clone()
    }

    /// A diff describing how to get from snapshot `from` to snapshot `to`.
    pub async fn diff_between(
        &self,
        from: SnapshotId,
        to: SnapshotId,
    ) -> CharacterResult<CharacterDiff> {
        let state = self.state.read().await;
        if !state.started {
            return Err(CharacterError::NotStarted);
        }
        let lookup = |id: SnapshotId| {
            state
                .snapshots
                .iter()
                .find(|s| s.id == id)
                .ok_or(CharacterError::SnapshotNotFound(id))
        };
        let from = lookup(from)?;
        let to = lookup(to)?;
        Ok(diff_documents(&from.character, &to.character))
    }

    /// Final persist; the service stays locked afterwards.
    pub async fn stop(&self) -> CharacterResult<()> {
        let mut state = self.state.write().await;
        if !state.started {
            return Ok(());
        }
        state.locked = true;
        let character = self.character.read().await.clone();
        self.persist(&state, &character)
            .await
            .map_err(|err| CharacterError::Persistence(err.to_string()))?;
        info!(agent_id = %self.agent_id, version = state.version, "modification service stopped");
        Ok(())
    }

    fn cache_key(&self) -> String {
        format!("character-mods:{}", self.agent_id)
    }

    async fn seed_initial_snapshot(&self, state: &mut ServiceState) {
        let character = self.character.read().await.clone();
        state.snapshots.push(CharacterSnapshot {
            id: SnapshotId::new(),
            version: 0,
            character,
            taken_at: Utc::now(),
        });
    }

    fn check_rate_limit(&self, state: &mut ServiceState) -> CharacterResult<()> {
        let now = Instant::now();
        while let Some(front) = state.window.front() {
            if now.duration_since(*front) >= self.config.window {
                state.window.pop_front();
            } else {
                break;
            }
        }
        if state.window.len() >= self.config.max_per_window {
            return Err(CharacterError::RateLimited {
                max: self.config.max_per_window,
                window_secs: self.config.window.as_secs(),
            });
        }
        Ok(())
    }

    fn push_snapshot(&self, state: &mut ServiceState, snapshot: CharacterSnapshot) {
        state.snapshots.push(snapshot);
        if state.snapshots.len() > self.config.max_snapshots {
            let excess = state.snapshots.len() - self.config.max_snapshots;
            state.snapshots.drain(..excess);
        }
    }

    async fn persist(&self, state: &ServiceState, character: &Character) -> Result<(), StorageError> {
        let persisted = PersistedModState {
            modifications: state.modifications.clone(),
            snapshots: state.snapshots.clone(),
            version: state.version,
        };
        storage::set_json(self.cache.as_ref(), &self.cache_key(), &persisted).await?;
        self.agents.update_character(self.agent_id, character).await
    }
}
