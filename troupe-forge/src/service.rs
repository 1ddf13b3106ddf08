//! The plugin creation service: gated job intake, the phase runner, and
//! the overall-timeout watchdog.
//!
//! Jobs are transient in-memory records. Intake is gated three ways, in
//! order: name safety, creation rate (trailing hour), and active-job
//! concurrency. Once admitted, a job runs generate -> write -> build ->
//! lint -> test on its own task; a build failure is fatal while lint and
//! test failures only land in the job's error list. Subprocess output is
//! captured into the job log under a byte cap. The watchdog forces any
//! job that outlives the overall timeout to failed with a "timed out"
//! error, independent of the per-command deadlines.

use crate::error::{ForgeError, ForgeResult};
use crate::exec::{append_capped, output_tail, run_command, CommandOutcome};
use crate::generate::{CodeGenerator, GeneratedPlugin, GenerationRequest};
use crate::job::{CreationJob, JobPhase, JobStatus};
use crate::spec::{validate_name, PluginSpecification};
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use troupe_plugin_sdk::PluginManifest;
use troupe_types::{EventSink, HostEvent, JobId};

/// Width of the creation rate window.
const RATE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// How often the watchdog scans for overdue jobs.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Tuning knobs for the creation service.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Pending plus running jobs allowed at once.
    pub max_concurrent_jobs: usize,
    /// Jobs that may be created inside the trailing hour.
    pub max_jobs_per_hour: usize,
    /// Overall deadline per job, enforced by the watchdog.
    pub job_timeout: Duration,
    /// Deadline per phase subprocess.
    pub command_timeout: Duration,
    /// Byte cap on a job's captured log.
    pub max_output_bytes: usize,
    /// How long terminal jobs and their artifacts are kept.
    pub retention: Duration,
    /// Directory job artifact trees are written under.
    pub workspace_root: PathBuf,
    pub run_lint: bool,
    pub run_tests: bool,
    /// Phase commands, program plus arguments.
    pub build_command: Vec<String>,
    pub lint_command: Vec<String>,
    pub test_command: Vec<String>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            max_jobs_per_hour: 10,
            job_timeout: Duration::from_secs(30 * 60),
            command_timeout: Duration::from_secs(5 * 60),
            max_output_bytes: 1024 * 1024,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            workspace_root: PathBuf::from("forge-workspace"),
            run_lint: true,
            run_tests: true,
            build_command: command(&["cargo", "build"]),
            lint_command: command(&["cargo", "clippy", "--", "-D", "warnings"]),
            test_command: command(&["cargo", "test"]),
        }
    }
}

fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| (*p).to_string()).collect()
}

struct JobRecord {
    job: CreationJob,
    token: CancellationToken,
}

struct ServiceState {
    config: ForgeConfig,
    generator: Arc<dyn CodeGenerator>,
    events: Arc<dyn EventSink>,
    jobs: RwLock<Vec<JobRecord>>,
    /// Creation instants inside the rate window. Rejected calls never
    /// land here.
    creations: Mutex<Vec<Instant>>,
    shutdown: CancellationToken,
}

/// Creates plugins from specifications as asynchronous jobs.
pub struct CreationService {
    state: Arc<ServiceState>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl CreationService {
    pub fn new(
        config: ForgeConfig,
        generator: Arc<dyn CodeGenerator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state: Arc::new(ServiceState {
                config,
                generator,
                events,
                jobs: RwLock::new(Vec::new()),
                creations: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
            watchdog: Mutex::new(None),
        }
    }

    /// Spawns the overall-timeout watchdog. Idempotent.
    pub fn start(&self) {
        let mut watchdog = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if watchdog.is_some() {
            return;
        }
        let state = self.state.clone();
        *watchdog = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(WATCHDOG_INTERVAL);
            loop {
                tokio::select! {
                    _ = state.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        state.expire_overdue();
                    }
                }
            }
        }));
        debug!("creation watchdog started");
    }

    /// Cancels every non-terminal job and stops the watchdog.
    pub fn stop(&self) {
        self.state.shutdown.cancel();
        if let Some(handle) = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        let cancelled = self.state.cancel_all();
        info!(cancelled, "creation service stopped");
    }

    // ================================================================
    // Job intake
    // ================================================================

    /// Admits a creation request and schedules its runner.
    ///
    /// Gates run in order: name format, creation rate, concurrency.
    /// A rejected call leaves no trace in any gate's bookkeeping.
    pub fn create_plugin(&self, spec: PluginSpecification) -> ForgeResult<JobId> {
        validate_name(&spec.name)?;

        {
            let mut creations = self
                .state
                .creations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            creations.retain(|t| now.duration_since(*t) < RATE_WINDOW);
            if creations.len() >= self.state.config.max_jobs_per_hour {
                return Err(ForgeError::RateLimitExceeded {
                    max: self.state.config.max_jobs_per_hour,
                });
            }
        }

        let active = self
            .state
            .jobs_read()
            .iter()
            .filter(|r| !r.job.is_terminal())
            .count();
        if active >= self.state.config.max_concurrent_jobs {
            return Err(ForgeError::ConcurrencyLimitExceeded {
                max: self.state.config.max_concurrent_jobs,
            });
        }

        let id = JobId::new();
        let token = self.state.shutdown.child_token();
        let job = CreationJob::new(id, spec);
        self.state
            .creations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());
        self.state.jobs_write().push(JobRecord {
            job,
            token: token.clone(),
        });
        self.state.emit_status(id, JobStatus::Pending);
        info!(job = %id, "creation job queued");

        tokio::spawn(ServiceState::run(self.state.clone(), id, token));
        Ok(id)
    }

    // ================================================================
    // Queries
    // ================================================================

    pub fn job(&self, id: JobId) -> Option<CreationJob> {
        self.state
            .jobs_read()
            .iter()
            .find(|r| r.job.id == id)
            .map(|r| r.job.clone())
    }

    /// All jobs, newest first.
    pub fn jobs(&self) -> Vec<CreationJob> {
        self.state
            .jobs_read()
            .iter()
            .rev()
            .map(|r| r.job.clone())
            .collect()
    }

    // ================================================================
    // Cancellation and cleanup
    // ================================================================

    /// Cancels a live job. Cancelling a terminal job is a no-op.
    pub fn cancel_job(&self, id: JobId) -> ForgeResult<()> {
        let mut emit = false;
        {
            let mut jobs = self.state.jobs_write();
            let record = jobs
                .iter_mut()
                .find(|r| r.job.id == id)
                .ok_or(ForgeError::JobNotFound(id))?;
            if !record.job.is_terminal() {
                record.token.cancel();
                record.job.status = JobStatus::Cancelled;
                record.job.completed_at = Some(Utc::now());
                emit = true;
            }
        }
        if emit {
            info!(job = %id, "creation job cancelled");
            self.state.emit_status(id, JobStatus::Cancelled);
        }
        Ok(())
    }

    /// Drops terminal jobs older than the retention window, along with
    /// their artifact directories. Returns how many were removed.
    pub async fn cleanup_old_jobs(&self) -> usize {
        let now = Utc::now();
        let retention = self.state.config.retention;
        let swept: Vec<CreationJob> = {
            let mut jobs = self.state.jobs_write();
            let all = std::mem::take(&mut *jobs);
            let (swept, kept): (Vec<_>, Vec<_>) = all.into_iter().partition(|record| {
                record.job.completed_at.is_some_and(|done| {
                    now.signed_duration_since(done)
                        .to_std()
                        .is_ok_and(|age| age > retention)
                })
            });
            *jobs = kept;
            swept.into_iter().map(|r| r.job).collect()
        };

        for job in &swept {
            if let Some(dir) = &job.output_dir {
                if let Err(err) = tokio::fs::remove_dir_all(dir).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(job = %job.id, dir = %dir.display(), error = %err, "could not remove job artifacts");
                    }
                }
            }
        }
        if !swept.is_empty() {
            info!(removed = swept.len(), "swept old creation jobs");
        }
        swept.len()
    }

    /// One watchdog pass: forces jobs past the overall timeout to
    /// failed. Returns how many were expired.
    pub fn expire_overdue(&self) -> usize {
        self.state.expire_overdue()
    }
}

// ================================================================
// Runner
// ================================================================

impl ServiceState {
    fn jobs_read(&self) -> RwLockReadGuard<'_, Vec<JobRecord>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn jobs_write(&self) -> RwLockWriteGuard<'_, Vec<JobRecord>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `apply` to the job unless it is missing or already
    /// terminal, so a cancelled or expired job is never resurrected.
    fn with_active_job<R>(&self, id: JobId, apply: impl FnOnce(&mut CreationJob) -> R) -> Option<R> {
        let mut jobs = self.jobs_write();
        let record = jobs.iter_mut().find(|r| r.job.id == id)?;
        if record.job.is_terminal() {
            return None;
        }
        Some(apply(&mut record.job))
    }

    fn emit_status(&self, id: JobId, status: JobStatus) {
        self.events.emit(HostEvent::JobStateChanged {
            job_id: id,
            status: status.as_str().to_string(),
        });
    }

    fn fail_job(&self, id: JobId, error: String) {
        warn!(job = %id, error = %error, "creation job failed");
        let applied = self.with_active_job(id, |job| {
            job.errors.push(error);
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
        });
        if applied.is_some() {
            self.emit_status(id, JobStatus::Failed);
        }
    }

    async fn run(self: Arc<Self>, id: JobId, token: CancellationToken) {
        let Some(spec) = self.with_active_job(id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.phase = JobPhase::Generating;
            job.current_iteration = 1;
            job.spec.clone()
        }) else {
            return;
        };
        self.emit_status(id, JobStatus::Running);
        info!(job = %id, plugin = %spec.name, "creation job started");

        let request = GenerationRequest::new(&spec);
        let generated = tokio::select! {
            _ = token.cancelled() => return,
            result = self.generator.generate(&request) => result,
        };
        let generated = match generated {
            Ok(generated) => generated,
            // ForgeError variants are self-describing; no phase prefix.
            Err(err) => {
                self.fail_job(id, err.to_string());
                return;
            }
        };

        if self
            .with_active_job(id, |job| job.phase = JobPhase::Writing)
            .is_none()
        {
            return;
        }
        let job_dir = self.config.workspace_root.join(&spec.name);
        if let Err(err) = write_artifacts(&job_dir, &spec, &generated).await {
            self.fail_job(id, format!("writing artifacts failed: {err}"));
            return;
        }
        self.with_active_job(id, |job| job.output_dir = Some(job_dir.clone()));

        let mut phases = vec![(JobPhase::Building, self.config.build_command.clone(), true)];
        if self.config.run_lint {
            phases.push((JobPhase::Linting, self.config.lint_command.clone(), false));
        }
        if self.config.run_tests {
            phases.push((JobPhase::Testing, self.config.test_command.clone(), false));
        }

        for (phase, command, fatal) in phases {
            if token.is_cancelled() {
                return;
            }
            if self.with_active_job(id, |job| job.phase = phase).is_none() {
                return;
            }
            let result =
                match run_command(&command, &job_dir, self.config.command_timeout, &token).await {
                    Ok(result) => result,
                    Err(err) => {
                        self.fail_job(id, format!("{phase} could not run: {err}"));
                        return;
                    }
                };
            self.with_active_job(id, |job| {
                append_capped(&mut job.logs, &result.output, self.config.max_output_bytes);
            });
            match result.outcome {
                CommandOutcome::Completed(status) if status.success() => {}
                CommandOutcome::Completed(status) => {
                    let error =
                        format!("{phase} failed ({status}): {}", output_tail(&result.output));
                    if fatal {
                        self.fail_job(id, error);
                        return;
                    }
                    warn!(job = %id, phase = %phase, "phase failed, continuing");
                    self.with_active_job(id, |job| job.errors.push(error));
                }
                CommandOutcome::TimedOut => {
                    self.fail_job(
                        id,
                        format!(
                            "{phase} timed out after {}s",
                            self.config.command_timeout.as_secs()
                        ),
                    );
                    return;
                }
                CommandOutcome::Cancelled => return,
            }
        }

        let finished = self.with_active_job(id, |job| {
            job.status = JobStatus::Completed;
            job.phase = JobPhase::Done;
            job.completed_at = Some(Utc::now());
        });
        if finished.is_some() {
            self.emit_status(id, JobStatus::Completed);
            info!(job = %id, plugin = %spec.name, dir = %job_dir.display(), "creation job completed");
        }
    }

    /// Forces jobs past the overall timeout to failed and fires their
    /// cancellation tokens.
    fn expire_overdue(&self) -> usize {
        let now = Utc::now();
        let mut expired = Vec::new();
        {
            let mut jobs = self.jobs_write();
            for record in jobs.iter_mut().filter(|r| !r.job.is_terminal()) {
                let anchor = record.job.started_at.unwrap_or(record.job.created_at);
                let overdue = now
                    .signed_duration_since(anchor)
                    .to_std()
                    .is_ok_and(|age| age > self.config.job_timeout);
                if overdue {
                    record.token.cancel();
                    record.job.status = JobStatus::Failed;
                    record.job.errors.push(format!(
                        "job timed out after {}s",
                        self.config.job_timeout.as_secs()
                    ));
                    record.job.completed_at = Some(now);
                    expired.push(record.job.id);
                }
            }
        }
        for id in &expired {
            warn!(job = %id, "creation job timed out");
            self.emit_status(*id, JobStatus::Failed);
        }
        expired.len()
    }

    /// Cancels every non-terminal job. Used by [`CreationService::stop`].
    fn cancel_all(&self) -> usize {
        let mut cancelled = Vec::new();
        {
            let mut jobs = self.jobs_write();
            for record in jobs.iter_mut().filter(|r| !r.job.is_terminal()) {
                record.token.cancel();
                record.job.status = JobStatus::Cancelled;
                record.job.completed_at = Some(Utc::now());
                cancelled.push(record.job.id);
            }
        }
        for id in &cancelled {
            self.emit_status(*id, JobStatus::Cancelled);
        }
        cancelled.len()
    }
}

// ================================================================
// Artifact writing
// ================================================================

async fn write_artifacts(
    job_dir: &Path,
    spec: &PluginSpecification,
    generated: &GeneratedPlugin,
) -> ForgeResult<()> {
    tokio::fs::create_dir_all(job_dir).await?;
    let manifest = manifest_for(spec);
    let manifest_text = toml::to_string_pretty(&manifest)
        .map_err(|err| ForgeError::Generation(format!("manifest serialization: {err}")))?;
    tokio::fs::write(job_dir.join("plugin.toml"), manifest_text).await?;

    for file in &generated.files {
        if !is_safe_relative(&file.path) {
            return Err(ForgeError::UnsafeArtifactPath(
                file.path.display().to_string(),
            ));
        }
        let dest = job_dir.join(&file.path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, &file.contents).await?;
    }
    Ok(())
}

fn manifest_for(spec: &PluginSpecification) -> PluginManifest {
    let mut manifest = PluginManifest::new(&spec.name, &spec.version);
    manifest.description = spec.description.clone();
    manifest.required_env_vars = spec.env_vars.clone();
    let mut dependencies: Vec<String> = spec.dependencies.keys().cloned().collect();
    dependencies.sort();
    manifest.dependencies = dependencies;
    manifest
}

/// A generated path may only descend from the job directory.
fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// ================================================================
// Tests
// ================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_service_contract() {
        let config = ForgeConfig::default();
        assert_eq!(config.max_concurrent_jobs, 10);
        assert_eq!(config.max_jobs_per_hour, 10);
        assert_eq!(config.job_timeout, Duration::from_secs(1800));
        assert_eq!(config.command_timeout, Duration::from_secs(300));
        assert_eq!(config.max_output_bytes, 1_048_576);
        assert_eq!(config.retention, Duration::from_secs(604_800));
        assert_eq!(config.build_command, vec!["cargo", "build"]);
    }

    #[test]
    fn generated_paths_must_stay_inside_the_job_dir() {
        assert!(is_safe_relative(Path::new("src/lib.rs")));
        assert!(is_safe_relative(Path::new("./Cargo.toml")));
        assert!(!is_safe_relative(Path::new("../outside.rs")));
        assert!(!is_safe_relative(Path::new("src/../../outside.rs")));
        assert!(!is_safe_relative(Path::new("/etc/passwd")));
        assert!(!is_safe_relative(Path::new("")));
    }

    #[test]
    fn manifest_carries_spec_metadata() {
        let mut spec = PluginSpecification::new("weather", "forecasts");
        spec.dependencies.insert("zazzle".to_string(), "2".to_string());
        spec.dependencies.insert("acme".to_string(), "1".to_string());
        let manifest = manifest_for(&spec);
        assert_eq!(manifest.name, "weather");
        assert_eq!(manifest.version, "0.1.0");
        assert_eq!(manifest.dependencies, vec!["acme", "zazzle"]);
    }
}
