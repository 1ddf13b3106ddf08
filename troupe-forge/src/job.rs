//! Creation job records and their state machine.
//!
//! pending -> running -> completed | failed | cancelled. A job that hits
//! the overall timeout is failed, not a separate state; the "timed out"
//! wording lives in its error list.

use crate::spec::PluginSpecification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use troupe_types::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal jobs never change state again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a running job currently is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Generating,
    Writing,
    Building,
    Linting,
    Testing,
    Done,
}

impl JobPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Writing => "writing",
            Self::Building => "building",
            Self::Linting => "linting",
            Self::Testing => "testing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One plugin-creation job, as handed back by snapshot accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationJob {
    pub id: JobId,
    pub spec: PluginSpecification,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Phase failures and skip notes, in the order they happened.
    pub errors: Vec<String>,
    /// Captured subprocess output, byte capped.
    pub logs: String,
    /// Where the artifacts were written, once the writing phase ran.
    pub output_dir: Option<PathBuf>,
    pub current_iteration: u32,
}

impl CreationJob {
    pub(crate) fn new(id: JobId, spec: PluginSpecification) -> Self {
        Self {
            id,
            spec,
            status: JobStatus::Pending,
            phase: JobPhase::Generating,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            errors: Vec::new(),
            logs: String::new(),
            output_dir: None,
            current_iteration: 0,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ================================================================
// Tests
// ================================================================
