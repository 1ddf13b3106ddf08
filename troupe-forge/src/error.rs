//! Error types for the creation service.

use thiserror::Error;
use troupe_types::JobId;

pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    /// The requested plugin name failed the path-safety format check.
    #[error("invalid plugin name: {0}")]
    InvalidName(String),

    /// Too many jobs were created inside the trailing hour.
    #[error("creation rate limit exceeded: {max} jobs per hour")]
    RateLimitExceeded { max: usize },

    /// Too many jobs are already pending or running.
    #[error("concurrency limit exceeded: {max} active jobs")]
    ConcurrencyLimitExceeded { max: usize },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The code generator refused or produced nothing usable.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A generated file path would land outside the job directory.
    #[error("unsafe artifact path: {0}")]
    UnsafeArtifactPath(String),
}
