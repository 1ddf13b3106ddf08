//! Error types for environment variable management.

use thiserror::Error;

/// Result type for env var operations.
pub type EnvResult<T> = Result<T, EnvError>;

#[derive(Debug, Error)]
pub enum EnvError {
    /// The agent has no world record to file requirements under.
    #[error("no world context for agent")]
    NoContext,

    /// A store write failed. Nothing was mirrored.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// No requirements tracked for this plugin.
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    /// The plugin never declared this variable.
    #[error("unknown variable '{var}' for plugin '{plugin}'")]
    UnknownVar { plugin: String, var: String },
}
