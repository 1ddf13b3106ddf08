//! Error types for the plugin SDK.

use thiserror::Error;

/// Result type for SDK operations.
pub type SdkResult<T> = Result<T, SdkError>;

/// Errors a plugin or its components can surface to the host.
#[derive(Debug, Error)]
pub enum SdkError {
    /// A component failed while executing.
    #[error("execution error: {0}")]
    Execution(String),

    /// The plugin is missing configuration it needs to run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A service failed to shut down cleanly.
    #[error("service '{service_type}' failed to stop: {reason}")]
    ServiceStop {
        service_type: String,
        reason: String,
    },

    /// Manifest file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest file could not be parsed.
    #[error("manifest error: {0}")]
    Manifest(#[from] toml::de::Error),
}
