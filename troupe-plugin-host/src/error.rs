//! Error types for the plugin host.

use crate::registry::PluginStatus;
use thiserror::Error;
use troupe_types::PluginId;

pub type PluginResult<T> = Result<T, PluginError>;

/// Lifecycle precondition violations and load/unload failures.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    NotFound(PluginId),

    #[error("plugin name already registered: {0}")]
    DuplicateName(String),

    /// The unit's status blocks an unforced load.
    #[error("plugin is not loadable while {status}")]
    NotReady { status: PluginStatus },

    /// The internal plugin reference was cleared.
    #[error("plugin has no stored instance")]
    NoPluginInstance,

    /// Components present at host construction never unload.
    #[error("original plugins cannot be unloaded")]
    CannotUnloadOriginal,

    #[error("plugin needs configuration, missing: {}", .missing.join(", "))]
    NeedsConfiguration { missing: Vec<String> },

    /// The plugin's init hook failed; its components were rolled back.
    #[error("plugin initialization failed: {0}")]
    InitFailed(String),

    /// A service refused to stop; the unload was aborted.
    #[error("service '{service}' failed to stop: {message}")]
    ServiceStopFailed { service: String, message: String },
}

/// Failures while resolving, fetching, or loading installed plugins.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("plugin not found in registry: {0}")]
    NotFoundInRegistry(String),

    #[error("plugin is not installed: {0}")]
    NotInstalled(String),

    /// The catalog entry has neither package nor repository coordinates.
    #[error("no install transport for plugin: {0}")]
    NoTransport(String),

    /// The transport tool exited non-zero; the message carries its output.
    #[error("install failed: {0}")]
    InstallFailed(String),

    #[error("plugin needs configuration, missing: {}", .missing.join(", "))]
    NeedsConfiguration { missing: Vec<String> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lifecycle(#[from] PluginError),
}
