//! SDK for building Troupe plugins.
//!
//! Plugin authors use this crate to implement the [`Plugin`] trait and hand
//! the host their components:
//! - [`Action`]: things the agent can do
//! - [`Provider`]: context suppliers consulted while composing state
//! - [`Evaluator`]: post-interaction assessors
//! - [`Service`]: long-running background workers keyed by service type
//!
//! A plugin also declares a [`PluginManifest`] (loadable from `plugin.toml`)
//! carrying its identity, dependencies and [`EnvVarRequirement`]s. The host
//! inspects requirements before load and gates plugins that still need
//! configuration.
//!
//! # Example
//!
//! ```
//! use troupe_plugin_sdk::prelude::*;
//!
//! struct Greeter {
//!     manifest: PluginManifest,
//! }
//!
//! impl Greeter {
//!     fn new() -> Self {
//!         Self { manifest: PluginManifest::new("greeter", "0.1.0") }
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl Plugin for Greeter {
//!     fn manifest(&self) -> &PluginManifest {
//!         &self.manifest
//!     }
//! }
//! ```

mod error;
pub mod prelude;
mod traits;
mod types;

pub use error::{SdkError, SdkResult};
pub use traits::{Action, Evaluator, HostApi, Plugin, Provider, Service};
pub use types::{
    ActionContext, ActionDefinition, ActionOutcome, EnvVarRequirement, EnvVarType,
    EvaluatorContext, EvaluatorDefinition, PluginManifest, ProviderContext, ProviderDefinition,
    ProviderPayload,
};
