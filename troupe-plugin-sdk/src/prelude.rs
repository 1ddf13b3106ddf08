//! Convenience re-exports for plugin authors.

pub use crate::error::{SdkError, SdkResult};
pub use crate::traits::{Action, Evaluator, HostApi, Plugin, Provider, Service};
pub use crate::types::{
    ActionContext, ActionDefinition, ActionOutcome, EnvVarRequirement, EnvVarType,
    EvaluatorContext, EvaluatorDefinition, PluginManifest, ProviderContext, ProviderDefinition,
    ProviderPayload,
};
