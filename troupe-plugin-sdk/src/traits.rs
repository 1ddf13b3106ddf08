//! The traits a plugin implements to hand the host its capabilities.
//!
//! All traits are object-safe; the host stores components as
//! `Arc<dyn Action>` (etc.) and identifies them by pointer identity, so the
//! same `Arc` registered twice is one component, and two components with
//! the same name are still two components.

use crate::types::{
    ActionContext, ActionDefinition, ActionOutcome, EvaluatorContext, EvaluatorDefinition,
    PluginManifest, ProviderContext, ProviderDefinition, ProviderPayload,
};
use crate::SdkResult;
use async_trait::async_trait;
use std::sync::Arc;
use troupe_types::AgentId;

/// Something the agent can do.
#[async_trait]
pub trait Action: Send + Sync {
    fn definition(&self) -> &ActionDefinition;

    async fn execute(&self, cx: &ActionContext) -> SdkResult<ActionOutcome>;
}

/// A context supplier consulted while composing agent state.
#[async_trait]
pub trait Provider: Send + Sync {
    fn definition(&self) -> &ProviderDefinition;

    async fn provide(&self, cx: &ProviderContext) -> SdkResult<ProviderPayload>;
}

/// A post-interaction assessor.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn definition(&self) -> &EvaluatorDefinition;

    async fn evaluate(&self, cx: &EvaluatorContext) -> SdkResult<()>;
}

/// A long-running background worker owned by a plugin.
///
/// Services are registered on the host keyed by `service_type` and stopped
/// when their plugin unloads. A start failure only skips that one service;
/// a stop failure aborts the unload, so implementations should release
/// resources before reporting errors.
#[async_trait]
pub trait Service: Send + Sync {
    /// Stable key this service registers under (e.g. "browser", "pdf").
    fn service_type(&self) -> &str;

    /// Called when the owning plugin loads, before the service is
    /// registered on the host.
    async fn start(&self, host: &dyn HostApi) -> SdkResult<()> {
        let _ = host;
        Ok(())
    }

    async fn stop(&self) -> SdkResult<()>;
}

/// The narrow host surface handed to [`Plugin::init`].
pub trait HostApi: Send + Sync {
    /// Resolves a setting: character secrets, then character settings,
    /// then the host's runtime settings mirror.
    fn setting(&self, key: &str) -> Option<String>;

    fn agent_id(&self) -> AgentId;
}

/// A unit of installable capability.
///
/// The component accessors have empty defaults so a plugin only spells out
/// what it actually provides.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> &PluginManifest;

    fn actions(&self) -> Vec<Arc<dyn Action>> {
        Vec::new()
    }

    fn providers(&self) -> Vec<Arc<dyn Provider>> {
        Vec::new()
    }

    fn evaluators(&self) -> Vec<Arc<dyn Evaluator>> {
        Vec::new()
    }

    fn services(&self) -> Vec<Arc<dyn Service>> {
        Vec::new()
    }

    /// Called once after the plugin's components are registered.
    /// Returning an error aborts the load and rolls the components back.
    async fn init(&self, host: &dyn HostApi) -> SdkResult<()> {
        let _ = host;
        Ok(())
    }
}
