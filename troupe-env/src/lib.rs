//! Environment variable management for agent plugins.
//!
//! Plugins declare the variables they need in their manifests. This crate
//! collects those declarations per agent, tracks each variable through a
//! small lifecycle (missing, generating, validating, valid, invalid),
//! generates values where the type permits it, and validates them with
//! pluggable per-type strategies.
//!
//! State is persisted in the agent's world record before anything else
//! observes it; validated values are then mirrored into the shared
//! settings map plugins read through the host.

pub mod error;
pub mod manager;
pub mod validate;

pub use error::{EnvError, EnvResult};
pub use manager::{
    EnvMirror, EnvVarManager, EnvVarPatch, EnvVarState, EnvVarStatus, ScanReport,
    ENV_REQUIREMENTS_SECTION,
};
pub use validate::{Strategy, StrategyRegistry, ValidationOutcome};
