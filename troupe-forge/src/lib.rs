//! Dynamic plugin creation for Troupe.
//!
//! Turns a [`PluginSpecification`] into an on-disk plugin tree through
//! an asynchronous job: code generation (behind the [`CodeGenerator`]
//! seam), artifact writing, then build, lint and test subprocesses.
//! Intake is rate- and concurrency-limited, every subprocess runs under
//! a deadline, and a watchdog fails jobs that outlive the overall
//! timeout.

mod error;
mod exec;
mod generate;
mod job;
mod service;
mod spec;

pub use error::{ForgeError, ForgeResult};
pub use generate::{CodeGenerator, GeneratedFile, GeneratedPlugin, GenerationRequest};
pub use job::{CreationJob, JobPhase, JobStatus};
pub use service::{CreationService, ForgeConfig};
pub use spec::{validate_name, ComponentSpec, PluginSpecification, MAX_NAME_LEN};
