//! The code-generation seam.
//!
//! The service never talks to a model directly; it hands a
//! [`GenerationRequest`] to whatever [`CodeGenerator`] the host wired in
//! and gets back files to write. Tests plug in stubs.

use crate::error::ForgeResult;
use crate::spec::PluginSpecification;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Produces plugin source from a specification.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> ForgeResult<GeneratedPlugin>;
}

/// What the generator is asked to build.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub spec: PluginSpecification,
    /// A rendered description of `spec`, ready to prompt a model with.
    pub prompt: String,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(spec: &PluginSpecification) -> Self {
        Self {
            spec: spec.clone(),
            prompt: render_prompt(spec),
        }
    }
}

/// One file the generator wants written, relative to the job directory.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedPlugin {
    pub files: Vec<GeneratedFile>,
}

fn render_prompt(spec: &PluginSpecification) -> String {
    let mut prompt = format!(
        "Create an agent plugin named \"{}\" (version {}).\n",
        spec.name, spec.version
    );
    if !spec.description.is_empty() {
        let _ = writeln!(prompt, "Purpose: {}", spec.description);
    }
    for (label, components) in [
        ("Actions", &spec.actions),
        ("Providers", &spec.providers),
        ("Evaluators", &spec.evaluators),
        ("Services", &spec.services),
    ] {
        if components.is_empty() {
            continue;
        }
        let _ = writeln!(prompt, "\n{label}:");
        for component in components {
            let _ = writeln!(prompt, "- {}: {}", component.name, component.description);
        }
    }
    if !spec.dependencies.is_empty() {
        let _ = writeln!(prompt, "\nDependencies:");
        let mut names: Vec<_> = spec.dependencies.keys().collect();
        names.sort();
        for name in names {
            let _ = writeln!(prompt, "- {name} = \"{}\"", spec.dependencies[name]);
        }
    }
    if !spec.env_vars.is_empty() {
        let _ = writeln!(prompt, "\nEnvironment variables:");
        for var in &spec.env_vars {
            let requirement = if var.required { "required" } else { "optional" };
            let _ = writeln!(
                prompt,
                "- {} ({}, {requirement}): {}",
                var.name, var.var_type, var.description
            );
        }
    }
    prompt
}

// ================================================================
// Tests
// ================================================================
