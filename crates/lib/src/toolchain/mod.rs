//! Toolchains turn build jobs into graph tasks.
//!
//! The graph never knows what a compiler does; a [`Toolchain`] decides which
//! commands a job needs and adds them as tasks. A [`ToolchainProvider`]
//! reports which (platform, architecture) pairs can be built on this host
//! and hands out the toolchain for each.

pub mod shell;
pub mod template;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::graph::{GraphError, TaskGraph, TaskId};
use crate::model::Configuration;
use crate::platform::{Architecture, Platform};
use crate::resolve::BuildJob;
use crate::rules::RuleRepository;

pub use shell::{HostToolchainProvider, ShellToolchain};
pub use template::TemplateError;

#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("target {target} references unknown module {module}")]
  UnknownModule { target: String, module: String },

  #[error("module dependency cycle in target {target} at module {module}")]
  ModuleCycle { target: String, module: String },

  #[error("invalid command template for module {module}: {source}")]
  Template {
    module: String,
    #[source]
    source: TemplateError,
  },

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Turns one build job into tasks.
pub trait Toolchain: Send + Sync + fmt::Debug {
  fn name(&self) -> &str;

  /// Add the job's tasks to `graph`, returning the ids it created or reused.
  fn populate(
    &self,
    job: &BuildJob,
    rules: &dyn RuleRepository,
    graph: &mut TaskGraph,
    layout: &BuildLayout,
  ) -> Result<Vec<TaskId>, ToolchainError>;
}

/// Host capabilities and toolchain lookup.
pub trait ToolchainProvider {
  /// The toolchain for a pair, if one is installed.
  fn get_toolchain(&self, platform: Platform, arch: Architecture) -> Option<Arc<dyn Toolchain>>;

  /// Whether modules on this platform can be built and loaded separately.
  fn supports_modular_build(&self, platform: Platform) -> bool;

  /// Whether the pair can be built on this host at all.
  fn is_supported(&self, platform: Platform, arch: Architecture) -> bool;
}

/// Where build artifacts go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
  root: PathBuf,
}

impl BuildLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// `<root>/<target>/<platform>/<arch>/<config>`
  pub fn job_dir(&self, target: &str, platform: Platform, arch: Architecture, configuration: Configuration) -> PathBuf {
    self
      .root
      .join(target)
      .join(platform.as_str())
      .join(arch.as_str())
      .join(configuration.as_str())
  }

  /// `<root>/shared/<module>/<platform>/<arch>`, independent of target and
  /// configuration.
  pub fn shared_dir(&self, module: &str, platform: Platform, arch: Architecture) -> PathBuf {
    self
      .root
      .join("shared")
      .join(module)
      .join(platform.as_str())
      .join(arch.as_str())
  }
}
