//! Build matrix resolution.
//!
//! Expands a target's declared configurations, platforms and architectures,
//! narrowed by caller filters, into validated [`BuildJob`]s. Resolution is a
//! pure function of its inputs: it either returns every job or every
//! validation error, and never touches the task graph.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Configuration, Project, Target};
use crate::platform::{Architecture, Platform};
use crate::toolchain::{Toolchain, ToolchainProvider};

/// How a job's modules are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
  /// Compile every module.
  Full,
  /// Only generate cross-language bindings.
  BindingsOnly,
  /// Managed-runtime target, built uniformly.
  Managed,
}

impl fmt::Display for BuildMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BuildMode::Full => "full",
      BuildMode::BindingsOnly => "bindings-only",
      BuildMode::Managed => "managed",
    };
    f.write_str(s)
  }
}

/// One validated (target, configuration, platform, architecture) tuple.
#[derive(Clone)]
pub struct BuildJob {
  pub target: Arc<Target>,
  pub configuration: Configuration,
  pub platform: Platform,
  pub architecture: Architecture,
  pub toolchain: Arc<dyn Toolchain>,
  pub mode: BuildMode,
}

impl BuildJob {
  /// `Game [Debug Windows x64]`
  pub fn describe(&self) -> String {
    format!(
      "{} [{} {} {}]",
      self.target.name, self.configuration, self.platform, self.architecture
    )
  }
}

impl fmt::Debug for BuildJob {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildJob")
      .field("target", &self.target.name)
      .field("configuration", &self.configuration)
      .field("platform", &self.platform)
      .field("architecture", &self.architecture)
      .field("toolchain", &self.toolchain.name())
      .field("mode", &self.mode)
      .finish()
  }
}

/// Caller restrictions on the matrix. `None` means the full declared set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFilters {
  pub configurations: Option<Vec<Configuration>>,
  pub platforms: Option<Vec<Platform>>,
  pub architectures: Option<Vec<Architecture>>,
  pub bindings_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("Target {target} does not support {value} configuration.")]
  UnsupportedConfiguration { target: String, value: Configuration },

  #[error("Target {target} does not support {value} platform.")]
  UnsupportedPlatform { target: String, value: Platform },

  #[error("Target {target} does not support {value} architecture.")]
  UnsupportedArchitecture { target: String, value: Architecture },

  #[error("Unknown target {0}.")]
  UnknownTarget(String),
}

/// Every validation error of a resolution, headline first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
  pub fn first(&self) -> Option<&ValidationError> {
    self.0.first()
  }

  pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for ValidationErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0.as_slice() {
      [] => f.write_str("no validation errors"),
      [only] => write!(f, "{only}"),
      [first, rest @ ..] => write!(f, "{first} (and {} more)", rest.len()),
    }
  }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
  fn from(e: ValidationError) -> Self {
    ValidationErrors(vec![e])
  }
}

/// Check every filter value against the target's declared sets.
///
/// Errors come out grouped by dimension (configurations, platforms,
/// architectures), each in filter order.
pub fn validate(target: &Target, filters: &BuildFilters) -> Vec<ValidationError> {
  let mut errors = Vec::new();

  for &value in filters.configurations.iter().flatten() {
    if !target.configurations.contains(&value) {
      errors.push(ValidationError::UnsupportedConfiguration {
        target: target.name.clone(),
        value,
      });
    }
  }
  for &value in filters.platforms.iter().flatten() {
    if !target.platforms.contains(&value) {
      errors.push(ValidationError::UnsupportedPlatform {
        target: target.name.clone(),
        value,
      });
    }
  }
  for &value in filters.architectures.iter().flatten() {
    if !target.architectures.contains(&value) {
      errors.push(ValidationError::UnsupportedArchitecture {
        target: target.name.clone(),
        value,
      });
    }
  }

  errors
}

/// Pick how a job is built.
pub fn select_mode(
  target: &Target,
  filters: &BuildFilters,
  provider: &dyn ToolchainProvider,
  project: &Project,
  platform: Platform,
) -> BuildMode {
  if target.is_managed() {
    BuildMode::Managed
  } else if filters.bindings_only || (project.managed_only && provider.supports_modular_build(platform)) {
    BuildMode::BindingsOnly
  } else {
    BuildMode::Full
  }
}

/// Keep declared values that pass the filter, in declared order.
fn selected<T: Copy + PartialEq>(declared: &[T], filter: Option<&Vec<T>>) -> Vec<T> {
  declared
    .iter()
    .copied()
    .filter(|value| filter.is_none_or(|allowed| allowed.contains(value)))
    .collect()
}

/// Expand one target into jobs.
///
/// Tuples the provider cannot build on this host are skipped, as are
/// supported pairs with no installed toolchain.
pub fn expand(
  target: &Arc<Target>,
  filters: &BuildFilters,
  provider: &dyn ToolchainProvider,
  project: &Project,
) -> Result<Vec<BuildJob>, ValidationErrors> {
  let errors = validate(target, filters);
  if !errors.is_empty() {
    return Err(ValidationErrors(errors));
  }

  let configurations = selected(&target.configurations, filters.configurations.as_ref());
  let platforms = selected(&target.platforms, filters.platforms.as_ref());
  let architectures = selected(&target.architectures, filters.architectures.as_ref());

  let mut jobs = Vec::new();
  for &configuration in &configurations {
    for &platform in &platforms {
      for &architecture in &architectures {
        if !provider.is_supported(platform, architecture) {
          debug!(
            target = %target.name,
            platform = %platform,
            architecture = %architecture,
            "skipping unsupported platform"
          );
          continue;
        }
        let Some(toolchain) = provider.get_toolchain(platform, architecture) else {
          warn!(
            target = %target.name,
            platform = %platform,
            architecture = %architecture,
            "no toolchain installed, skipping"
          );
          continue;
        };

        jobs.push(BuildJob {
          target: target.clone(),
          configuration,
          platform,
          architecture,
          toolchain,
          mode: select_mode(target, filters, provider, project, platform),
        });
      }
    }
  }

  debug!(target = %target.name, jobs = jobs.len(), "expanded build matrix");
  Ok(jobs)
}

/// Expand several targets, in order, collecting every validation error
/// before failing.
pub fn expand_all(
  targets: &[Arc<Target>],
  filters: &BuildFilters,
  provider: &dyn ToolchainProvider,
  project: &Project,
) -> Result<Vec<BuildJob>, ValidationErrors> {
  let mut jobs = Vec::new();
  let mut errors = Vec::new();

  for target in targets {
    match expand(target, filters, provider, project) {
      Ok(mut target_jobs) => jobs.append(&mut target_jobs),
      Err(ValidationErrors(mut target_errors)) => errors.append(&mut target_errors),
    }
  }

  if errors.is_empty() {
    Ok(jobs)
  } else {
    Err(ValidationErrors(errors))
  }
}
