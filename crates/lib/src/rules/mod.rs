//! Rule repository: the declared targets and modules of a project.
//!
//! Rules come from a static `weft.toml` manifest that is loaded and validated
//! up front. Nothing is discovered or loaded dynamically at build time.

pub mod manifest;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::MANIFEST_FILENAME;
use crate::model::{Module, Project, Target};

use manifest::ManifestFile;

/// Source of declared targets and modules.
pub trait RuleRepository {
  /// All declared targets, in declaration order.
  fn targets(&self) -> &[Target];

  /// All declared modules, in declaration order.
  fn modules(&self) -> &[Module];

  fn target(&self, name: &str) -> Option<&Target> {
    self.targets().iter().find(|t| t.name == name)
  }

  fn module(&self, name: &str) -> Option<&Module> {
    self.modules().iter().find(|m| m.name == name)
  }
}

/// Errors raised while loading or validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("target {0} is declared more than once")]
  DuplicateTarget(String),

  #[error("module {0} is declared more than once")]
  DuplicateModule(String),

  #[error("target {target} declares no {dimension}")]
  EmptySupportSet { target: String, dimension: &'static str },

  #[error("{owner} references unknown module {module}")]
  UnknownModule { owner: String, module: String },
}

/// Rules loaded from a `weft.toml` manifest.
#[derive(Debug, Clone)]
pub struct ManifestRules {
  project: Project,
  targets: Vec<Target>,
  modules: Vec<Module>,
}

impl ManifestRules {
  /// Build a validated rule set.
  pub fn new(project: Project, targets: Vec<Target>, modules: Vec<Module>) -> Result<Self, ManifestError> {
    validate(&targets, &modules)?;
    Ok(Self {
      project,
      targets,
      modules,
    })
  }

  /// Load `weft.toml` from a project folder.
  pub fn load_project(folder: &Path) -> Result<Self, ManifestError> {
    Self::load(&folder.join(MANIFEST_FILENAME))
  }

  /// Load a manifest file; folders resolve against the file's directory.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base_dir = dunce::canonicalize(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());
    Self::parse(&content, &base_dir)
  }

  /// Parse manifest text, resolving folders against `base_dir`.
  pub fn parse(content: &str, base_dir: &Path) -> Result<Self, ManifestError> {
    let file: ManifestFile = toml::from_str(content)?;
    let (project, targets, modules) = file.into_rules(base_dir);
    debug!(
      project = %project.name,
      targets = targets.len(),
      modules = modules.len(),
      "loaded manifest"
    );
    Self::new(project, targets, modules)
  }

  pub fn project(&self) -> &Project {
    &self.project
  }
}

impl RuleRepository for ManifestRules {
  fn targets(&self) -> &[Target] {
    &self.targets
  }

  fn modules(&self) -> &[Module] {
    &self.modules
  }
}

fn validate(targets: &[Target], modules: &[Module]) -> Result<(), ManifestError> {
  let mut module_names = HashSet::new();
  for module in modules {
    if !module_names.insert(module.name.as_str()) {
      return Err(ManifestError::DuplicateModule(module.name.clone()));
    }
  }

  for module in modules {
    for dep in &module.dependencies {
      if !module_names.contains(dep.as_str()) {
        return Err(ManifestError::UnknownModule {
          owner: format!("module {}", module.name),
          module: dep.clone(),
        });
      }
    }
  }

  let mut target_names = HashSet::new();
  for target in targets {
    if !target_names.insert(target.name.as_str()) {
      return Err(ManifestError::DuplicateTarget(target.name.clone()));
    }

    let empty = if target.configurations.is_empty() {
      Some("configurations")
    } else if target.platforms.is_empty() {
      Some("platforms")
    } else if target.architectures.is_empty() {
      Some("architectures")
    } else {
      None
    };
    if let Some(dimension) = empty {
      return Err(ManifestError::EmptySupportSet {
        target: target.name.clone(),
        dimension,
      });
    }

    for module in &target.modules {
      if !module_names.contains(module.as_str()) {
        return Err(ManifestError::UnknownModule {
          owner: format!("target {}", target.name),
          module: module.clone(),
        });
      }
    }
  }

  Ok(())
}
