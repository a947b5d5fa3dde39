//! Build rule types: projects, targets and modules.
//!
//! These are produced by a [`RuleRepository`](crate::rules::RuleRepository)
//! and stay immutable for the duration of a build run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::platform::{Architecture, Platform};
use crate::util::named::named_enum;

named_enum! {
  /// Build configurations, from least to most optimized.
  pub enum Configuration: "configuration" {
    Debug => "Debug",
    Development => "Development",
    Release => "Release",
    Shipping => "Shipping",
  }
}

/// How a target is compiled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
  /// Native code compiled per configuration/platform/architecture.
  #[default]
  Native,
  /// Managed-runtime code; always built through a single uniform path.
  Managed,
}

impl TargetType {
  pub fn as_str(&self) -> &'static str {
    match self {
      TargetType::Native => "native",
      TargetType::Managed => "managed",
    }
  }
}

/// The project being built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
  pub name: String,
  /// Absolute project folder; targets outside it are not part of the project.
  pub folder: PathBuf,
  /// The project contains only managed-runtime code of its own.
  pub managed_only: bool,
}

impl Project {
  pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      folder: folder.into(),
      managed_only: false,
    }
  }

  /// Check whether `folder` lies inside the project folder.
  ///
  /// Both paths are canonicalized when they exist so that symlinks and `..`
  /// segments do not defeat the prefix check.
  pub fn contains(&self, folder: &Path) -> bool {
    let root = dunce::canonicalize(&self.folder).unwrap_or_else(|_| self.folder.clone());
    let folder = dunce::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf());
    folder.starts_with(root)
  }
}

/// A named build unit (application, library, tool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
  pub name: String,
  pub target_type: TargetType,
  pub folder: PathBuf,
  /// Declared configurations, in declaration order.
  pub configurations: Vec<Configuration>,
  /// Declared platforms, in declaration order.
  pub platforms: Vec<Platform>,
  /// Declared architectures, in declaration order.
  pub architectures: Vec<Architecture>,
  /// Modules linked into this target.
  pub modules: Vec<String>,
  /// Shell command run once before the target's tasks are created.
  pub pre_build: Option<String>,
  /// Shell command run once after the graph has executed.
  pub post_build: Option<String>,
}

impl Target {
  /// A native target with the given support sets and no modules.
  pub fn new(
    name: impl Into<String>,
    folder: impl Into<PathBuf>,
    configurations: Vec<Configuration>,
    platforms: Vec<Platform>,
    architectures: Vec<Architecture>,
  ) -> Self {
    Self {
      name: name.into(),
      target_type: TargetType::Native,
      folder: folder.into(),
      configurations,
      platforms,
      architectures,
      modules: Vec::new(),
      pre_build: None,
      post_build: None,
    }
  }

  pub fn with_modules<I, S>(mut self, modules: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.modules = modules.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_type(mut self, target_type: TargetType) -> Self {
    self.target_type = target_type;
    self
  }

  pub fn is_managed(&self) -> bool {
    self.target_type == TargetType::Managed
  }
}

/// A unit of source code compiled into one or more targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
  pub name: String,
  pub folder: PathBuf,
  /// Source files, relative to `folder`.
  pub sources: Vec<PathBuf>,
  /// Produced files, relative to the module's output directory.
  pub outputs: Vec<PathBuf>,
  /// Command compiling the module (full and managed builds).
  pub command: Option<String>,
  /// Command generating cross-language bindings only.
  pub bindings_command: Option<String>,
  /// Modules that must be built before this one.
  pub dependencies: Vec<String>,
  /// Output does not depend on the target or configuration, so identical
  /// work from different jobs collapses into one task.
  pub shared: bool,
}

impl Module {
  pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      folder: folder.into(),
      sources: Vec::new(),
      outputs: Vec::new(),
      command: None,
      bindings_command: None,
      dependencies: Vec::new(),
      shared: false,
    }
  }

  pub fn with_command(mut self, command: impl Into<String>) -> Self {
    self.command = Some(command.into());
    self
  }

  pub fn with_outputs<I, P>(mut self, outputs: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    self.outputs = outputs.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.dependencies = dependencies.into_iter().map(Into::into).collect();
    self
  }

  /// Absolute paths of the module's source files.
  pub fn source_paths(&self) -> Vec<PathBuf> {
    self.sources.iter().map(|s| self.folder.join(s)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  #[test]
  fn configuration_names() {
    assert_eq!("shipping".parse::<Configuration>().unwrap(), Configuration::Shipping);
    assert_eq!(Configuration::Debug.to_string(), "Debug");
    assert!("Profile".parse::<Configuration>().is_err());
  }

  #[test]
  fn target_type_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&TargetType::Managed).unwrap(), "\"managed\"");
  }

  #[test]
  fn project_contains_nested_folders() {
    let temp = TempDir::new().unwrap();
    let inner = temp.path().join("Source").join("Game");
    fs::create_dir_all(&inner).unwrap();

    let project = Project::new("Demo", temp.path());
    assert!(project.contains(&inner));
    assert!(project.contains(temp.path()));
  }

  #[test]
  fn project_rejects_outside_and_dotdot_escapes() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("project");
    let sibling = temp.path().join("engine");
    fs::create_dir_all(&root).unwrap();
    fs::create_dir_all(&sibling).unwrap();

    let project = Project::new("Demo", &root);
    assert!(!project.contains(&sibling));
    assert!(!project.contains(&root.join("..").join("engine")));
  }

  #[test]
  fn module_source_paths_are_absolute() {
    let module = Module {
      sources: vec![PathBuf::from("a.c"), PathBuf::from("b.c")],
      ..Module::new("Core", "/work/Core")
    };
    assert_eq!(
      module.source_paths(),
      vec![PathBuf::from("/work/Core/a.c"), PathBuf::from("/work/Core/b.c")]
    );
  }
}
