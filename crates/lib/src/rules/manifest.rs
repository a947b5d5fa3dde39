//! On-disk format of `weft.toml`.
//!
//! ```toml
//! [project]
//! name = "Demo"
//!
//! [[targets]]
//! name = "Game"
//! configurations = ["Debug", "Release"]
//! platforms = ["Windows"]
//! architectures = ["x64"]
//! modules = ["Core"]
//!
//! [[modules]]
//! name = "Core"
//! folder = "Source/Core"
//! sources = ["core.c"]
//! outputs = ["core.o"]
//! command = "cc -c $${module_dir}/core.c -o $${out}/core.o"
//! ```
//!
//! Folders are relative to the manifest's directory and default to it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{Configuration, Module, Project, Target, TargetType};
use crate::platform::{Architecture, Platform};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestFile {
  #[serde(default)]
  pub project: ProjectSection,
  #[serde(default)]
  pub targets: Vec<TargetSection>,
  #[serde(default)]
  pub modules: Vec<ModuleSection>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
  pub name: Option<String>,
  #[serde(default)]
  pub managed_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
  pub name: String,
  #[serde(default, rename = "type")]
  pub target_type: TargetType,
  pub folder: Option<PathBuf>,
  pub configurations: Vec<Configuration>,
  pub platforms: Vec<Platform>,
  pub architectures: Vec<Architecture>,
  #[serde(default)]
  pub modules: Vec<String>,
  pub pre_build: Option<String>,
  pub post_build: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSection {
  pub name: String,
  pub folder: Option<PathBuf>,
  #[serde(default)]
  pub sources: Vec<PathBuf>,
  #[serde(default)]
  pub outputs: Vec<PathBuf>,
  pub command: Option<String>,
  pub bindings_command: Option<String>,
  #[serde(default)]
  pub dependencies: Vec<String>,
  #[serde(default)]
  pub shared: bool,
}

impl ManifestFile {
  /// Convert into rule types, resolving folders against `base_dir`.
  pub fn into_rules(self, base_dir: &Path) -> (Project, Vec<Target>, Vec<Module>) {
    let project_name = self.project.name.unwrap_or_else(|| {
      base_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
    });
    let project = Project {
      name: project_name,
      folder: base_dir.to_path_buf(),
      managed_only: self.project.managed_only,
    };

    let targets = self
      .targets
      .into_iter()
      .map(|t| Target {
        name: t.name,
        target_type: t.target_type,
        folder: resolve_folder(base_dir, t.folder),
        configurations: t.configurations,
        platforms: t.platforms,
        architectures: t.architectures,
        modules: t.modules,
        pre_build: t.pre_build,
        post_build: t.post_build,
      })
      .collect();

    let modules = self
      .modules
      .into_iter()
      .map(|m| Module {
        name: m.name,
        folder: resolve_folder(base_dir, m.folder),
        sources: m.sources,
        outputs: m.outputs,
        command: m.command,
        bindings_command: m.bindings_command,
        dependencies: m.dependencies,
        shared: m.shared,
      })
      .collect();

    (project, targets, modules)
  }
}

fn resolve_folder(base_dir: &Path, folder: Option<PathBuf>) -> PathBuf {
  match folder {
    Some(folder) if folder.is_absolute() => folder,
    Some(folder) => base_dir.join(folder),
    None => base_dir.to_path_buf(),
  }
}
