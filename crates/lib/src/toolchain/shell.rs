//! The manifest-driven toolchain.
//!
//! Every module of a target becomes one shell task whose command comes from
//! the module's `command` (or `bindings_command` in bindings-only builds).
//! Commands run in the job's output directory, which is created on demand.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::template::{self, Placeholder, Resolver, TemplateError};
use super::{BuildLayout, Toolchain, ToolchainError, ToolchainProvider};
use crate::graph::{TaskAction, TaskGraph, TaskId, TaskSpec};
use crate::model::Module;
use crate::platform::{Architecture, HostPlatform, Platform};
use crate::resolve::{BuildJob, BuildMode};
use crate::rules::RuleRepository;

/// Runs module commands through the platform shell.
#[derive(Debug, Clone)]
pub struct ShellToolchain {
  name: String,
  timeout: Option<Duration>,
}

impl ShellToolchain {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      timeout: None,
    }
  }

  /// Kill module commands that run longer than `timeout`.
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }
}

impl Default for ShellToolchain {
  fn default() -> Self {
    Self::new("shell")
  }
}

/// Placeholder values for one module of one job.
struct JobResolver<'a> {
  job: &'a BuildJob,
  module: &'a Module,
  out: String,
  module_dir: String,
}

impl Resolver for JobResolver<'_> {
  fn resolve(&self, placeholder: Placeholder) -> Result<&str, TemplateError> {
    Ok(match placeholder {
      Placeholder::Out => &self.out,
      Placeholder::Target => &self.job.target.name,
      Placeholder::Module => &self.module.name,
      Placeholder::ModuleDir => &self.module_dir,
      Placeholder::Configuration => self.job.configuration.as_str(),
      Placeholder::Platform => self.job.platform.as_str(),
      Placeholder::Architecture => self.job.architecture.as_str(),
    })
  }
}

/// Modules reachable from the target, dependencies before dependents.
fn module_closure<'r>(job: &BuildJob, rules: &'r dyn RuleRepository) -> Result<Vec<&'r Module>, ToolchainError> {
  fn visit<'r>(
    name: &str,
    target: &str,
    rules: &'r dyn RuleRepository,
    visiting: &mut HashSet<String>,
    done: &mut HashSet<String>,
    order: &mut Vec<&'r Module>,
  ) -> Result<(), ToolchainError> {
    if done.contains(name) {
      return Ok(());
    }
    if !visiting.insert(name.to_string()) {
      return Err(ToolchainError::ModuleCycle {
        target: target.to_string(),
        module: name.to_string(),
      });
    }

    let module = rules.module(name).ok_or_else(|| ToolchainError::UnknownModule {
      target: target.to_string(),
      module: name.to_string(),
    })?;
    for dep in &module.dependencies {
      visit(dep, target, rules, visiting, done, order)?;
    }

    visiting.remove(name);
    done.insert(name.to_string());
    order.push(module);
    Ok(())
  }

  let mut visiting = HashSet::new();
  let mut done = HashSet::new();
  let mut order = Vec::new();
  for name in &job.target.modules {
    visit(name, &job.target.name, rules, &mut visiting, &mut done, &mut order)?;
  }
  Ok(order)
}

impl Toolchain for ShellToolchain {
  fn name(&self) -> &str {
    &self.name
  }

  fn populate(
    &self,
    job: &BuildJob,
    rules: &dyn RuleRepository,
    graph: &mut TaskGraph,
    layout: &BuildLayout,
  ) -> Result<Vec<TaskId>, ToolchainError> {
    let modules = module_closure(job, rules)?;

    // Task ids each module's dependents must wait for. A module without a
    // command forwards its own dependencies.
    let mut provides: HashMap<&str, Vec<TaskId>> = HashMap::new();
    let mut created = Vec::new();

    for module in modules {
      let mut after: Vec<TaskId> = module
        .dependencies
        .iter()
        .flat_map(|dep| provides.get(dep.as_str()).cloned().unwrap_or_default())
        .collect();
      after.sort();
      after.dedup();

      let command = match job.mode {
        BuildMode::Full | BuildMode::Managed => module.command.as_deref(),
        BuildMode::BindingsOnly => module.bindings_command.as_deref(),
      };
      let Some(command) = command else {
        debug!(module = %module.name, mode = %job.mode, "module has no command, skipping");
        provides.insert(&module.name, after);
        continue;
      };

      let (out_dir, name) = if module.shared {
        (
          layout.shared_dir(&module.name, job.platform, job.architecture),
          format!("{} [{} {}]", module.name, job.platform, job.architecture),
        )
      } else {
        (
          layout.job_dir(&job.target.name, job.platform, job.architecture, job.configuration),
          format!(
            "{}/{} [{} {} {}]",
            job.target.name, module.name, job.configuration, job.platform, job.architecture
          ),
        )
      };

      let resolver = JobResolver {
        job,
        module,
        out: out_dir.to_string_lossy().into_owned(),
        module_dir: module.folder.to_string_lossy().into_owned(),
      };
      let cmd = template::substitute(command, &resolver).map_err(|source| ToolchainError::Template {
        module: module.name.clone(),
        source,
      })?;

      let sources = module.source_paths();
      let outputs: Vec<PathBuf> = match job.mode {
        BuildMode::BindingsOnly => Vec::new(),
        BuildMode::Full | BuildMode::Managed => module.outputs.iter().map(|o| out_dir.join(o)).collect(),
      };
      let cost = u32::try_from(sources.len()).unwrap_or(u32::MAX).max(1);

      let action = TaskAction::Cmd {
        cmd,
        cwd: Some(out_dir),
        env: Default::default(),
        timeout: self.timeout,
      };
      let spec = TaskSpec::new(name, action)
        .inputs(sources)
        .outputs(outputs)
        .after(after)
        .cost(cost)
        .message(format!("{} {}", job.mode, module.name));

      let id = graph.add_task(spec)?;
      provides.insert(&module.name, vec![id]);
      created.push(id);
    }

    debug!(job = %job.describe(), tasks = created.len(), "populated job");
    Ok(created)
  }
}

/// Builds for the machine it runs on.
#[derive(Debug, Clone)]
pub struct HostToolchainProvider {
  toolchain: Arc<dyn Toolchain>,
  supported: Vec<(Platform, Architecture)>,
}

impl HostToolchainProvider {
  /// Support the host pair and its architecture-neutral counterpart.
  pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
    let supported = match HostPlatform::current() {
      Some(host) => vec![(host.platform, host.arch), (host.platform, Architecture::AnyCpu)],
      None => Vec::new(),
    };
    Self { toolchain, supported }
  }

  /// Also build `platform`/`arch` with the same toolchain.
  pub fn with_platform(mut self, platform: Platform, arch: Architecture) -> Self {
    if !self.supported.contains(&(platform, arch)) {
      self.supported.push((platform, arch));
    }
    self
  }

  pub fn supported(&self) -> &[(Platform, Architecture)] {
    &self.supported
  }
}

impl ToolchainProvider for HostToolchainProvider {
  fn get_toolchain(&self, platform: Platform, arch: Architecture) -> Option<Arc<dyn Toolchain>> {
    self.is_supported(platform, arch).then(|| self.toolchain.clone())
  }

  fn supports_modular_build(&self, platform: Platform) -> bool {
    platform.is_desktop()
  }

  fn is_supported(&self, platform: Platform, arch: Architecture) -> bool {
    self.supported.contains(&(platform, arch))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Configuration, Project, Target};
  use crate::rules::ManifestRules;

  fn job(target: Target, configuration: Configuration, mode: BuildMode) -> BuildJob {
    BuildJob {
      target: Arc::new(target),
      configuration,
      platform: Platform::Linux,
      architecture: Architecture::X64,
      toolchain: Arc::new(ShellToolchain::default()),
      mode,
    }
  }

  fn game() -> Target {
    Target::new(
      "Game",
      "/p/Source/Game",
      vec![Configuration::Debug, Configuration::Release],
      vec![Platform::Linux],
      vec![Architecture::X64],
    )
    .with_modules(["Game"])
  }

  fn rules(modules: Vec<Module>) -> ManifestRules {
    ManifestRules::new(Project::new("Demo", "/p"), vec![game()], modules).unwrap()
  }

  fn layout() -> BuildLayout {
    BuildLayout::new("/p/.weft/intermediate")
  }

  #[test]
  fn dependencies_become_predecessors() {
    let rules = rules(vec![
      Module::new("Core", "/p/Source/Core")
        .with_command("cc -c $${module_dir}/core.c -o $${out}/core.o")
        .with_outputs(["core.o"]),
      Module::new("Game", "/p/Source/Game")
        .with_command("cc $${out}/core.o -o $${out}/game")
        .with_outputs(["game"])
        .with_dependencies(["Core"]),
    ]);
    let mut graph = TaskGraph::new("/p/.weft/intermediate");

    let ids = ShellToolchain::default()
      .populate(&job(game(), Configuration::Debug, BuildMode::Full), &rules, &mut graph, &layout())
      .unwrap();

    assert_eq!(ids.len(), 2);
    let core = graph.task(ids[0]).unwrap();
    let game = graph.task(ids[1]).unwrap();
    assert_eq!(core.name, "Game/Core [Debug Linux x64]");
    assert!(game.after.contains(&core.id));
    assert_eq!(
      core.outputs,
      vec![PathBuf::from("/p/.weft/intermediate/Game/Linux/x64/Debug/core.o")]
    );
    match &core.action {
      TaskAction::Cmd { cmd, cwd, .. } => {
        assert_eq!(
          cmd,
          "cc -c /p/Source/Core/core.c -o /p/.weft/intermediate/Game/Linux/x64/Debug/core.o"
        );
        assert_eq!(cwd.as_deref(), Some(layout().job_dir("Game", Platform::Linux, Architecture::X64, Configuration::Debug).as_path()));
      }
      other => panic!("unexpected action {other:?}"),
    }
  }

  #[test]
  fn shared_module_collapses_across_configurations() {
    let mut shared = Module::new("Core", "/p/Source/Core")
      .with_command("cc -c core.c -o $${out}/core.o")
      .with_outputs(["core.o"]);
    shared.shared = true;
    let rules = rules(vec![
      shared,
      Module::new("Game", "/p/Source/Game")
        .with_command("ld $${out}/game -DCONFIG=$${configuration}")
        .with_dependencies(["Core"]),
    ]);
    let mut graph = TaskGraph::new("/p/.weft/intermediate");
    let toolchain = ShellToolchain::default();

    let debug = toolchain
      .populate(&job(game(), Configuration::Debug, BuildMode::Full), &rules, &mut graph, &layout())
      .unwrap();
    let release = toolchain
      .populate(&job(game(), Configuration::Release, BuildMode::Full), &rules, &mut graph, &layout())
      .unwrap();

    assert_eq!(debug[0], release[0]);
    assert_ne!(debug[1], release[1]);
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.task(debug[0]).unwrap().name, "Core [Linux x64]");
  }

  #[test]
  fn bindings_only_uses_bindings_command_without_outputs() {
    let mut core = Module::new("Core", "/p/Source/Core")
      .with_command("cc core.c")
      .with_outputs(["core.o"]);
    core.bindings_command = Some("gen-bindings $${module}".to_string());
    let rules = rules(vec![
      core,
      Module::new("Game", "/p/Source/Game")
        .with_command("cc game.c")
        .with_dependencies(["Core"]),
    ]);
    let mut graph = TaskGraph::new("/p/.weft/intermediate");

    let ids = ShellToolchain::default()
      .populate(
        &job(game(), Configuration::Debug, BuildMode::BindingsOnly),
        &rules,
        &mut graph,
        &layout(),
      )
      .unwrap();

    assert_eq!(ids.len(), 1);
    let task = graph.task(ids[0]).unwrap();
    assert!(task.outputs.is_empty());
    assert!(matches!(&task.action, TaskAction::Cmd { cmd, .. } if cmd == "gen-bindings Core"));
  }

  #[test]
  fn commandless_module_forwards_its_dependencies() {
    let rules = rules(vec![
      Module::new("Core", "/p/Source/Core").with_command("cc core.c"),
      Module::new("Headers", "/p/Source/Headers").with_dependencies(["Core"]),
      Module::new("Game", "/p/Source/Game")
        .with_command("cc game.c")
        .with_dependencies(["Headers"]),
    ]);
    let mut graph = TaskGraph::new("/p/.weft/intermediate");

    let ids = ShellToolchain::default()
      .populate(&job(game(), Configuration::Debug, BuildMode::Full), &rules, &mut graph, &layout())
      .unwrap();

    assert_eq!(ids.len(), 2);
    assert!(graph.task(ids[1]).unwrap().after.contains(&ids[0]));
  }

  #[test]
  fn module_cycle_is_reported() {
    let rules = rules(vec![
      Module::new("Game", "/p/Source/Game")
        .with_command("cc game.c")
        .with_dependencies(["Core"]),
      Module::new("Core", "/p/Source/Core")
        .with_command("cc core.c")
        .with_dependencies(["Game"]),
    ]);
    let mut graph = TaskGraph::new("/p/.weft/intermediate");

    let err = ShellToolchain::default()
      .populate(&job(game(), Configuration::Debug, BuildMode::Full), &rules, &mut graph, &layout())
      .unwrap_err();
    assert!(matches!(err, ToolchainError::ModuleCycle { ref module, .. } if module == "Game"));
    assert!(graph.is_empty());
  }

  #[test]
  fn bad_template_names_the_module() {
    let rules = rules(vec![Module::new("Game", "/p/Source/Game").with_command("cc $${nope}")]);
    let mut graph = TaskGraph::new("/p/.weft/intermediate");

    let err = ShellToolchain::default()
      .populate(&job(game(), Configuration::Debug, BuildMode::Full), &rules, &mut graph, &layout())
      .unwrap_err();
    assert!(matches!(err, ToolchainError::Template { ref module, .. } if module == "Game"));
  }

  #[test]
  fn host_provider_supports_host_and_anycpu() {
    let provider = HostToolchainProvider::new(Arc::new(ShellToolchain::default()));
    let host = HostPlatform::current().unwrap();

    assert!(provider.is_supported(host.platform, host.arch));
    assert!(provider.is_supported(host.platform, Architecture::AnyCpu));
    assert!(!provider.is_supported(Platform::PS5, host.arch));
    assert!(provider.get_toolchain(Platform::PS5, host.arch).is_none());

    let provider = provider.with_platform(Platform::PS5, Architecture::X64);
    assert_eq!(provider.get_toolchain(Platform::PS5, Architecture::X64).unwrap().name(), "shell");
    assert!(provider.supports_modular_build(Platform::Linux));
    assert!(!provider.supports_modular_build(Platform::PS5));
  }
}
