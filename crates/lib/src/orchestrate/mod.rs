//! Build orchestration.
//!
//! A build run goes through these steps:
//!
//! 1. Select targets inside the project folder, narrowed by name
//! 2. Expand every selected target into jobs (fails before any task exists)
//! 3. Lock the intermediate directory and clean it when rebuilding
//! 4. Per target: run the pre-build hook, then let each job's toolchain
//!    populate the shared task graph
//! 5. Setup, sort, load cache, execute, save cache
//! 6. Per target: run the post-build hook

pub mod hooks;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::consts::{INTERMEDIATE_DIR, INTERMEDIATE_DIR_ENV, STATE_DIR};
use crate::graph::types::num_cpus;
use crate::graph::{ExecuteConfig, ExecuteSummary, GraphError, SignatureMode, TaskGraph};
use crate::lock::{BuildLock, BuildLockError};
use crate::model::{Configuration, Project, Target};
use crate::platform::{Architecture, Platform};
use crate::resolve::{self, BuildFilters, BuildJob, ValidationError, ValidationErrors};
use crate::rules::RuleRepository;
use crate::toolchain::{BuildLayout, ToolchainError, ToolchainProvider};

pub use hooks::{CommandHooks, HookError, NoopHooks, TargetHooks};

/// Options for a build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Target names to build. `None` builds every target in the project.
  pub targets: Option<Vec<String>>,
  pub configurations: Option<Vec<Configuration>>,
  pub platforms: Option<Vec<Platform>>,
  pub architectures: Option<Vec<Architecture>>,
  /// Only generate bindings, skipping compilation.
  pub bindings_only: bool,
  /// Clean the intermediate directory before building.
  pub rebuild: bool,
  /// Maximum number of tasks running at once.
  pub parallelism: usize,
  /// Overrides `WEFT_INTERMEDIATE_DIR` and the default location.
  pub intermediate_dir: Option<PathBuf>,
  pub signature: SignatureMode,
  pub shell: Option<String>,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      targets: None,
      configurations: None,
      platforms: None,
      architectures: None,
      bindings_only: false,
      rebuild: false,
      parallelism: num_cpus(),
      intermediate_dir: None,
      signature: SignatureMode::default(),
      shell: None,
    }
  }
}

impl BuildConfig {
  pub fn filters(&self) -> BuildFilters {
    BuildFilters {
      configurations: self.configurations.clone(),
      platforms: self.platforms.clone(),
      architectures: self.architectures.clone(),
      bindings_only: self.bindings_only,
    }
  }

  pub fn execute_config(&self) -> ExecuteConfig {
    ExecuteConfig {
      parallelism: self.parallelism,
      shell: self.shell.clone(),
      signature: self.signature,
    }
  }

  /// The explicit directory, then `WEFT_INTERMEDIATE_DIR`, then
  /// `<project>/.weft/intermediate`.
  pub fn resolve_intermediate_dir(&self, project: &Project) -> PathBuf {
    if let Some(dir) = &self.intermediate_dir {
      return dir.clone();
    }
    intermediate_dir(project)
  }
}

/// Intermediate directory for a project, honoring `WEFT_INTERMEDIATE_DIR`.
pub fn intermediate_dir(project: &Project) -> PathBuf {
  if let Ok(dir) = std::env::var(INTERMEDIATE_DIR_ENV)
    && !dir.is_empty()
  {
    return PathBuf::from(dir);
  }
  project.folder.join(STATE_DIR).join(INTERMEDIATE_DIR)
}

/// Result of a build run.
#[derive(Debug)]
pub struct BuildOutcome {
  /// A task or post-build hook failed.
  pub failed: bool,
  /// Number of actions that ran and succeeded.
  pub executed: usize,
  pub summary: ExecuteSummary,
  pub jobs: Vec<BuildJob>,
  pub graph: TaskGraph,
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Validation(#[from] ValidationErrors),

  #[error(transparent)]
  Lock(#[from] BuildLockError),

  #[error(transparent)]
  PreBuild(HookError),

  #[error("failed to create tasks for {job}: {source}")]
  Toolchain {
    job: String,
    #[source]
    source: ToolchainError,
  },

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Targets in the project folder, restricted to `names` when given.
///
/// Unknown names are validation errors. Selection keeps declaration order.
pub fn select_targets(
  project: &Project,
  rules: &dyn RuleRepository,
  names: Option<&[String]>,
) -> Result<Vec<Arc<Target>>, ValidationErrors> {
  if let Some(names) = names {
    let unknown: Vec<ValidationError> = names
      .iter()
      .filter(|name| rules.target(name).is_none())
      .map(|name| ValidationError::UnknownTarget(name.clone()))
      .collect();
    if !unknown.is_empty() {
      return Err(ValidationErrors(unknown));
    }
  }

  let selected = rules
    .targets()
    .iter()
    .filter(|t| names.is_none_or(|names| names.contains(&t.name)))
    .filter(|t| {
      let inside = project.contains(&t.folder);
      if !inside {
        debug!(target = %t.name, folder = %t.folder.display(), "target is outside the project");
      }
      inside
    })
    .cloned()
    .map(Arc::new)
    .collect();
  Ok(selected)
}

/// Run a complete build.
pub async fn build<H: TargetHooks>(
  project: &Project,
  rules: &dyn RuleRepository,
  provider: &dyn ToolchainProvider,
  hooks: &H,
  config: &BuildConfig,
) -> Result<BuildOutcome, BuildError> {
  let start = Instant::now();
  info!(project = %project.name, "starting build");

  let targets = select_targets(project, rules, config.targets.as_deref())?;
  let jobs = resolve::expand_all(&targets, &config.filters(), provider, project)?;
  info!(targets = targets.len(), jobs = jobs.len(), "resolved build matrix");

  let intermediate = config.resolve_intermediate_dir(project);
  let _lock = BuildLock::acquire(&intermediate, "build")?;

  let mut graph = TaskGraph::new(&intermediate);
  if config.rebuild {
    info!(path = %intermediate.display(), "cleaning before rebuild");
    graph.clean_cache()?;
  }

  let layout = BuildLayout::new(&intermediate);
  let mut started = Vec::new();
  let prepared = populate_targets(&targets, &jobs, rules, hooks, &mut graph, &layout, &mut started).await;
  let run = match prepared {
    Ok(()) => run_graph(&mut graph, config).await,
    Err(e) => Err(e),
  };
  let summary = match run {
    Ok(summary) => summary,
    Err(e) => {
      let aborted = ExecuteSummary::aborted();
      for target in &started {
        if let Err(hook_err) = hooks.post_build(target, &aborted).await {
          error!(target = %target.name, error = %hook_err, "post-build hook failed");
        }
      }
      return Err(e);
    }
  };

  let mut failed = !summary.is_success();
  for target in &started {
    if let Err(e) = hooks.post_build(target, &summary).await {
      error!(target = %target.name, error = %e, "post-build hook failed");
      failed = true;
    }
  }

  let executed = summary.executed();
  info!(
    executed,
    cache_hits = summary.cache_hits(),
    failed,
    elapsed = ?start.elapsed(),
    "build complete"
  );

  Ok(BuildOutcome {
    failed,
    executed,
    summary,
    jobs,
    graph,
  })
}

/// Call pre-build hooks and let every job's toolchain add its tasks.
///
/// A target is pushed to `started` as soon as its pre-build hook succeeds.
async fn populate_targets<H: TargetHooks>(
  targets: &[Arc<Target>],
  jobs: &[BuildJob],
  rules: &dyn RuleRepository,
  hooks: &H,
  graph: &mut TaskGraph,
  layout: &BuildLayout,
  started: &mut Vec<Arc<Target>>,
) -> Result<(), BuildError> {
  for target in targets {
    let target_jobs: Vec<&BuildJob> = jobs.iter().filter(|j| Arc::ptr_eq(&j.target, target)).collect();
    if target_jobs.is_empty() {
      debug!(target = %target.name, "no jobs for target");
      continue;
    }

    hooks.pre_build(target).await.map_err(BuildError::PreBuild)?;
    started.push(target.clone());

    for job in target_jobs {
      debug!(job = %job.describe(), toolchain = job.toolchain.name(), mode = %job.mode, "populating job");
      job
        .toolchain
        .populate(job, rules, graph, layout)
        .map_err(|source| BuildError::Toolchain {
          job: job.describe(),
          source,
        })?;
    }
  }
  Ok(())
}

async fn run_graph(graph: &mut TaskGraph, config: &BuildConfig) -> Result<ExecuteSummary, BuildError> {
  graph.setup()?;
  graph.sort_tasks()?;
  graph.load_cache();
  let summary = graph.execute(&config.execute_config()).await?;
  graph.save_cache(&summary)?;
  Ok(summary)
}

/// Delete the cache store and every artifact of a project.
pub fn clean(project: &Project, config: &BuildConfig) -> Result<PathBuf, BuildError> {
  let intermediate = config.resolve_intermediate_dir(project);
  let _lock = BuildLock::acquire(&intermediate, "clean")?;
  TaskGraph::new(&intermediate).clean_cache()?;
  info!(path = %intermediate.display(), "cleaned intermediate directory");
  Ok(intermediate)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::{TaskAction, TaskId, TaskSpec, TaskStatus};
  use crate::model::Module;
  use crate::rules::ManifestRules;
  use crate::toolchain::{HostToolchainProvider, ShellToolchain, Toolchain};
  use crate::util::testutil::{block_on, fail_cmd, touch_cmd};
  use serial_test::serial;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tempfile::TempDir;

  /// Adds one callback task per job that writes `<out>/<target>.stamp`.
  #[derive(Debug, Default)]
  struct StampToolchain {
    runs: Arc<AtomicUsize>,
    shared_runs: Arc<AtomicUsize>,
    fail_for: Option<&'static str>,
  }

  impl Toolchain for StampToolchain {
    fn name(&self) -> &str {
      "stamp"
    }

    fn populate(
      &self,
      job: &BuildJob,
      _rules: &dyn RuleRepository,
      graph: &mut TaskGraph,
      layout: &BuildLayout,
    ) -> Result<Vec<TaskId>, ToolchainError> {
      if self.fail_for == Some(job.target.name.as_str()) {
        return Err(ToolchainError::UnknownModule {
          target: job.target.name.clone(),
          module: "Missing".to_string(),
        });
      }
      let shared_dir = layout.shared_dir("Core", job.platform, job.architecture);
      let shared_out = shared_dir.join("core.stamp");
      let shared_runs = self.shared_runs.clone();
      let path = shared_out.clone();
      let shared = graph.add_task(
        TaskSpec::new(
          "Core",
          TaskAction::callback("core", move || {
            shared_runs.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(path.parent().unwrap()).map_err(|e| e.to_string())?;
            std::fs::write(&path, "core").map_err(|e| e.to_string())
          }),
        )
        .outputs([shared_out]),
      )?;

      let dir = layout.job_dir(&job.target.name, job.platform, job.architecture, job.configuration);
      let out = dir.join(format!("{}.stamp", job.target.name));
      let runs = self.runs.clone();
      let path = out.clone();
      let id = graph.add_task(
        TaskSpec::new(
          job.describe(),
          TaskAction::callback(job.describe(), move || {
            runs.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(path.parent().unwrap()).map_err(|e| e.to_string())?;
            std::fs::write(&path, "stamp").map_err(|e| e.to_string())
          }),
        )
        .outputs([out])
        .after([shared]),
      )?;
      Ok(vec![shared, id])
    }
  }

  struct StampProvider {
    toolchain: Arc<StampToolchain>,
  }

  impl ToolchainProvider for StampProvider {
    fn get_toolchain(&self, _platform: Platform, _arch: Architecture) -> Option<Arc<dyn Toolchain>> {
      Some(self.toolchain.clone())
    }

    fn supports_modular_build(&self, platform: Platform) -> bool {
      platform.is_desktop()
    }

    fn is_supported(&self, platform: Platform, arch: Architecture) -> bool {
      platform == Platform::Windows && arch == Architecture::X64
    }
  }

  #[derive(Default)]
  struct RecordingHooks {
    calls: Mutex<Vec<String>>,
    post_success: Mutex<Vec<bool>>,
    fail_pre: Option<&'static str>,
    fail_post: bool,
  }

  impl TargetHooks for RecordingHooks {
    async fn pre_build(&self, target: &Target) -> Result<(), HookError> {
      self.calls.lock().unwrap().push(format!("pre {}", target.name));
      if self.fail_pre == Some(target.name.as_str()) {
        return Err(HookError::Failed {
          target: target.name.clone(),
          stage: "pre-build",
          message: "codegen failed".to_string(),
        });
      }
      Ok(())
    }

    async fn post_build(&self, target: &Target, summary: &ExecuteSummary) -> Result<(), HookError> {
      self.calls.lock().unwrap().push(format!("post {}", target.name));
      self.post_success.lock().unwrap().push(summary.is_success());
      if self.fail_post {
        return Err(HookError::Failed {
          target: target.name.clone(),
          stage: "post-build",
          message: "packaging failed".to_string(),
        });
      }
      Ok(())
    }
  }

  struct Fixture {
    _temp: TempDir,
    project: Project,
    rules: ManifestRules,
    provider: StampProvider,
    config: BuildConfig,
  }

  fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let project = Project::new("Demo", &root);
    let game = Target::new(
      "Game",
      root.join("Source/Game"),
      vec![Configuration::Debug, Configuration::Release],
      vec![Platform::Windows],
      vec![Architecture::X64],
    );
    let tool = Target::new(
      "Tool",
      root.join("Source/Tool"),
      vec![Configuration::Development],
      vec![Platform::Windows],
      vec![Architecture::X64],
    );
    let rules = ManifestRules::new(project.clone(), vec![game, tool], Vec::new()).unwrap();
    let config = BuildConfig {
      intermediate_dir: Some(root.join("out")),
      parallelism: 2,
      ..Default::default()
    };

    Fixture {
      _temp: temp,
      project,
      rules,
      provider: StampProvider {
        toolchain: Arc::new(StampToolchain::default()),
      },
      config,
    }
  }

  #[test]
  fn builds_every_job_once_and_shares_common_work() {
    let f = fixture();
    let hooks = RecordingHooks::default();

    let outcome = block_on(build(&f.project, &f.rules, &f.provider, &hooks, &f.config)).unwrap();

    assert!(!outcome.failed);
    assert_eq!(outcome.jobs.len(), 3);
    // Core once, plus one stamp per job.
    assert_eq!(outcome.executed, 4);
    assert_eq!(f.provider.toolchain.shared_runs.load(Ordering::SeqCst), 1);
    assert_eq!(f.provider.toolchain.runs.load(Ordering::SeqCst), 3);
    assert_eq!(
      *hooks.calls.lock().unwrap(),
      vec!["pre Game", "pre Tool", "post Game", "post Tool"]
    );
  }

  #[test]
  fn second_run_executes_nothing() {
    let f = fixture();

    let first = block_on(build(&f.project, &f.rules, &f.provider, &NoopHooks, &f.config)).unwrap();
    assert_eq!(first.executed, 4);

    let second = block_on(build(&f.project, &f.rules, &f.provider, &NoopHooks, &f.config)).unwrap();
    assert_eq!(second.executed, 0);
    assert_eq!(second.summary.cache_hits(), 4);
    assert!(!second.failed);
  }

  #[test]
  fn rebuild_runs_everything_again() {
    let f = fixture();
    block_on(build(&f.project, &f.rules, &f.provider, &NoopHooks, &f.config)).unwrap();

    let config = BuildConfig {
      rebuild: true,
      ..f.config.clone()
    };
    let outcome = block_on(build(&f.project, &f.rules, &f.provider, &NoopHooks, &config)).unwrap();
    assert_eq!(outcome.executed, 4);
  }

  #[test]
  fn validation_error_happens_before_any_work() {
    let f = fixture();
    let hooks = RecordingHooks::default();
    let config = BuildConfig {
      targets: Some(vec!["Game".to_string()]),
      configurations: Some(vec![Configuration::Shipping]),
      ..f.config.clone()
    };

    let err = block_on(build(&f.project, &f.rules, &f.provider, &hooks, &config)).unwrap_err();
    assert_eq!(err.to_string(), "Target Game does not support Shipping configuration.");
    assert!(hooks.calls.lock().unwrap().is_empty());
    assert!(!f.config.intermediate_dir.as_ref().unwrap().exists());
  }

  #[test]
  fn unknown_target_name_is_rejected() {
    let f = fixture();
    let config = BuildConfig {
      targets: Some(vec!["Nope".to_string()]),
      ..f.config.clone()
    };

    let err = block_on(build(&f.project, &f.rules, &f.provider, &NoopHooks, &config)).unwrap_err();
    assert_eq!(err.to_string(), "Unknown target Nope.");
  }

  #[test]
  fn target_filter_limits_hooks_and_jobs() {
    let f = fixture();
    let hooks = RecordingHooks::default();
    let config = BuildConfig {
      targets: Some(vec!["Tool".to_string()]),
      ..f.config.clone()
    };

    let outcome = block_on(build(&f.project, &f.rules, &f.provider, &hooks, &config)).unwrap();
    assert_eq!(outcome.jobs.len(), 1);
    assert_eq!(*hooks.calls.lock().unwrap(), vec!["pre Tool", "post Tool"]);
  }

  #[test]
  fn post_build_failure_marks_run_failed() {
    let f = fixture();
    let hooks = RecordingHooks {
      fail_post: true,
      ..Default::default()
    };

    let outcome = block_on(build(&f.project, &f.rules, &f.provider, &hooks, &f.config)).unwrap();
    assert!(outcome.failed);
    assert!(outcome.summary.is_success());
    assert_eq!(hooks.calls.lock().unwrap().len(), 4);
  }

  #[test]
  fn pre_build_failure_still_finishes_started_targets() {
    let f = fixture();
    let hooks = RecordingHooks {
      fail_pre: Some("Tool"),
      ..Default::default()
    };

    let err = block_on(build(&f.project, &f.rules, &f.provider, &hooks, &f.config)).unwrap_err();
    assert!(matches!(err, BuildError::PreBuild(_)));
    assert_eq!(*hooks.calls.lock().unwrap(), vec!["pre Game", "pre Tool", "post Game"]);
    assert_eq!(*hooks.post_success.lock().unwrap(), vec![false]);
    assert_eq!(f.provider.toolchain.runs.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn populate_failure_finishes_every_started_target() {
    let f = fixture();
    let provider = StampProvider {
      toolchain: Arc::new(StampToolchain {
        fail_for: Some("Tool"),
        ..Default::default()
      }),
    };
    let hooks = RecordingHooks::default();

    let err = block_on(build(&f.project, &f.rules, &provider, &hooks, &f.config)).unwrap_err();
    assert!(matches!(err, BuildError::Toolchain { .. }));
    assert_eq!(
      *hooks.calls.lock().unwrap(),
      vec!["pre Game", "pre Tool", "post Game", "post Tool"]
    );
    assert_eq!(*hooks.post_success.lock().unwrap(), vec![false, false]);
    assert_eq!(provider.toolchain.runs.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn targets_outside_the_project_are_ignored() {
    let f = fixture();
    let elsewhere = TempDir::new().unwrap();
    let engine = Target::new(
      "Engine",
      elsewhere.path(),
      vec![Configuration::Debug],
      vec![Platform::Windows],
      vec![Architecture::X64],
    );
    let mut targets = f.rules.targets().to_vec();
    targets.push(engine);
    let rules = ManifestRules::new(f.project.clone(), targets, Vec::new()).unwrap();

    let selected = select_targets(&f.project, &rules, None).unwrap();
    let names: Vec<_> = selected.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Game", "Tool"]);
  }

  #[test]
  fn failed_chain_does_not_stop_independent_chain() {
    let temp = TempDir::new().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let project = Project::new("Demo", &root);
    let src = root.join("src");
    std::fs::create_dir_all(&src).unwrap();

    // A -> B fails at A; C -> D succeeds.
    let a = Module::new("A", &src).with_command(fail_cmd()).with_outputs(["a"]);
    let b = Module::new("B", &src)
      .with_command(touch_cmd(std::path::Path::new("b")))
      .with_outputs(["b"])
      .with_dependencies(["A"]);
    let c = Module::new("C", &src)
      .with_command(touch_cmd(std::path::Path::new("c")))
      .with_outputs(["c"]);
    let d = Module::new("D", &src)
      .with_command(touch_cmd(std::path::Path::new("d")))
      .with_outputs(["d"])
      .with_dependencies(["C"]);
    let host = crate::platform::HostPlatform::current().unwrap();
    let target = Target::new(
      "App",
      &src,
      vec![Configuration::Debug],
      vec![host.platform],
      vec![host.arch],
    )
    .with_modules(["B", "D"]);
    let rules = ManifestRules::new(project.clone(), vec![target], vec![a, b, c, d]).unwrap();
    let provider = HostToolchainProvider::new(Arc::new(ShellToolchain::default()));
    let config = BuildConfig {
      intermediate_dir: Some(root.join("out")),
      ..Default::default()
    };

    let outcome = block_on(build(&project, &rules, &provider, &NoopHooks, &config)).unwrap();

    assert!(outcome.failed);
    assert_eq!(outcome.executed, 2);
    let status = |name: &str| {
      let task = outcome.graph.tasks().iter().find(|t| t.name.contains(&format!("/{name} "))).unwrap();
      outcome.summary.status(task.id).cloned().unwrap()
    };
    assert_eq!(status("A"), TaskStatus::Failed);
    assert!(matches!(status("B"), TaskStatus::Skipped { .. }));
    assert_eq!(status("C"), TaskStatus::Executed);
    assert_eq!(status("D"), TaskStatus::Executed);
  }

  #[test]
  #[serial]
  fn intermediate_dir_precedence() {
    let project = Project::new("Demo", "/work/demo");
    let config = BuildConfig::default();

    temp_env::with_var(INTERMEDIATE_DIR_ENV, None::<&str>, || {
      assert_eq!(
        config.resolve_intermediate_dir(&project),
        PathBuf::from("/work/demo/.weft/intermediate")
      );
    });

    temp_env::with_var(INTERMEDIATE_DIR_ENV, Some("/tmp/weft-env"), || {
      assert_eq!(config.resolve_intermediate_dir(&project), PathBuf::from("/tmp/weft-env"));

      let explicit = BuildConfig {
        intermediate_dir: Some(PathBuf::from("/tmp/weft-cli")),
        ..Default::default()
      };
      assert_eq!(explicit.resolve_intermediate_dir(&project), PathBuf::from("/tmp/weft-cli"));
    });
  }

  #[test]
  fn clean_removes_artifacts() {
    let f = fixture();
    block_on(build(&f.project, &f.rules, &f.provider, &NoopHooks, &f.config)).unwrap();
    let out = f.config.intermediate_dir.clone().unwrap();
    assert!(out.join("Game").exists());

    clean(&f.project, &f.config).unwrap();
    assert!(!out.join("Game").exists());
    assert!(!out.join(crate::consts::CACHE_FILENAME).exists());
  }
}
