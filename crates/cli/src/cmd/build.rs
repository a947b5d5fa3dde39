//! Implementation of the `weft build` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::debug;

use weft_lib::graph::{SignatureMode, TaskId, TaskStatus};
use weft_lib::model::Configuration;
use weft_lib::orchestrate::{BuildConfig, BuildOutcome, CommandHooks, build};
use weft_lib::platform::{Architecture, Platform};
use weft_lib::rules::ManifestRules;
use weft_lib::toolchain::{HostToolchainProvider, ShellToolchain};

use crate::output::{OutputFormat, format_duration, print_error, print_json, print_stat, print_success, print_warning};

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Targets to build (default: every target in the project)
  #[arg(short, long = "target", value_delimiter = ',')]
  targets: Vec<String>,

  /// Configurations to build (default: every declared configuration)
  #[arg(short, long = "configuration", value_delimiter = ',')]
  configurations: Vec<Configuration>,

  /// Platforms to build (default: every declared platform)
  #[arg(short, long = "platform", value_delimiter = ',')]
  platforms: Vec<Platform>,

  /// Architectures to build (default: every declared architecture)
  #[arg(short, long = "architecture", value_delimiter = ',')]
  architectures: Vec<Architecture>,

  /// Only generate bindings
  #[arg(long)]
  bindings_only: bool,

  /// Clean the intermediate directory first
  #[arg(long)]
  rebuild: bool,

  /// Maximum number of tasks running at once
  #[arg(short = 'j', long)]
  jobs: Option<usize>,

  /// How outputs are checked for changes: content or metadata
  #[arg(long)]
  signature: Option<SignatureMode>,

  /// Kill module commands running longer than this (e.g. 90s, 5m)
  #[arg(long)]
  action_timeout: Option<humantime::Duration>,

  /// Shell used to run commands
  #[arg(long)]
  shell: Option<String>,

  /// Intermediate directory (overrides WEFT_INTERMEDIATE_DIR)
  #[arg(long)]
  intermediate_dir: Option<PathBuf>,

  #[arg(short, long, value_enum, default_value_t)]
  output: OutputFormat,
}

impl BuildArgs {
  fn config(&self) -> BuildConfig {
    let mut config = BuildConfig {
      targets: non_empty(&self.targets),
      configurations: non_empty(&self.configurations),
      platforms: non_empty(&self.platforms),
      architectures: non_empty(&self.architectures),
      bindings_only: self.bindings_only,
      rebuild: self.rebuild,
      intermediate_dir: self.intermediate_dir.clone(),
      shell: self.shell.clone(),
      ..Default::default()
    };
    if let Some(jobs) = self.jobs {
      config.parallelism = jobs.max(1);
    }
    if let Some(signature) = self.signature {
      config.signature = signature;
    }
    config
  }
}

/// An empty list on the command line means "no restriction".
fn non_empty<T: Clone>(values: &[T]) -> Option<Vec<T>> {
  (!values.is_empty()).then(|| values.to_vec())
}

#[derive(Serialize)]
struct TaskReport {
  task: String,
  error: String,
}

#[derive(Serialize)]
struct BuildReport {
  success: bool,
  jobs: Vec<String>,
  tasks: usize,
  executed: usize,
  cache_hits: usize,
  skipped: usize,
  failures: Vec<TaskReport>,
  duration_ms: u128,
}

impl BuildReport {
  fn new(outcome: &BuildOutcome, start: Instant) -> Self {
    let name = |id: TaskId| {
      outcome
        .graph
        .task(id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| id.to_string())
    };
    Self {
      success: !outcome.failed,
      jobs: outcome.jobs.iter().map(|j| j.describe()).collect(),
      tasks: outcome.graph.len(),
      executed: outcome.executed,
      cache_hits: outcome.summary.cache_hits(),
      skipped: outcome.summary.skipped(),
      failures: outcome
        .summary
        .failures
        .iter()
        .map(|(&id, err)| TaskReport {
          task: name(id),
          error: err.to_string(),
        })
        .collect(),
      duration_ms: start.elapsed().as_millis(),
    }
  }
}

/// Execute the build command.
///
/// Returns whether the build succeeded.
pub fn cmd_build(project_dir: &Path, args: BuildArgs) -> Result<bool> {
  let start = Instant::now();

  let rules = ManifestRules::load_project(project_dir).context("Failed to load project manifest")?;
  let project = rules.project().clone();
  let config = args.config();
  debug!(?config, "build configuration");

  let toolchain = ShellToolchain::default().with_timeout(args.action_timeout.map(Into::into));
  let provider = HostToolchainProvider::new(Arc::new(toolchain));
  let hooks = CommandHooks::new(&project.folder).with_shell(args.shell.clone());

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(build(&project, &rules, &provider, &hooks, &config))
    .context("Build failed")?;

  if args.output.is_json() {
    print_json(&BuildReport::new(&outcome, start))?;
    return Ok(!outcome.failed);
  }

  for (id, err) in &outcome.summary.failures {
    let name = outcome.graph.task(*id).map(|t| t.name.as_str()).unwrap_or("?");
    print_error(&format!("{name}: {err}"));
  }
  for task in outcome.graph.tasks() {
    if let Some(TaskStatus::Skipped { failed_dependency }) = outcome.summary.status(task.id)
      && let Some(dep) = outcome.graph.task(*failed_dependency)
    {
      print_warning(&format!("{}: skipped, {} failed", task.name, dep.name));
    }
  }

  println!();
  if outcome.failed {
    print_error("Build failed");
  } else {
    print_success("Build complete!");
  }
  print_stat("Jobs", &outcome.jobs.len().to_string());
  print_stat("Tasks", &outcome.graph.len().to_string());
  print_stat("Executed", &outcome.executed.to_string());
  print_stat("Cached", &outcome.summary.cache_hits().to_string());
  print_stat("Failed", &outcome.summary.failed().to_string());
  print_stat("Skipped", &outcome.summary.skipped().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(!outcome.failed)
}
