//! Types for task graph setup and execution.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::util::hash::{DirHashError, HashError};

use super::cache::{CacheError, SignatureMode};
use super::task::TaskId;

/// A dependency cycle, naming every task on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle detected between tasks: {}", members.join(", "))]
pub struct CycleError {
  pub members: Vec<String>,
}

/// Errors that abort graph construction or scheduling.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error(transparent)]
  Cycle(#[from] CycleError),

  #[error("tasks {first} and {second} both declare output {}", path.display())]
  DuplicateOutput {
    path: PathBuf,
    first: String,
    second: String,
  },

  #[error("task {task} depends on unknown task {dependency}")]
  UnknownDependency { task: String, dependency: TaskId },

  #[error("unknown task {0}")]
  UnknownTask(TaskId),

  #[error("failed to compute identity of task {task}: {source}")]
  Key {
    task: String,
    #[source]
    source: HashError,
  },

  #[error("graph must be sorted before it is executed")]
  NotSorted,

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("failed to clean {}: {source}", path.display())]
  Clean {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Why a single task failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum TaskError {
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  #[error("command timed out after {}: {cmd}", format_secs(*timeout))]
  Timeout { cmd: String, timeout: Duration },

  #[error("{label} failed: {message}")]
  Callback { label: String, message: String },

  #[error("declared output {} was not produced", path.display())]
  MissingOutput { path: PathBuf },

  #[error("failed to hash {0}")]
  Hash(String),

  #[error("io error: {0}")]
  Io(String),

  #[error("task aborted before reporting a result")]
  Aborted,
}

impl From<std::io::Error> for TaskError {
  fn from(e: std::io::Error) -> Self {
    TaskError::Io(e.to_string())
  }
}

impl From<DirHashError> for TaskError {
  fn from(e: DirHashError) -> Self {
    TaskError::Hash(e.to_string())
  }
}

impl From<CacheError> for TaskError {
  fn from(e: CacheError) -> Self {
    TaskError::Hash(e.to_string())
  }
}

fn format_secs(d: Duration) -> String {
  format!("{:.1}s", d.as_secs_f64())
}

/// Final state of a task after execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
  /// Not reached (execution has not run).
  Pending,
  /// The action ran and succeeded.
  Executed,
  /// Outputs were reused from the cache.
  CacheHit,
  /// The action ran and failed.
  Failed,
  /// Not run because a predecessor failed or was skipped.
  Skipped { failed_dependency: TaskId },
}

/// Aggregate result of [`TaskGraph::execute`](super::TaskGraph::execute).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecuteSummary {
  /// Final status of every task, indexed by `TaskId`.
  pub statuses: Vec<TaskStatus>,
  /// Failed tasks with their errors.
  pub failures: BTreeMap<TaskId, TaskError>,
  /// The run stopped before the graph executed.
  pub aborted: bool,
}

impl ExecuteSummary {
  pub(crate) fn new(task_count: usize) -> Self {
    Self {
      statuses: vec![TaskStatus::Pending; task_count],
      failures: BTreeMap::new(),
      aborted: false,
    }
  }

  /// Summary of a run that never reached execution.
  pub fn aborted() -> Self {
    Self {
      aborted: true,
      ..Self::default()
    }
  }

  fn count(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
    self.statuses.iter().filter(|s| pred(s)).count()
  }

  /// Number of actions that ran and succeeded.
  pub fn executed(&self) -> usize {
    self.count(|s| matches!(s, TaskStatus::Executed))
  }

  pub fn cache_hits(&self) -> usize {
    self.count(|s| matches!(s, TaskStatus::CacheHit))
  }

  pub fn skipped(&self) -> usize {
    self.count(|s| matches!(s, TaskStatus::Skipped { .. }))
  }

  pub fn failed(&self) -> usize {
    self.failures.len()
  }

  pub fn is_success(&self) -> bool {
    !self.aborted && self.failures.is_empty()
  }

  pub fn status(&self, id: TaskId) -> Option<&TaskStatus> {
    self.statuses.get(id.0)
  }
}

/// Configuration for graph execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of tasks running at once.
  pub parallelism: usize,

  /// Shell to use for command execution.
  /// If None, uses /bin/sh (Unix) or powershell.exe (Windows).
  pub shell: Option<String>,

  /// How output validity is recorded and checked.
  pub signature: SignatureMode,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      shell: None,
      signature: SignatureMode::default(),
    }
  }
}

/// Get the number of CPUs for default parallelism.
pub fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn summary_counts_by_status() {
    let mut summary = ExecuteSummary::new(5);
    summary.statuses = vec![
      TaskStatus::Executed,
      TaskStatus::CacheHit,
      TaskStatus::Failed,
      TaskStatus::Skipped {
        failed_dependency: TaskId(2),
      },
      TaskStatus::Executed,
    ];
    summary.failures.insert(TaskId(2), TaskError::Aborted);

    assert_eq!(summary.executed(), 2);
    assert_eq!(summary.cache_hits(), 1);
    assert_eq!(summary.skipped(), 1);
    assert_eq!(summary.failed(), 1);
    assert!(!summary.is_success());
    assert_eq!(summary.status(TaskId(1)), Some(&TaskStatus::CacheHit));
    assert_eq!(summary.status(TaskId(9)), None);
  }

  #[test]
  fn empty_summary_is_success() {
    let summary = ExecuteSummary::default();
    assert!(summary.is_success());
    assert_eq!(summary.executed(), 0);
    assert!(!ExecuteSummary::aborted().is_success());
  }

  #[test]
  fn cycle_error_lists_members() {
    let err = CycleError {
      members: vec!["A".to_string(), "B".to_string()],
    };
    assert_eq!(err.to_string(), "dependency cycle detected between tasks: A, B");
  }

  #[test]
  fn timeout_message() {
    let err = TaskError::Timeout {
      cmd: "sleep 10".to_string(),
      timeout: Duration::from_millis(1500),
    };
    assert_eq!(err.to_string(), "command timed out after 1.5s: sleep 10");
  }

  #[test]
  fn default_parallelism_is_positive() {
    assert!(ExecuteConfig::default().parallelism >= 1);
  }
}
