//! Task definitions.
//!
//! A [`TaskSpec`] describes a unit of work before it enters the graph; the
//! graph turns it into a [`Task`] with a stable [`TaskId`] and identity key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::util::hash::{HashError, Hashable, ObjectHash};

/// Index of a task in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// In-process work item.
pub type Callback = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// The work a task performs. Opaque to the scheduler.
#[derive(Clone)]
pub enum TaskAction {
  /// Run a shell command.
  Cmd {
    cmd: String,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
  },
  /// Run a closure on the blocking pool.
  Callback { label: String, run: Callback },
}

impl TaskAction {
  pub fn cmd(cmd: impl Into<String>) -> Self {
    TaskAction::Cmd {
      cmd: cmd.into(),
      cwd: None,
      env: BTreeMap::new(),
      timeout: None,
    }
  }

  pub fn callback<F>(label: impl Into<String>, run: F) -> Self
  where
    F: Fn() -> Result<(), String> + Send + Sync + 'static,
  {
    TaskAction::Callback {
      label: label.into(),
      run: Arc::new(run),
    }
  }

  /// Stable description of what the action does, used for identity.
  ///
  /// Timeouts are excluded: they change when work gives up, not what it
  /// produces.
  pub fn describe(&self) -> String {
    match self {
      TaskAction::Cmd { cmd, cwd, env, .. } => {
        let mut desc = format!("cmd:{cmd}");
        if let Some(cwd) = cwd {
          desc.push_str(&format!("\ncwd:{}", cwd.display()));
        }
        for (key, value) in env {
          desc.push_str(&format!("\nenv:{key}={value}"));
        }
        desc
      }
      TaskAction::Callback { label, .. } => format!("callback:{label}"),
    }
  }
}

impl fmt::Debug for TaskAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskAction::Cmd { cmd, cwd, env, timeout } => f
        .debug_struct("Cmd")
        .field("cmd", cmd)
        .field("cwd", cwd)
        .field("env", env)
        .field("timeout", timeout)
        .finish(),
      TaskAction::Callback { label, .. } => f.debug_struct("Callback").field("label", label).finish_non_exhaustive(),
    }
  }
}

/// Builder for a task about to be added to a graph.
#[derive(Debug, Clone)]
pub struct TaskSpec {
  pub name: String,
  pub action: TaskAction,
  pub inputs: Vec<PathBuf>,
  pub outputs: Vec<PathBuf>,
  pub after: Vec<TaskId>,
  pub cost: u32,
  pub disable_cache: bool,
  pub message: Option<String>,
}

impl TaskSpec {
  pub fn new(name: impl Into<String>, action: TaskAction) -> Self {
    Self {
      name: name.into(),
      action,
      inputs: Vec::new(),
      outputs: Vec::new(),
      after: Vec::new(),
      cost: 1,
      disable_cache: false,
      message: None,
    }
  }

  pub fn cmd(name: impl Into<String>, cmd: impl Into<String>) -> Self {
    Self::new(name, TaskAction::cmd(cmd))
  }

  pub fn inputs<I, P>(mut self, inputs: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    self.inputs.extend(inputs.into_iter().map(Into::into));
    self
  }

  pub fn outputs<I, P>(mut self, outputs: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    self.outputs.extend(outputs.into_iter().map(Into::into));
    self
  }

  pub fn after<I>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = TaskId>,
  {
    self.after.extend(deps);
    self
  }

  pub fn cost(mut self, cost: u32) -> Self {
    self.cost = cost;
    self
  }

  pub fn disable_cache(mut self) -> Self {
    self.disable_cache = true;
    self
  }

  pub fn message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }

  /// Identity key: action description plus sorted declared paths.
  pub fn key(&self) -> Result<ObjectHash, HashError> {
    KeyMaterial::new(&self.action, &self.inputs, &self.outputs).compute_hash()
  }
}

#[derive(Serialize)]
struct KeyMaterial {
  action: String,
  inputs: Vec<String>,
  outputs: Vec<String>,
}

impl KeyMaterial {
  fn new(action: &TaskAction, inputs: &[PathBuf], outputs: &[PathBuf]) -> Self {
    let sorted = |paths: &[PathBuf]| {
      let mut paths: Vec<String> = paths.iter().map(|p| p.to_string_lossy().to_string()).collect();
      paths.sort();
      paths.dedup();
      paths
    };
    Self {
      action: action.describe(),
      inputs: sorted(inputs),
      outputs: sorted(outputs),
    }
  }
}

impl Hashable for KeyMaterial {}

/// A task owned by a graph.
#[derive(Debug, Clone)]
pub struct Task {
  pub id: TaskId,
  pub name: String,
  pub key: ObjectHash,
  pub action: TaskAction,
  pub inputs: Vec<PathBuf>,
  pub outputs: Vec<PathBuf>,
  /// Explicit predecessors.
  pub after: BTreeSet<TaskId>,
  pub cost: u32,
  pub disable_cache: bool,
  pub message: Option<String>,
}

impl Task {
  pub(crate) fn from_spec(id: TaskId, key: ObjectHash, spec: TaskSpec) -> Self {
    Self {
      id,
      name: spec.name,
      key,
      action: spec.action,
      inputs: spec.inputs,
      outputs: spec.outputs,
      after: spec.after.into_iter().collect(),
      cost: spec.cost,
      disable_cache: spec.disable_cache,
      message: spec.message,
    }
  }

  /// Fold a duplicate spec into this task.
  pub(crate) fn merge(&mut self, spec: TaskSpec) {
    self.after.extend(spec.after);
    self.disable_cache |= spec.disable_cache;
    self.cost = self.cost.max(spec.cost);
    if self.message.is_none() {
      self.message = spec.message;
    }
  }
}
