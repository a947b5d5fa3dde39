//! Task graph: scheduling, incremental caching and failure propagation.
//!
//! A run goes through five steps:
//! 1. [`TaskGraph::setup`] resolves explicit and implicit edges
//! 2. [`TaskGraph::sort_tasks`] groups tasks into dependency levels
//! 3. [`TaskGraph::load_cache`] reads the fingerprint cache
//! 4. [`TaskGraph::execute`] runs levels in order with bounded parallelism
//! 5. [`TaskGraph::save_cache`] persists the cache if anything ran
//!
//! A failed task never stops independent work: its dependents are skipped
//! and everything else keeps going.

pub mod actions;
pub mod cache;
pub mod dag;
pub mod fingerprint;
pub mod task;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::consts::{CACHE_FILENAME, LOCK_FILENAME};
use crate::util::hash::{ObjectHash, hash_path};

pub use cache::{CacheError, CacheRecord, CacheStore, OutputRecord, OutputSignature, SignatureMode};
pub use dag::{ImplicitEdge, TaskDag};
pub use fingerprint::Fingerprint;
pub use task::{Task, TaskAction, TaskId, TaskSpec};
pub use types::{CycleError, ExecuteConfig, ExecuteSummary, GraphError, TaskError, TaskStatus};

/// Owns every task of a build run.
#[derive(Debug)]
pub struct TaskGraph {
  tasks: Vec<Task>,
  by_key: HashMap<ObjectHash, TaskId>,
  dag: Option<TaskDag>,
  levels: Option<Vec<Vec<TaskId>>>,
  cache: Arc<CacheStore>,
  intermediate_dir: PathBuf,
}

/// What happened to one dispatched task.
enum Outcome {
  CacheHit(Fingerprint),
  Executed(Fingerprint, Option<CacheRecord>),
  Failed(TaskError),
}

impl TaskGraph {
  /// An empty graph whose cache and artifacts live under `intermediate_dir`.
  pub fn new(intermediate_dir: impl Into<PathBuf>) -> Self {
    let intermediate_dir = intermediate_dir.into();
    Self {
      tasks: Vec::new(),
      by_key: HashMap::new(),
      dag: None,
      levels: None,
      cache: Arc::new(CacheStore::new(intermediate_dir.join(CACHE_FILENAME))),
      intermediate_dir,
    }
  }

  /// Add a task, or fold it into an identical existing one.
  ///
  /// Tasks are identical when their identity keys match (same action, same
  /// declared inputs and outputs). The existing id is returned and the new
  /// spec's predecessors are merged in.
  pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskId, GraphError> {
    let key = spec.key().map_err(|source| GraphError::Key {
      task: spec.name.clone(),
      source,
    })?;
    self.invalidate();

    if let Some(&id) = self.by_key.get(&key) {
      debug!(task = %self.tasks[id.0].name, duplicate = %spec.name, "merging identical task");
      self.tasks[id.0].merge(spec);
      return Ok(id);
    }

    let id = TaskId(self.tasks.len());
    debug!(task = %spec.name, id = %id, key = %key, "adding task");
    self.by_key.insert(key.clone(), id);
    self.tasks.push(Task::from_spec(id, key, spec));
    Ok(id)
  }

  /// Make `task` run after `dependency`.
  pub fn add_dependency(&mut self, task: TaskId, dependency: TaskId) -> Result<(), GraphError> {
    let Some(entry) = self.tasks.get_mut(task.0) else {
      return Err(GraphError::UnknownTask(task));
    };
    entry.after.insert(dependency);
    self.invalidate();
    Ok(())
  }

  pub fn task(&self, id: TaskId) -> Option<&Task> {
    self.tasks.get(id.0)
  }

  pub fn tasks(&self) -> &[Task] {
    &self.tasks
  }

  pub fn find(&self, name: &str) -> Option<&Task> {
    self.tasks.iter().find(|t| t.name == name)
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn intermediate_dir(&self) -> &Path {
    &self.intermediate_dir
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  fn invalidate(&mut self) {
    self.dag = None;
    self.levels = None;
  }

  /// Resolve explicit and implicit edges. Calling it again is a no-op until
  /// tasks change.
  pub fn setup(&mut self) -> Result<(), GraphError> {
    if self.dag.is_some() {
      return Ok(());
    }
    let dag = TaskDag::build(&self.tasks)?;
    info!(
      tasks = self.tasks.len(),
      edges = dag.edge_count(),
      implicit = dag.implicit_edges().len(),
      "task graph set up"
    );
    self.dag = Some(dag);
    Ok(())
  }

  /// Edges inferred from shared paths during setup.
  pub fn implicit_edges(&self) -> &[ImplicitEdge] {
    self.dag.as_ref().map(|d| d.implicit_edges()).unwrap_or(&[])
  }

  /// Direct predecessors of a task after setup.
  pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
    self.dag.as_ref().map(|d| d.predecessors(id)).unwrap_or_default()
  }

  /// Compute dependency levels, running setup first if needed.
  pub fn sort_tasks(&mut self) -> Result<&[Vec<TaskId>], GraphError> {
    self.setup()?;
    if self.levels.is_none() {
      let Some(dag) = self.dag.as_ref() else {
        return Err(GraphError::NotSorted);
      };
      let levels = dag.levels(&self.tasks).inspect_err(|e| error!(error = %e, "cannot order tasks"))?;
      debug!(levels = levels.len(), "sorted tasks");
      self.levels = Some(levels);
    }
    Ok(self.levels.as_deref().unwrap_or(&[]))
  }

  pub fn levels(&self) -> Option<&[Vec<TaskId>]> {
    self.levels.as_deref()
  }

  /// Load the cache store. Never fails; see [`CacheStore::load`].
  pub fn load_cache(&mut self) {
    let path = self.cache.path().to_path_buf();
    self.cache = Arc::new(CacheStore::load(path));
  }

  /// Run every task in level order.
  ///
  /// Tasks whose predecessors failed or were skipped are skipped. Cached
  /// tasks with valid outputs are not run. Everything else is dispatched with
  /// at most `config.parallelism` actions in flight.
  pub async fn execute(&mut self, config: &ExecuteConfig) -> Result<ExecuteSummary, GraphError> {
    let levels = self.levels.clone().ok_or(GraphError::NotSorted)?;
    let Some(dag) = self.dag.as_ref() else {
      return Err(GraphError::NotSorted);
    };

    info!(tasks = self.tasks.len(), levels = levels.len(), "starting graph execution");

    let mut summary = ExecuteSummary::new(self.tasks.len());
    let mut fingerprints: Vec<Option<Fingerprint>> = vec![None; self.tasks.len()];
    let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
    let mut completed = Vec::new();

    for (level_idx, level) in levels.iter().enumerate() {
      debug!(level = level_idx, tasks = level.len(), "executing level");

      let mut join_set = JoinSet::new();
      let mut pending: HashSet<TaskId> = HashSet::new();

      for &id in level {
        let preds = dag.predecessors(id);
        if let Some(root) = find_failed_dependency(&preds, &summary) {
          warn!(
            task = %self.tasks[id.0].name,
            failed_dependency = %self.tasks[root.0].name,
            "skipping task due to failed dependency"
          );
          summary.statuses[id.0] = TaskStatus::Skipped { failed_dependency: root };
          continue;
        }

        let task = self.tasks[id.0].clone();
        let deps: Vec<Fingerprint> = preds.iter().filter_map(|p| fingerprints[p.0].clone()).collect();
        let cache = self.cache.clone();
        let semaphore = semaphore.clone();
        let config = config.clone();

        pending.insert(id);
        join_set.spawn(async move {
          let Ok(_permit) = semaphore.acquire().await else {
            return (task.id, Outcome::Failed(TaskError::Aborted));
          };
          let outcome = run_task(&task, deps, cache, &config).await;
          (task.id, outcome)
        });
      }

      while let Some(joined) = join_set.join_next().await {
        match joined {
          Ok((id, outcome)) => {
            pending.remove(&id);
            let name = &self.tasks[id.0].name;
            match outcome {
              Outcome::CacheHit(fp) => {
                debug!(task = %name, fingerprint = %fp.short(), "cache hit");
                summary.statuses[id.0] = TaskStatus::CacheHit;
                fingerprints[id.0] = Some(fp);
              }
              Outcome::Executed(fp, record) => {
                info!(task = %name, "task succeeded");
                if let Some(record) = record {
                  completed.push((fp.clone(), record));
                }
                summary.statuses[id.0] = TaskStatus::Executed;
                fingerprints[id.0] = Some(fp);
              }
              Outcome::Failed(e) => {
                error!(task = %name, error = %e, "task failed");
                summary.statuses[id.0] = TaskStatus::Failed;
                summary.failures.insert(id, e);
              }
            }
          }
          Err(e) => {
            error!(error = %e, "task panicked");
          }
        }
      }

      for id in pending {
        error!(task = %self.tasks[id.0].name, "task aborted");
        summary.statuses[id.0] = TaskStatus::Failed;
        summary.failures.insert(id, TaskError::Aborted);
      }

      // Workers dropped their handles, so this does not copy the store.
      let store = Arc::make_mut(&mut self.cache);
      for (fp, record) in completed.drain(..) {
        store.insert(fp, record);
      }
    }

    info!(
      executed = summary.executed(),
      cache_hits = summary.cache_hits(),
      failed = summary.failed(),
      skipped = summary.skipped(),
      "graph execution complete"
    );

    Ok(summary)
  }

  /// Persist the cache if any task executed. Returns whether it was written.
  pub fn save_cache(&mut self, summary: &ExecuteSummary) -> Result<bool, GraphError> {
    if summary.executed() == 0 && !self.cache.is_dirty() {
      debug!("nothing executed, cache left untouched");
      return Ok(false);
    }
    Arc::make_mut(&mut self.cache).save()?;
    info!(path = %self.cache.path().display(), records = self.cache.len(), "saved cache");
    Ok(true)
  }

  /// Delete the cache store and every artifact under the intermediate
  /// directory. The lock file is kept.
  pub fn clean_cache(&mut self) -> Result<(), GraphError> {
    Arc::make_mut(&mut self.cache).delete()?;

    let entries = match std::fs::read_dir(&self.intermediate_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
      Err(source) => {
        return Err(GraphError::Clean {
          path: self.intermediate_dir.clone(),
          source,
        });
      }
    };

    for entry in entries {
      let entry = entry.map_err(|source| GraphError::Clean {
        path: self.intermediate_dir.clone(),
        source,
      })?;
      if entry.file_name() == LOCK_FILENAME {
        continue;
      }
      let path = entry.path();
      let removed = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
        std::fs::remove_dir_all(&path)
      } else {
        std::fs::remove_file(&path)
      };
      removed.map_err(|source| GraphError::Clean { path, source })?;
    }

    info!(path = %self.intermediate_dir.display(), "cleaned intermediate directory");
    Ok(())
  }
}

/// Root cause of a failed or skipped predecessor, if any.
fn find_failed_dependency(preds: &[TaskId], summary: &ExecuteSummary) -> Option<TaskId> {
  preds.iter().find_map(|&p| match summary.statuses[p.0] {
    TaskStatus::Failed => Some(p),
    TaskStatus::Skipped { failed_dependency } => Some(failed_dependency),
    _ => None,
  })
}

async fn run_task(task: &Task, deps: Vec<Fingerprint>, cache: Arc<CacheStore>, config: &ExecuteConfig) -> Outcome {
  let lookup = {
    let task = task.clone();
    tokio::task::spawn_blocking(move || lookup_cache(&task, &deps, &cache)).await
  };
  let fingerprint = match lookup {
    Ok(Ok((fp, true))) => return Outcome::CacheHit(fp),
    Ok(Ok((fp, false))) => fp,
    Ok(Err(e)) => return Outcome::Failed(e),
    Err(_) => return Outcome::Failed(TaskError::Aborted),
  };

  match &task.message {
    Some(message) => info!(task = %task.name, "{message}"),
    None => info!(task = %task.name, "running task"),
  }

  if let Err(e) = actions::execute_action(&task.action, config.shell.as_deref()).await {
    return Outcome::Failed(e);
  }

  let capture = {
    let task = task.clone();
    let mode = config.signature;
    tokio::task::spawn_blocking(move || capture_outputs(&task, mode)).await
  };
  match capture {
    Ok(Ok(record)) => {
      let record = (!task.disable_cache).then_some(record);
      Outcome::Executed(fingerprint, record)
    }
    Ok(Err(e)) => Outcome::Failed(e),
    Err(_) => Outcome::Failed(TaskError::Aborted),
  }
}

/// Compute the task's fingerprint and check whether its cached outputs are
/// still valid.
fn lookup_cache(task: &Task, deps: &[Fingerprint], cache: &CacheStore) -> Result<(Fingerprint, bool), TaskError> {
  let mut inputs = Vec::with_capacity(task.inputs.len());
  for input in &task.inputs {
    inputs.push((input.clone(), hash_path(input)?));
  }
  let fingerprint = Fingerprint::compute(&task.key, &inputs, deps);

  if task.disable_cache {
    return Ok((fingerprint, false));
  }
  let hit = cache
    .get(&fingerprint)
    .is_some_and(|record| record.covers(&task.outputs) && record.is_valid());
  Ok((fingerprint, hit))
}

/// Signatures of the task's declared outputs, which must all exist.
fn capture_outputs(task: &Task, mode: SignatureMode) -> Result<CacheRecord, TaskError> {
  let mut outputs = Vec::with_capacity(task.outputs.len());
  for path in &task.outputs {
    let signature = OutputSignature::capture(path, mode)?.ok_or_else(|| TaskError::MissingOutput { path: path.clone() })?;
    outputs.push(OutputRecord {
      path: path.clone(),
      signature,
    });
  }
  Ok(CacheRecord {
    key: task.key.clone(),
    task: task.name.clone(),
    outputs,
  })
}
