//! Dependency edges between tasks and level computation.
//!
//! Edges come from two places: explicit predecessor links on each task, and
//! implicit producer to consumer links where one task declares as input a
//! path another task declares as output. Edges run from dependency to
//! dependent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use super::task::{Task, TaskId};
use super::types::{CycleError, GraphError};

/// An edge inferred from a shared path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImplicitEdge {
  pub producer: TaskId,
  pub consumer: TaskId,
  pub path: PathBuf,
}

/// Task dependency graph. Node `i` is task `TaskId(i)`.
#[derive(Debug, Default)]
pub struct TaskDag {
  graph: DiGraph<TaskId, ()>,
  implicit: Vec<ImplicitEdge>,
}

impl TaskDag {
  /// Resolve all edges for `tasks`.
  ///
  /// # Errors
  ///
  /// `UnknownDependency` if a task names a predecessor outside the arena,
  /// `DuplicateOutput` if two tasks declare the same output path.
  pub fn build(tasks: &[Task]) -> Result<Self, GraphError> {
    let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
    for task in tasks {
      graph.add_node(task.id);
    }

    for task in tasks {
      for &dep in &task.after {
        if dep.0 >= tasks.len() {
          return Err(GraphError::UnknownDependency {
            task: task.name.clone(),
            dependency: dep,
          });
        }
        graph.update_edge(node(dep), node(task.id), ());
      }
    }

    let mut producers: HashMap<&Path, TaskId> = HashMap::new();
    for task in tasks {
      for output in &task.outputs {
        if let Some(&first) = producers.get(output.as_path())
          && first != task.id
        {
          return Err(GraphError::DuplicateOutput {
            path: output.clone(),
            first: tasks[first.0].name.clone(),
            second: task.name.clone(),
          });
        }
        producers.insert(output.as_path(), task.id);
      }
    }

    let mut implicit = Vec::new();
    for task in tasks {
      for input in &task.inputs {
        if let Some(&producer) = producers.get(input.as_path())
          && producer != task.id
        {
          graph.update_edge(node(producer), node(task.id), ());
          implicit.push(ImplicitEdge {
            producer,
            consumer: task.id,
            path: input.clone(),
          });
        }
      }
    }

    Ok(Self { graph, implicit })
  }

  pub fn implicit_edges(&self) -> &[ImplicitEdge] {
    &self.implicit
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  /// Direct predecessors of a task, in id order.
  pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
    let mut deps: Vec<TaskId> = self
      .graph
      .neighbors_directed(node(id), Direction::Incoming)
      .map(|idx| self.graph[idx])
      .collect();
    deps.sort();
    deps
  }

  /// Group tasks into levels with Kahn's algorithm.
  ///
  /// Every task in level N+1 depends only on tasks in levels up to N. Within
  /// a level, tasks are ordered by descending cost, then by id.
  ///
  /// # Errors
  ///
  /// `CycleError` naming every task that sits on a cycle. No partial order
  /// is returned.
  pub fn levels(&self, tasks: &[Task]) -> Result<Vec<Vec<TaskId>>, CycleError> {
    let mut in_degree: Vec<usize> = self
      .graph
      .node_indices()
      .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
      .collect();

    let mut ready: Vec<NodeIndex> = self.graph.node_indices().filter(|idx| in_degree[idx.index()] == 0).collect();
    let mut levels = Vec::new();
    let mut placed = 0;

    while !ready.is_empty() {
      let mut next = Vec::new();
      for &idx in &ready {
        for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          let degree = &mut in_degree[dependent.index()];
          *degree -= 1;
          if *degree == 0 {
            next.push(dependent);
          }
        }
      }

      let mut level: Vec<TaskId> = ready.iter().map(|&idx| self.graph[idx]).collect();
      level.sort_by(|a, b| tasks[b.0].cost.cmp(&tasks[a.0].cost).then(a.cmp(b)));
      placed += level.len();
      levels.push(level);
      ready = next;
    }

    if placed < tasks.len() {
      return Err(self.cycle_error(tasks));
    }

    Ok(levels)
  }

  fn cycle_error(&self, tasks: &[Task]) -> CycleError {
    let mut members: Vec<TaskId> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
      .flatten()
      .map(|idx| self.graph[idx])
      .collect();
    members.sort();
    CycleError {
      members: members.into_iter().map(|id| tasks[id.0].name.clone()).collect(),
    }
  }
}

fn node(id: TaskId) -> NodeIndex {
  NodeIndex::new(id.0)
}
