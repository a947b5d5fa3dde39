//! Per-target pre-build and post-build hooks.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::graph::actions::execute_cmd;
use crate::graph::{ExecuteSummary, TaskError};
use crate::model::Target;

#[derive(Debug, Error)]
pub enum HookError {
  #[error("{stage} hook of target {target} failed: {source}")]
  Command {
    target: String,
    stage: &'static str,
    #[source]
    source: TaskError,
  },

  #[error("{stage} hook of target {target} failed: {message}")]
  Failed {
    target: String,
    stage: &'static str,
    message: String,
  },
}

/// Called once per target that has at least one job in a build run.
pub trait TargetHooks: Send + Sync {
  /// Before any of the target's tasks are created. An error aborts the run.
  fn pre_build(&self, target: &Target) -> impl Future<Output = Result<(), HookError>> + Send;

  /// After the graph has executed. An error marks the run failed.
  ///
  /// Every target whose pre-build hook succeeded gets this call, also when a
  /// later target stops the run early. The summary is then
  /// [`ExecuteSummary::aborted`].
  fn post_build(
    &self,
    target: &Target,
    summary: &ExecuteSummary,
  ) -> impl Future<Output = Result<(), HookError>> + Send;
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl TargetHooks for NoopHooks {
  async fn pre_build(&self, _target: &Target) -> Result<(), HookError> {
    Ok(())
  }

  async fn post_build(&self, _target: &Target, _summary: &ExecuteSummary) -> Result<(), HookError> {
    Ok(())
  }
}

/// Runs the `pre_build` / `post_build` commands declared on each target.
///
/// Commands run in the project folder with `WEFT_TARGET` set. Post-build
/// commands also see `WEFT_BUILD_STATUS` (`success` or `failed`).
#[derive(Debug, Clone)]
pub struct CommandHooks {
  folder: PathBuf,
  shell: Option<String>,
}

impl CommandHooks {
  pub fn new(folder: impl Into<PathBuf>) -> Self {
    Self {
      folder: folder.into(),
      shell: None,
    }
  }

  pub fn with_shell(mut self, shell: Option<String>) -> Self {
    self.shell = shell;
    self
  }

  async fn run(
    &self,
    target: &Target,
    stage: &'static str,
    cmd: &str,
    mut env: BTreeMap<String, String>,
  ) -> Result<(), HookError> {
    info!(target = %target.name, stage, "running hook");
    env.insert("WEFT_TARGET".to_string(), target.name.clone());
    execute_cmd(cmd, &env, Some(self.folder.as_path()), None, self.shell.as_deref())
      .await
      .map(|_| ())
      .map_err(|source| HookError::Command {
        target: target.name.clone(),
        stage,
        source,
      })
  }
}

impl TargetHooks for CommandHooks {
  async fn pre_build(&self, target: &Target) -> Result<(), HookError> {
    match &target.pre_build {
      Some(cmd) => self.run(target, "pre-build", cmd, BTreeMap::new()).await,
      None => Ok(()),
    }
  }

  async fn post_build(&self, target: &Target, summary: &ExecuteSummary) -> Result<(), HookError> {
    let Some(cmd) = &target.post_build else {
      return Ok(());
    };
    let status = if summary.is_success() { "success" } else { "failed" };
    let env = BTreeMap::from([("WEFT_BUILD_STATUS".to_string(), status.to_string())]);
    self.run(target, "post-build", cmd, env).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Configuration;
  use crate::platform::{Architecture, Platform};
  use crate::util::testutil::{fail_cmd, write_cmd};
  use tempfile::TempDir;

  fn target() -> Target {
    Target::new(
      "Game",
      "/p/Source/Game",
      vec![Configuration::Debug],
      vec![Platform::Linux],
      vec![Architecture::X64],
    )
  }

  #[tokio::test]
  async fn missing_commands_are_noops() {
    let temp = TempDir::new().unwrap();
    let hooks = CommandHooks::new(temp.path());

    hooks.pre_build(&target()).await.unwrap();
    hooks.post_build(&target(), &ExecuteSummary::default()).await.unwrap();
  }

  #[tokio::test]
  async fn pre_build_runs_in_project_folder() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("pre.txt");
    let mut target = target();
    target.pre_build = Some(write_cmd(&marker, "ran"));

    CommandHooks::new(temp.path()).pre_build(&target).await.unwrap();
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "ran");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn post_build_sees_status() {
    let temp = TempDir::new().unwrap();
    let mut target = target();
    target.post_build = Some("printf '%s %s' \"$WEFT_TARGET\" \"$WEFT_BUILD_STATUS\" > post.txt".to_string());

    CommandHooks::new(temp.path())
      .post_build(&target, &ExecuteSummary::default())
      .await
      .unwrap();
    assert_eq!(
      std::fs::read_to_string(temp.path().join("post.txt")).unwrap(),
      "Game success"
    );
  }

  #[tokio::test]
  async fn failing_hook_names_target_and_stage() {
    let temp = TempDir::new().unwrap();
    let mut target = target();
    target.pre_build = Some(fail_cmd());

    let err = CommandHooks::new(temp.path()).pre_build(&target).await.unwrap_err();
    assert!(err.to_string().starts_with("pre-build hook of target Game failed"));
  }
}
