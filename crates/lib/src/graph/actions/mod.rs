//! Action dispatch.

pub mod cmd;

use tracing::debug;

use crate::graph::task::TaskAction;
use crate::graph::types::TaskError;

pub use cmd::execute_cmd;

/// Run a task's action to completion.
pub async fn execute_action(action: &TaskAction, shell: Option<&str>) -> Result<(), TaskError> {
  match action {
    TaskAction::Cmd { cmd, cwd, env, timeout } => {
      if let Some(cwd) = cwd {
        tokio::fs::create_dir_all(cwd).await?;
      }
      execute_cmd(cmd, env, cwd.as_deref(), *timeout, shell).await?;
      Ok(())
    }
    TaskAction::Callback { label, run } => {
      debug!(label = %label, "running callback");
      let run = run.clone();
      let result = tokio::task::spawn_blocking(move || run())
        .await
        .map_err(|_| TaskError::Aborted)?;
      result.map_err(|message| TaskError::Callback {
        label: label.clone(),
        message,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn callback_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let action = TaskAction::callback("count", move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    execute_action(&action, None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn callback_error_is_task_error() {
    let action = TaskAction::callback("codegen", || Err("schema invalid".to_string()));
    let err = execute_action(&action, None).await.unwrap_err();
    assert_eq!(err.to_string(), "codegen failed: schema invalid");
  }

  #[tokio::test]
  async fn cmd_creates_missing_cwd() {
    let temp = tempfile::TempDir::new().unwrap();
    let cwd = temp.path().join("not").join("yet");
    let action = TaskAction::Cmd {
      cmd: "echo ok".to_string(),
      cwd: Some(cwd.clone()),
      env: Default::default(),
      timeout: None,
    };

    execute_action(&action, None).await.unwrap();
    assert!(cwd.is_dir());
  }
}
