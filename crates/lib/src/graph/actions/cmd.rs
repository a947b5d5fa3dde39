//! Cmd action implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::graph::types::TaskError;

/// Execute a shell command.
///
/// The command inherits the caller's environment, extended with `env`, and
/// runs in `cwd` when given. A non-zero exit status or an elapsed `timeout`
/// is an error; the child is killed when the timeout fires.
///
/// Returns the trimmed stdout on success.
pub async fn execute_cmd(
  cmd: &str,
  env: &BTreeMap<String, String>,
  cwd: Option<&Path>,
  timeout: Option<Duration>,
  shell: Option<&str>,
) -> Result<String, TaskError> {
  let (shell_cmd, shell_args) = get_shell(shell);

  let mut command = Command::new(&shell_cmd);
  command.args(&shell_args).arg(cmd).envs(env).kill_on_drop(true);
  if let Some(cwd) = cwd {
    command.current_dir(cwd);
  }

  debug!(shell = %shell_cmd, cmd = %cmd, working_dir = ?cwd, "spawning process");

  let output = match timeout {
    Some(limit) => match tokio::time::timeout(limit, command.output()).await {
      Ok(output) => output?,
      Err(_) => {
        return Err(TaskError::Timeout {
          cmd: cmd.to_string(),
          timeout: limit,
        });
      }
    },
    None => command.output().await?,
  };

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    return Err(TaskError::CmdFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(stdout)
}

/// Get the shell command and arguments for the current platform.
///
/// Defaults to `/bin/sh` (Unix) or `powershell.exe` (Windows) rather than
/// the user's login shell, which may source profile files.
pub(crate) fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
