//! Test utilities for weft-lib.
//!
//! Cross-platform shell snippets for tests that run real `Cmd` actions.

use std::path::Path;

/// Returns a shell command that creates (or truncates) a file.
#[cfg(unix)]
pub fn touch_cmd(path: &Path) -> String {
  format!("touch '{}'", path.display())
}

#[cfg(windows)]
pub fn touch_cmd(path: &Path) -> String {
  format!("New-Item -ItemType File -Force -Path '{}' | Out-Null", path.display())
}

/// Returns a shell command that writes `content` into a file.
#[cfg(unix)]
pub fn write_cmd(path: &Path, content: &str) -> String {
  format!("printf '%s' '{}' > '{}'", content, path.display())
}

#[cfg(windows)]
pub fn write_cmd(path: &Path, content: &str) -> String {
  format!("Set-Content -NoNewline -Path '{}' -Value '{}'", path.display(), content)
}

/// Returns a shell command that exits with a non-zero status.
pub fn fail_cmd() -> String {
  "exit 3".to_string()
}

/// Returns a shell command that sleeps for the given number of seconds.
#[cfg(unix)]
pub fn sleep_cmd(secs: u32) -> String {
  format!("sleep {}", secs)
}

#[cfg(windows)]
pub fn sleep_cmd(secs: u32) -> String {
  format!("Start-Sleep -Seconds {}", secs)
}

/// Builds a current-thread runtime and blocks on the future.
pub fn block_on<F: std::future::Future>(f: F) -> F::Output {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
    .block_on(f)
}
