//! Implementation of the `weft clean` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use weft_lib::orchestrate::{BuildConfig, clean};
use weft_lib::rules::ManifestRules;

use crate::output::print_success;

pub fn cmd_clean(project_dir: &Path, intermediate_dir: Option<PathBuf>) -> Result<()> {
  let rules = ManifestRules::load_project(project_dir).context("Failed to load project manifest")?;
  let config = BuildConfig {
    intermediate_dir,
    ..Default::default()
  };

  let cleaned = clean(rules.project(), &config).context("Clean failed")?;
  print_success(&format!("Cleaned {}", cleaned.display()));
  Ok(())
}
