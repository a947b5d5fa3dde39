//! Implementation of the `weft targets` command.

use std::fmt::Display;
use std::path::Path;

use anyhow::{Context, Result};

use weft_lib::rules::{ManifestRules, RuleRepository};

use crate::output::{OutputFormat, print_info, print_json, print_stat};

fn join<T: Display>(values: &[T]) -> String {
  values.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

pub fn cmd_targets(project_dir: &Path, output: OutputFormat) -> Result<()> {
  let rules = ManifestRules::load_project(project_dir).context("Failed to load project manifest")?;

  if output.is_json() {
    return print_json(&rules.targets());
  }

  if rules.targets().is_empty() {
    print_info("No targets declared.");
    return Ok(());
  }

  for (i, target) in rules.targets().iter().enumerate() {
    if i > 0 {
      println!();
    }
    print_info(&target.name);
    print_stat("Type", target.target_type.as_str());
    print_stat("Configurations", &join(&target.configurations));
    print_stat("Platforms", &join(&target.platforms));
    print_stat("Architectures", &join(&target.architectures));
    if !target.modules.is_empty() {
      print_stat("Modules", &target.modules.join(", "));
    }
  }

  Ok(())
}
