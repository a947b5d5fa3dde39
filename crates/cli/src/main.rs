mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, cmd_build, cmd_clean, cmd_info, cmd_targets};
use output::OutputFormat;

/// Incremental multi-target build orchestrator
#[derive(Parser)]
#[command(name = "weft")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Project folder containing weft.toml
  #[arg(short = 'C', long = "project", global = true, default_value = ".")]
  project: PathBuf,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build targets
  Build(BuildArgs),

  /// Delete the cache and every intermediate artifact
  Clean {
    /// Intermediate directory (overrides WEFT_INTERMEDIATE_DIR)
    #[arg(long)]
    intermediate_dir: Option<PathBuf>,
  },

  /// List declared targets
  Targets {
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Show host platform information
  Info,
}

fn init_logging(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match cli.command {
    Commands::Build(args) => {
      let success = cmd_build(&cli.project, args)?;
      Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
    }
    Commands::Clean { intermediate_dir } => {
      cmd_clean(&cli.project, intermediate_dir)?;
      Ok(ExitCode::SUCCESS)
    }
    Commands::Targets { output } => {
      cmd_targets(&cli.project, output)?;
      Ok(ExitCode::SUCCESS)
    }
    Commands::Info => {
      cmd_info();
      Ok(ExitCode::SUCCESS)
    }
  }
}
