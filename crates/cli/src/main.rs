use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mason_lib::workspace::Workspace;

mod cmd;
mod console;
mod effects;

/// mason - monorepo build orchestrator
#[derive(Parser)]
#[command(name = "mason")]
#[command(version, about = "Monorepo build orchestrator", long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Workspace root (defaults to searching upwards from the current directory)
  #[arg(long, global = true)]
  workspace: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a package
  Build(cmd::build::BuildArgs),

  /// Describe the workspace
  #[command(subcommand)]
  Describe(cmd::describe::DescribeCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

  let root = resolve_root(cli.workspace.as_deref())?;

  match cli.command {
    Commands::Build(args) => cmd::build::cmd_build(&root, args).await,
    Commands::Describe(command) => cmd::describe::cmd_describe(&root, command),
  }
}

fn resolve_root(flag: Option<&Path>) -> Result<PathBuf> {
  if let Some(root) = flag {
    return Ok(root.to_path_buf());
  }
  let cwd = std::env::current_dir()?;
  Workspace::find_root(&cwd).ok_or_else(|| {
    anyhow!(
      "no workspace.yaml found in {} or any parent directory",
      cwd.display()
    )
  })
}
