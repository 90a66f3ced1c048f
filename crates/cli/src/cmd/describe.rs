//! Implementation of `mason describe`.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use owo_colors::OwoColorize;

use mason_lib::plan::package_versions;
use mason_lib::workspace::Workspace;

#[derive(Subcommand)]
pub enum DescribeCommands {
  /// Describe the dependencies of a package on the console or in Graphviz's
  /// dot format
  Dependencies {
    /// Package to describe (all dependency roots when omitted)
    package: Option<String>,

    /// Produce Graphviz dot output
    #[arg(long)]
    dot: bool,
  },
}

pub fn cmd_describe(root: &Path, command: DescribeCommands) -> Result<()> {
  let workspace = Workspace::load(root).context("cannot load workspace")?;

  match command {
    DescribeCommands::Dependencies { package, dot } => {
      let roots = match package {
        Some(reference) => {
          let pkg = workspace
            .resolve_target(&reference)
            .ok_or_else(|| anyhow!("package not found: {}", reference))?;
          vec![pkg.full_name()]
        }
        None => dependency_roots(&workspace),
      };

      if dot {
        print_dot(&workspace, &roots)
      } else {
        for root in &roots {
          print_tree(&workspace, root, 0);
        }
        Ok(())
      }
    }
  }
}

/// Packages no other package depends on.
fn dependency_roots(workspace: &Workspace) -> Vec<String> {
  let depended_upon: BTreeSet<&String> = workspace
    .packages
    .values()
    .flat_map(|p| p.dependencies.iter())
    .collect();

  workspace
    .packages
    .keys()
    .filter(|name| !depended_upon.contains(name))
    .cloned()
    .collect()
}

fn print_tree(workspace: &Workspace, name: &str, indent: usize) {
  let Some(package) = workspace.packages.get(name) else {
    return;
  };

  println!(
    "{:indent$}{} {}",
    "",
    format!("[{:>7}]", package.kind()).dimmed(),
    name,
    indent = indent
  );

  for dep in &package.dependencies {
    print_tree(workspace, dep, indent + 4);
  }
}

/// Graphviz output over the transitive dependency graphs of `roots`, with
/// nodes keyed by content version so shared dependencies merge.
fn print_dot(workspace: &Workspace, roots: &[String]) -> Result<()> {
  let mut nodes: BTreeSet<String> = BTreeSet::new();
  let mut edges: BTreeSet<String> = BTreeSet::new();

  for root in roots {
    let versions = package_versions(workspace, root)?;
    for (name, version) in &versions {
      nodes.insert(format!("p{} [label=\"{}\"];", version, name));
      if let Some(package) = workspace.packages.get(name) {
        for dep in &package.dependencies {
          edges.insert(format!("p{} -> p{};", version, versions[dep]));
        }
      }
    }
  }

  println!("digraph G {{");
  for node in nodes {
    println!("  {}", node);
  }
  for edge in edges {
    println!("  {}", edge);
  }
  println!("}}");
  Ok(())
}
