//! Console reporter: human-readable build progress.

use std::time::Duration;

use owo_colors::OwoColorize;

use mason_lib::build::BuildSummary;
use mason_lib::plan::{BuildPlan, CacheStatus, PlanNode};
use mason_lib::report::{PackageOutcome, Reporter};

pub struct ConsoleReporter;

impl ConsoleReporter {
  pub fn new() -> Self {
    ConsoleReporter
  }
}

impl Reporter for ConsoleReporter {
  fn build_started(&self, plan: &BuildPlan) {
    println!(
      "building {} ({} packages, {} to build)",
      plan.target.bold(),
      plan.len(),
      plan.count(CacheStatus::MustBuild)
    );
  }

  fn package_started(&self, node: &PlanNode) {
    println!(
      "[{}] {} build started",
      node.full_name().cyan(),
      node.package.kind().to_string().dimmed()
    );
  }

  fn package_finished(&self, node: &PlanNode, outcome: &PackageOutcome, elapsed: Duration) {
    let name = node.full_name();
    match outcome {
      PackageOutcome::Built => {
        println!("[{}] built in {}", name.green(), format_elapsed(elapsed));
      }
      PackageOutcome::CachedLocal => {
        println!("[{}] already built (local cache)", name.green());
      }
      PackageOutcome::CachedRemote => {
        println!("[{}] pulled from remote cache in {}", name.green(), format_elapsed(elapsed));
      }
      PackageOutcome::Failed { message } => {
        eprintln!("[{}] failed after {}:\n{}", name.red(), format_elapsed(elapsed), message);
      }
      PackageOutcome::Skipped { failed_dependency } => {
        eprintln!(
          "[{}] skipped: dependency {} failed",
          name.yellow(),
          failed_dependency.red()
        );
      }
    }
  }

  fn build_finished(&self, target: &str, summary: &BuildSummary) {
    if summary.is_success() {
      println!("{} {}", "done".green().bold(), target);
    } else {
      eprintln!("{} {}", "failed".red().bold(), target);
    }
  }
}

/// Millisecond precision is plenty for build durations.
fn format_elapsed(elapsed: Duration) -> String {
  humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)).to_string()
}
