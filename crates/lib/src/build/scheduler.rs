//! The DAG scheduler.
//!
//! Classic in-degree bookkeeping: every node starts with an in-degree equal
//! to its dependency count; a dependency's success decrements its
//! dependents; nodes reaching zero enter a ready queue ordered by full name.
//! Ready nodes are spawned as tasks that first acquire a semaphore permit,
//! which bounds how many package actions run simultaneously. After the first
//! failure no new work is released — in-flight tasks finish, transitive
//! dependents of the failure are marked skipped, and everything else is
//! recorded as pending.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::plan::{BuildPlan, PlanNode};
use crate::report::PackageOutcome;

use super::{BuildConfig, BuildError, BuildSummary, execute};

pub(crate) async fn run(plan: &BuildPlan, config: &BuildConfig) -> BuildSummary {
  let mut summary = BuildSummary::new(&plan.target);

  let nodes: HashMap<String, PlanNode> = plan.nodes.iter().map(|n| (n.full_name(), n.clone())).collect();

  let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
  let mut in_degree: HashMap<String, usize> = HashMap::new();
  for node in &plan.nodes {
    let name = node.full_name();
    in_degree.insert(name.clone(), node.dependencies.len());
    for dep in &node.dependencies {
      dependents.entry(dep.clone()).or_default().push(name.clone());
    }
  }

  let mut ready: BTreeSet<String> = in_degree
    .iter()
    .filter(|(_, degree)| **degree == 0)
    .map(|(name, _)| name.clone())
    .collect();

  let permits = if config.max_concurrent_tasks == 0 {
    Semaphore::MAX_PERMITS
  } else {
    config.max_concurrent_tasks
  };
  let semaphore = Arc::new(Semaphore::new(permits));

  let mut tasks: JoinSet<(String, Result<PackageOutcome, BuildError>)> = JoinSet::new();
  let mut completed: HashSet<String> = HashSet::new();
  let mut failed_or_skipped: HashSet<String> = HashSet::new();
  let mut halted = false;

  loop {
    if !halted {
      while let Some(name) = ready.pop_first() {
        debug!(package = %name, "releasing package");
        let node = nodes[&name].clone();
        let deps: Vec<PlanNode> = node.dependencies.iter().map(|d| nodes[d].clone()).collect();
        let config = config.clone();
        let semaphore = semaphore.clone();

        tasks.spawn(async move {
          let _permit = semaphore.acquire_owned().await.expect("scheduler semaphore closed");

          config.reporter.package_started(&node);
          let started = Instant::now();
          let result = execute::execute_node(&node, &deps, &config).await;
          let elapsed = started.elapsed();

          match &result {
            Ok(outcome) => config.reporter.package_finished(&node, outcome, elapsed),
            Err(e) => config.reporter.package_finished(
              &node,
              &PackageOutcome::Failed { message: e.to_string() },
              elapsed,
            ),
          }

          (node.full_name(), result)
        });
      }
    }

    let Some(joined) = tasks.join_next().await else {
      break;
    };

    match joined {
      Ok((name, Ok(outcome))) => {
        match outcome {
          PackageOutcome::Built => summary.built.push(name.clone()),
          PackageOutcome::CachedLocal => summary.cached_local.push(name.clone()),
          PackageOutcome::CachedRemote => summary.cached_remote.push(name.clone()),
          PackageOutcome::Failed { .. } | PackageOutcome::Skipped { .. } => {}
        }
        completed.insert(name.clone());

        for dependent in dependents.get(&name).cloned().unwrap_or_default() {
          if let Some(degree) = in_degree.get_mut(&dependent) {
            *degree -= 1;
            if *degree == 0 && !failed_or_skipped.contains(&dependent) {
              ready.insert(dependent);
            }
          }
        }
      }
      Ok((name, Err(e))) => {
        error!(package = %name, error = %e, "package failed");
        summary.failed.push((name.clone(), e.to_string()));
        failed_or_skipped.insert(name.clone());
        halted = true;
        skip_dependents(&name, &dependents, &nodes, &mut failed_or_skipped, &mut summary, config);
      }
      Err(join_error) => {
        error!(error = %join_error, "build task panicked");
        halted = true;
      }
    }
  }

  for node in &plan.nodes {
    let name = node.full_name();
    if !completed.contains(&name) && !failed_or_skipped.contains(&name) {
      summary.pending.push(name);
    }
  }

  summary
}

/// Mark every transitive dependent of `failed` as skipped, recording the
/// immediate dependency that caused the skip.
fn skip_dependents(
  failed: &str,
  dependents: &HashMap<String, Vec<String>>,
  nodes: &HashMap<String, PlanNode>,
  failed_or_skipped: &mut HashSet<String>,
  summary: &mut BuildSummary,
  config: &BuildConfig,
) {
  let mut queue: Vec<(String, String)> = dependents
    .get(failed)
    .cloned()
    .unwrap_or_default()
    .into_iter()
    .map(|d| (d, failed.to_string()))
    .collect();

  while let Some((name, cause)) = queue.pop() {
    if !failed_or_skipped.insert(name.clone()) {
      continue;
    }

    summary.skipped.insert(name.clone(), cause.clone());
    if let Some(node) = nodes.get(&name) {
      config.reporter.package_finished(
        node,
        &PackageOutcome::Skipped {
          failed_dependency: cause,
        },
        Duration::ZERO,
      );
    }

    for next in dependents.get(&name).cloned().unwrap_or_default() {
      queue.push((next, name.clone()));
    }
  }
}
