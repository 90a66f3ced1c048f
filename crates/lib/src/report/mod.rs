//! Build lifecycle reporting.
//!
//! The executor notifies a reporter of build start/finish and of every
//! package's outcome with timing. Reporters are pure sinks: console output,
//! CI annotations, HTML reports, telemetry. The executor is agnostic to how
//! many are attached — [`CompositeReporter`] fans events out — and a
//! reporter can never abort the build (the interface is infallible by
//! construction).

use std::sync::Arc;
use std::time::Duration;

use crate::build::BuildSummary;
use crate::plan::{BuildPlan, PlanNode};

/// How a single package concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
  /// The build action ran and produced a fresh artifact.
  Built,
  /// A valid artifact was already in the local cache.
  CachedLocal,
  /// The artifact was downloaded from the remote cache.
  CachedRemote,
  /// The build or test action failed; the message carries the captured
  /// output.
  Failed { message: String },
  /// Never executed because a transitive dependency failed.
  Skipped { failed_dependency: String },
}

impl std::fmt::Display for PackageOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PackageOutcome::Built => write!(f, "built"),
      PackageOutcome::CachedLocal => write!(f, "cached-local"),
      PackageOutcome::CachedRemote => write!(f, "cached-remote"),
      PackageOutcome::Failed { .. } => write!(f, "failed"),
      PackageOutcome::Skipped { .. } => write!(f, "skipped"),
    }
  }
}

/// Sink for build lifecycle events. All methods default to no-ops so a
/// reporter only implements what it cares about.
pub trait Reporter: Send + Sync {
  /// The plan was computed and execution is about to start.
  fn build_started(&self, _plan: &BuildPlan) {}

  /// A package's worker started (after acquiring a concurrency slot).
  fn package_started(&self, _node: &PlanNode) {}

  /// A package concluded, successfully or not.
  fn package_finished(&self, _node: &PlanNode, _outcome: &PackageOutcome, _elapsed: Duration) {}

  /// The whole build concluded.
  fn build_finished(&self, _target: &str, _summary: &BuildSummary) {}
}

/// Fans every event out to a list of reporters.
#[derive(Default)]
pub struct CompositeReporter {
  reporters: Vec<Arc<dyn Reporter>>,
}

impl CompositeReporter {
  pub fn new(reporters: Vec<Arc<dyn Reporter>>) -> Self {
    CompositeReporter { reporters }
  }

  pub fn push(&mut self, reporter: Arc<dyn Reporter>) {
    self.reporters.push(reporter);
  }
}

impl Reporter for CompositeReporter {
  fn build_started(&self, plan: &BuildPlan) {
    for r in &self.reporters {
      r.build_started(plan);
    }
  }

  fn package_started(&self, node: &PlanNode) {
    for r in &self.reporters {
      r.package_started(node);
    }
  }

  fn package_finished(&self, node: &PlanNode, outcome: &PackageOutcome, elapsed: Duration) {
    for r in &self.reporters {
      r.package_finished(node, outcome, elapsed);
    }
  }

  fn build_finished(&self, target: &str, summary: &BuildSummary) {
    for r in &self.reporters {
      r.build_finished(target, summary);
    }
  }
}
