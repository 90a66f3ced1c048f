//! The package dependency graph.
//!
//! Edges run from dependency to dependent. The graph provides cycle
//! detection (naming the offending cycle), transitive dependency closures,
//! and a deterministic topological ordering: among packages whose
//! dependencies are all satisfied, ties are broken by full name so that plan
//! output is reproducible for identical workspace state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::workspace::Workspace;

/// Structural errors in the dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
  /// The dependency relation contains a cycle. The path lists the members in
  /// order, with the first package repeated at the end.
  #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
  Cycle { cycle: Vec<String> },

  /// A package references a dependency that does not exist in the workspace.
  #[error("package {package} depends on unknown package {dependency}")]
  UnresolvedDependency { package: String, dependency: String },

  /// The requested build target does not exist.
  #[error("package not found: {target}")]
  TargetNotFound { target: String },
}

/// Dependency graph over all packages of a workspace.
pub struct PackageGraph {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl PackageGraph {
  /// Build the graph for every package in the workspace.
  ///
  /// # Errors
  ///
  /// Returns `UnresolvedDependency` for a dangling reference and `Cycle`
  /// when the relation is not acyclic.
  pub fn from_workspace(workspace: &Workspace) -> Result<Self, GraphError> {
    let dependencies = workspace
      .packages
      .iter()
      .map(|(name, pkg)| (name.clone(), pkg.dependencies.clone()))
      .collect();
    Self::from_dependencies(&dependencies)
  }

  /// Build the graph from an explicit name-to-dependencies mapping.
  pub fn from_dependencies(dependencies: &BTreeMap<String, Vec<String>>) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for name in dependencies.keys() {
      let idx = graph.add_node(name.clone());
      nodes.insert(name.clone(), idx);
    }

    for (name, deps) in dependencies {
      let dependent_idx = nodes[name];
      for dep in deps {
        let dep_idx = *nodes.get(dep).ok_or_else(|| GraphError::UnresolvedDependency {
          package: name.clone(),
          dependency: dep.clone(),
        })?;
        graph.add_edge(dep_idx, dependent_idx, ());
      }
    }

    let pg = PackageGraph { graph, nodes };
    if let Some(cycle) = pg.find_cycle() {
      return Err(GraphError::Cycle { cycle });
    }
    Ok(pg)
  }

  /// Direct dependencies of a package, sorted by name.
  pub fn dependencies(&self, name: &str) -> Vec<String> {
    self.neighbors(name, Direction::Incoming)
  }

  /// Direct dependents of a package, sorted by name.
  pub fn dependents(&self, name: &str) -> Vec<String> {
    self.neighbors(name, Direction::Outgoing)
  }

  fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };
    let mut out: Vec<String> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    out.sort();
    out
  }

  /// The set of transitive dependencies of `root`, including `root` itself.
  pub fn transitive_closure(&self, root: &str) -> Result<BTreeSet<String>, GraphError> {
    let root_idx = *self.nodes.get(root).ok_or_else(|| GraphError::TargetNotFound {
      target: root.to_string(),
    })?;

    let mut closure = BTreeSet::new();
    let mut stack = vec![root_idx];
    while let Some(idx) = stack.pop() {
      if closure.insert(self.graph[idx].clone()) {
        stack.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
      }
    }
    Ok(closure)
  }

  /// Topologically order `subset` such that every package appears after all
  /// of its dependencies. Among simultaneously ready packages, the
  /// lexicographically smallest full name comes first.
  pub fn topological_order(&self, subset: &BTreeSet<String>) -> Result<Vec<String>, GraphError> {
    let mut in_degree: BTreeMap<&String, usize> = BTreeMap::new();
    for name in subset {
      let deps_within = self.dependencies(name).into_iter().filter(|d| subset.contains(d)).count();
      in_degree.insert(name, deps_within);
    }

    let mut ready: BTreeSet<&String> = in_degree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(name, _)| *name)
      .collect();

    let mut order = Vec::with_capacity(subset.len());
    while let Some(name) = ready.pop_first() {
      order.push(name.clone());
      for dependent in self.dependents(name) {
        if let Some(degree) = in_degree.get_mut(&dependent) {
          *degree -= 1;
          if *degree == 0 {
            if let Some(key) = subset.get(&dependent) {
              ready.insert(key);
            }
          }
        }
      }
    }

    if order.len() != subset.len() {
      let cycle = self.find_cycle().unwrap_or_default();
      return Err(GraphError::Cycle { cycle });
    }
    Ok(order)
  }

  /// Find a cycle in the graph, if any, returned as a path with the first
  /// member repeated at the end.
  fn find_cycle(&self) -> Option<Vec<String>> {
    let mut states: HashMap<NodeIndex, SearchState> = HashMap::new();

    // Iterate in insertion order for deterministic cycle reporting.
    let mut roots: Vec<(&String, NodeIndex)> = self.nodes.iter().map(|(n, i)| (n, *i)).collect();
    roots.sort();

    for (_, root) in roots {
      if states.contains_key(&root) {
        continue;
      }
      let mut path = Vec::new();
      if let Some(cycle) = self.visit(root, &mut states, &mut path) {
        return Some(cycle);
      }
    }
    None
  }

  fn visit(
    &self,
    idx: NodeIndex,
    states: &mut HashMap<NodeIndex, SearchState>,
    path: &mut Vec<NodeIndex>,
  ) -> Option<Vec<String>> {
    states.insert(idx, SearchState::Visiting);
    path.push(idx);

    for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
      match states.get(&next) {
        Some(SearchState::Visiting) => {
          let start = path.iter().position(|&n| n == next).unwrap_or(0);
          let mut cycle: Vec<String> = path[start..].iter().map(|&n| self.graph[n].clone()).collect();
          cycle.push(self.graph[next].clone());
          return Some(cycle);
        }
        Some(SearchState::Done) => {}
        None => {
          if let Some(cycle) = self.visit(next, states, path) {
            return Some(cycle);
          }
        }
      }
    }

    path.pop();
    states.insert(idx, SearchState::Done);
    None
  }
}

#[derive(Clone, Copy, PartialEq)]
enum SearchState {
  Visiting,
  Done,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn graph(entries: &[(&str, &[&str])]) -> Result<PackageGraph, GraphError> {
    let deps: BTreeMap<String, Vec<String>> = entries
      .iter()
      .map(|(name, deps)| (name.to_string(), deps.iter().map(|d| d.to_string()).collect()))
      .collect();
    PackageGraph::from_dependencies(&deps)
  }

  fn all(pg: &PackageGraph) -> BTreeSet<String> {
    pg.nodes.keys().cloned().collect()
  }

  #[test]
  fn unresolved_dependency_is_an_error() {
    let result = graph(&[("a/x", &["a/ghost"])]);
    assert!(matches!(result, Err(GraphError::UnresolvedDependency { .. })));
  }

  #[test]
  fn two_cycle_is_detected_and_named() {
    let result = graph(&[("c/a", &["c/b"]), ("c/b", &["c/a"])]);
    match result {
      Err(GraphError::Cycle { cycle }) => {
        assert_eq!(cycle.len(), 3);
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"c/a".to_string()));
        assert!(cycle.contains(&"c/b".to_string()));
      }
      other => panic!("expected cycle error, got {:?}", other.err()),
    }
  }

  #[test]
  fn self_cycle_is_detected() {
    let result = graph(&[("c/a", &["c/a"])]);
    assert!(matches!(result, Err(GraphError::Cycle { .. })));
  }

  #[test]
  fn closure_includes_root_and_transitive_deps() {
    let pg = graph(&[
      ("c/a", &[]),
      ("c/b", &["c/a"]),
      ("c/c", &["c/b"]),
      ("c/other", &[]),
    ])
    .unwrap();

    let closure = pg.transitive_closure("c/c").unwrap();
    let names: Vec<_> = closure.iter().map(String::as_str).collect();
    assert_eq!(names, vec!["c/a", "c/b", "c/c"]);
  }

  #[test]
  fn closure_of_unknown_target_fails() {
    let pg = graph(&[("c/a", &[])]).unwrap();
    assert!(matches!(
      pg.transitive_closure("c/ghost"),
      Err(GraphError::TargetNotFound { .. })
    ));
  }

  #[test]
  fn topological_order_respects_dependencies() {
    let pg = graph(&[
      ("c/a", &[]),
      ("c/b", &["c/a"]),
      ("c/c", &["c/a"]),
      ("c/d", &["c/b", "c/c"]),
    ])
    .unwrap();

    let order = pg.topological_order(&all(&pg)).unwrap();
    let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
    assert!(pos("c/a") < pos("c/b"));
    assert!(pos("c/a") < pos("c/c"));
    assert!(pos("c/b") < pos("c/d"));
    assert!(pos("c/c") < pos("c/d"));
  }

  #[test]
  fn topological_order_breaks_ties_by_name() {
    let pg = graph(&[("c/z", &[]), ("c/a", &[]), ("c/m", &[])]).unwrap();
    let order = pg.topological_order(&all(&pg)).unwrap();
    assert_eq!(order, vec!["c/a", "c/m", "c/z"]);
  }

  #[test]
  fn order_restricted_to_subset_ignores_outside_edges() {
    let pg = graph(&[("c/a", &[]), ("c/b", &["c/a"])]).unwrap();

    let subset: BTreeSet<String> = ["c/b".to_string()].into_iter().collect();
    let order = pg.topological_order(&subset).unwrap();
    assert_eq!(order, vec!["c/b"]);
  }

  #[test]
  fn dependents_are_inverse_of_dependencies() {
    let pg = graph(&[("c/a", &[]), ("c/b", &["c/a"])]).unwrap();
    assert_eq!(pg.dependencies("c/b"), vec!["c/a"]);
    assert_eq!(pg.dependents("c/a"), vec!["c/b"]);
    assert!(pg.dependents("c/b").is_empty());
  }
}
