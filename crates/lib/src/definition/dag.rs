//! Dependency graph over step keys.
//!
//! Edges run from a dependency to its dependent. The graph provides a
//! deterministic topological order (Kahn's algorithm with the
//! lexicographically smallest ready key taken first), execution waves for
//! concurrent scheduling and reachability queries for incremental rebuilds.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use super::types::GraphError;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
  graph: DiGraph<String, ()>,
  nodes: BTreeMap<String, NodeIndex>,
  order: Vec<String>,
  waves: Vec<Vec<String>>,
}

impl DependencyGraph {
  /// Build the graph from `key -> dependencies`.
  ///
  /// # Errors
  ///
  /// `UnknownDependency` if a dependency is not itself a key, and
  /// `CyclicDependency` naming one offending cycle.
  pub fn build(dependencies: &BTreeMap<String, BTreeSet<String>>) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = BTreeMap::new();

    for key in dependencies.keys() {
      nodes.insert(key.clone(), graph.add_node(key.clone()));
    }

    for (key, deps) in dependencies {
      let dependent = nodes[key];
      for dep in deps {
        let Some(&dependency) = nodes.get(dep) else {
          return Err(GraphError::UnknownDependency {
            node: key.clone(),
            dependency: dep.clone(),
          });
        };
        graph.add_edge(dependency, dependent, ());
      }
    }

    let mut dag = Self {
      graph,
      nodes,
      order: Vec::new(),
      waves: Vec::new(),
    };

    if let Some(cycle) = dag.find_cycle() {
      return Err(GraphError::CyclicDependency { cycle });
    }

    dag.order = dag.kahn_order();
    dag.waves = dag.compute_waves();
    Ok(dag)
  }

  /// Dependencies before dependents; ties broken by key.
  pub fn order(&self) -> &[String] {
    &self.order
  }

  /// Groups of keys whose dependencies all lie in earlier groups.
  pub fn waves(&self) -> &[Vec<String>] {
    &self.waves
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Direct dependencies of `key`, sorted.
  pub fn dependencies(&self, key: &str) -> Vec<String> {
    self.neighbors(key, Direction::Incoming)
  }

  /// Direct dependents of `key`, sorted.
  pub fn dependents(&self, key: &str) -> Vec<String> {
    self.neighbors(key, Direction::Outgoing)
  }

  /// Every key reachable from `roots` along dependency edges, roots included.
  pub fn reachable_from<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<String> = roots
      .into_iter()
      .filter(|k| self.nodes.contains_key(*k))
      .map(str::to_string)
      .collect();

    while let Some(key) = queue.pop_front() {
      if !seen.insert(key.clone()) {
        continue;
      }
      queue.extend(self.dependents(&key));
    }
    seen
  }

  fn neighbors(&self, key: &str, direction: Direction) -> Vec<String> {
    let Some(&idx) = self.nodes.get(key) else {
      return Vec::new();
    };
    let mut out: Vec<String> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    out.sort();
    out.dedup();
    out
  }

  fn kahn_order(&self) -> Vec<String> {
    let mut in_degree: BTreeMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.distinct_incoming(idx)))
      .collect();

    let mut ready: BTreeSet<String> = in_degree
      .iter()
      .filter(|(_, deg)| **deg == 0)
      .map(|(idx, _)| self.graph[*idx].clone())
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());
    while let Some(key) = ready.pop_first() {
      let idx = self.nodes[&key];
      for dependent in self.dependents(&key) {
        let dep_idx = self.nodes[&dependent];
        if let Some(deg) = in_degree.get_mut(&dep_idx) {
          *deg = deg.saturating_sub(1);
          if *deg == 0 {
            ready.insert(dependent);
          }
        }
      }
      in_degree.remove(&idx);
      order.push(key);
    }
    order
  }

  fn compute_waves(&self) -> Vec<Vec<String>> {
    let mut level: BTreeMap<&str, usize> = BTreeMap::new();
    let mut waves: Vec<Vec<String>> = Vec::new();

    for key in &self.order {
      let lvl = self
        .dependencies(key)
        .iter()
        .filter_map(|dep| level.get(dep.as_str()))
        .map(|l| l + 1)
        .max()
        .unwrap_or(0);
      level.insert(key, lvl);
      if waves.len() <= lvl {
        waves.resize_with(lvl + 1, Vec::new);
      }
      waves[lvl].push(key.clone());
    }

    for wave in &mut waves {
      wave.sort();
    }
    waves
  }

  fn distinct_incoming(&self, idx: NodeIndex) -> usize {
    let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Incoming).collect();
    deps.sort();
    deps.dedup();
    deps.len()
  }

  /// Find a cycle, reported as `[a, b, ..., a]` in dependency order and
  /// starting from its smallest key.
  fn find_cycle(&self) -> Option<Vec<String>> {
    let mut candidates: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
      .collect();
    for scc in &mut candidates {
      scc.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
    }
    candidates.sort_by(|a, b| self.graph[a[0]].cmp(&self.graph[b[0]]));

    let scc = candidates.first()?;
    let members: BTreeSet<NodeIndex> = scc.iter().copied().collect();
    let start = scc[0];

    // Walk dependency edges (incoming) inside the component back to `start`.
    let mut path = vec![start];
    let mut visited = BTreeSet::from([start]);
    if !self.cycle_dfs(start, start, &members, &mut path, &mut visited) {
      return None;
    }
    Some(path.into_iter().map(|idx| self.graph[idx].clone()).collect())
  }

  fn cycle_dfs(
    &self,
    current: NodeIndex,
    start: NodeIndex,
    members: &BTreeSet<NodeIndex>,
    path: &mut Vec<NodeIndex>,
    visited: &mut BTreeSet<NodeIndex>,
  ) -> bool {
    let mut next: Vec<NodeIndex> = self
      .graph
      .neighbors_directed(current, Direction::Incoming)
      .filter(|n| members.contains(n))
      .collect();
    next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
    next.dedup();

    for n in next {
      if n == start {
        path.push(start);
        return true;
      }
      if visited.insert(n) {
        path.push(n);
        if self.cycle_dfs(n, start, members, path, visited) {
          return true;
        }
        path.pop();
      }
    }
    false
  }
}
