//! Dependency edges and the in-memory graph used to validate plans.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges are kept in sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::ids::TaskId;

/// Edge kind. Only `blocks` exists: the dependent cannot become ready until
/// the referenced task is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Blocks,
}

impl DependencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyKind::Blocks => "blocks",
        }
    }
}

/// Directed edge `(task, depends_on, kind)`. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_id: TaskId,
    pub depends_on: TaskId,
    pub kind: DependencyKind,
    pub created_at: DateTime<Utc>,
}

/// Dependency graph over task ids.
///
/// `BTreeMap`/`BTreeSet` keep iteration deterministic, so topological order
/// is stable for equal inputs.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<TaskId>,
    edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
    reverse_edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, task: TaskId) {
        self.nodes.insert(task);
    }

    /// `task` depends on `depends_on` (B waits for A is `add_dependency(B, A)`).
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.nodes.insert(task);
        self.nodes.insert(depends_on);
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges.entry(depends_on).or_default().insert(task);
    }

    /// Tasks waiting for `task`.
    pub fn dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Kahn's algorithm: prerequisites first.
    ///
    /// Returns `Err` with the tasks left on a cycle when the graph is not a DAG.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, Vec<TaskId>> {
        let mut in_degree: BTreeMap<TaskId, usize> = self
            .nodes
            .iter()
            .map(|n| (*n, self.edges.get(n).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: VecDeque<TaskId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_front() {
            order.push(node);
            for waiting in self.dependents(node) {
                if let Some(d) = in_degree.get_mut(&waiting) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(waiting);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let placed: BTreeSet<TaskId> = order.into_iter().collect();
            Err(self
                .nodes
                .iter()
                .filter(|n| !placed.contains(n))
                .copied()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<TaskId> {
        (0..n).map(|_| TaskId::generate()).collect()
    }

    #[test]
    fn add_dependency_creates_both_edges() {
        let t = ids(2);
        let mut graph = DependencyGraph::new();
        graph.add_dependency(t[1], t[0]);

        assert_eq!(graph.dependents(t[0]), vec![t[1]]);
        assert!(graph.dependents(t[1]).is_empty());
    }

    #[test]
    fn topological_order_puts_prerequisites_first() {
        let t = ids(4);
        let mut graph = DependencyGraph::new();
        // diamond: 0 -> {1, 2} -> 3
        graph.add_dependency(t[1], t[0]);
        graph.add_dependency(t[2], t[0]);
        graph.add_dependency(t[3], t[1]);
        graph.add_dependency(t[3], t[2]);

        let order = graph.topological_order().unwrap();
        let pos = |id: TaskId| order.iter().position(|x| *x == id).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos(t[0]) < pos(t[1]));
        assert!(pos(t[0]) < pos(t[2]));
        assert!(pos(t[1]) < pos(t[3]));
        assert!(pos(t[2]) < pos(t[3]));
    }

    #[test]
    fn isolated_nodes_are_ordered_too() {
        let t = ids(2);
        let mut graph = DependencyGraph::new();
        graph.add_node(t[0]);
        graph.add_node(t[1]);
        assert_eq!(graph.topological_order().unwrap().len(), 2);
    }

    #[test]
    fn detects_simple_and_self_cycles() {
        let t = ids(3);
        let mut graph = DependencyGraph::new();
        graph.add_dependency(t[0], t[1]);
        graph.add_dependency(t[1], t[0]);
        graph.add_dependency(t[2], t[0]);
        let cycle = graph.topological_order().unwrap_err();
        assert!(cycle.contains(&t[0]) && cycle.contains(&t[1]));

        let mut selfish = DependencyGraph::new();
        selfish.add_dependency(t[0], t[0]);
        assert_eq!(selfish.topological_order(), Err(vec![t[0]]));
    }
}
