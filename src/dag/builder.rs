//! DAG builder for constructing task dependency graphs.
//!
//! The builder takes task nodes with their `depends_on`/`blocks` lists and
//! constructs an index-based graph. Node indices follow lexicographic task
//! ID order, so any traversal that prefers lower indices is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use super::{DagError, DagViolation, EdgeKind};
use crate::planning::TaskDefinition;
use crate::state::TaskRecord;

/// Index into the sorted node list.
pub type NodeIndex = usize;

/// The graph-relevant projection of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub id: String,
    pub depends_on: Vec<String>,
    pub blocks: Vec<String>,
    pub steel_thread: bool,
}

impl TaskNode {
    pub fn new(id: &str, depends_on: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            blocks: Vec::new(),
            steel_thread: false,
        }
    }

    pub fn steel(mut self) -> Self {
        self.steel_thread = true;
        self
    }
}

impl From<&TaskRecord> for TaskNode {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id.clone(),
            depends_on: record.depends_on.clone(),
            blocks: record.blocks.clone(),
            steel_thread: record.steel_thread,
        }
    }
}

impl From<&TaskDefinition> for TaskNode {
    fn from(def: &TaskDefinition) -> Self {
        Self {
            id: def.id.clone(),
            depends_on: def.depends_on.clone(),
            blocks: def.blocks.clone(),
            steel_thread: def.is_steel_thread(),
        }
    }
}

/// A directed graph of tasks. Edges point from a dependency to its dependent.
///
/// References to unknown task IDs are not turned into edges; they are kept in
/// `unresolved` so validation can report them next to any cycle.
#[derive(Debug)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index_map: BTreeMap<String, NodeIndex>,
    /// index -> tasks that depend on it
    forward_edges: Vec<Vec<NodeIndex>>,
    /// index -> tasks it depends on
    reverse_edges: Vec<Vec<NodeIndex>>,
    unresolved: Vec<DagViolation>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&TaskNode> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn get_index(&self, id: &str) -> Option<NodeIndex> {
        self.index_map.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_map.contains_key(id)
    }

    /// Tasks that depend on the given task (forward edges).
    pub fn dependents(&self, index: NodeIndex) -> &[NodeIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Tasks the given task depends on (reverse edges).
    pub fn dependencies(&self, index: NodeIndex) -> &[NodeIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Tasks with no dependencies (entry points).
    pub fn roots(&self) -> Vec<NodeIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Missing-reference violations found while building.
    pub fn unresolved(&self) -> &[DagViolation] {
        &self.unresolved
    }

    /// Topological order via Kahn's algorithm, ties broken by task ID.
    ///
    /// On failure every node left with a positive in-degree is reported as a
    /// single cycle set: those nodes sit on a cycle or downstream of one.
    pub fn topological_order(&self) -> Result<Vec<String>, DagError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut ready: BTreeSet<NodeIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(node) = ready.pop_first() {
            order.push(self.nodes[node].id.clone());
            for &dependent in self.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.len() {
            let tasks: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.nodes[i].id.clone())
                .collect();
            return Err(DagError::new(vec![DagViolation::Cycle { tasks }]));
        }

        Ok(order)
    }

    /// Subgraph restricted to nodes matching `keep`, with only the edges
    /// between two kept nodes.
    pub fn induced(&self, keep: impl Fn(&TaskNode) -> bool) -> TaskGraph {
        let kept: Vec<TaskNode> = self.nodes.iter().filter(|n| keep(n)).cloned().collect();
        let ids: BTreeSet<&str> = kept.iter().map(|n| n.id.as_str()).collect();
        let nodes = kept
            .iter()
            .map(|n| TaskNode {
                id: n.id.clone(),
                depends_on: n
                    .depends_on
                    .iter()
                    .filter(|d| ids.contains(d.as_str()))
                    .cloned()
                    .collect(),
                blocks: n
                    .blocks
                    .iter()
                    .filter(|b| ids.contains(b.as_str()))
                    .cloned()
                    .collect(),
                steel_thread: n.steel_thread,
            })
            .collect();
        // Every reference was filtered to known nodes and IDs were already unique.
        DagBuilder::new(nodes).assemble()
    }

    /// Weakly connected components, each sorted, ordered by their first ID.
    pub fn weak_components(&self) -> Vec<Vec<String>> {
        let mut parent: Vec<NodeIndex> = (0..self.len()).collect();

        fn find(parent: &mut [NodeIndex], mut x: NodeIndex) -> NodeIndex {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for (from, dependents) in self.forward_edges.iter().enumerate() {
            for &to in dependents {
                let a = find(&mut parent, from);
                let b = find(&mut parent, to);
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }

        let mut groups: BTreeMap<NodeIndex, Vec<String>> = BTreeMap::new();
        for i in 0..self.len() {
            let root = find(&mut parent, i);
            groups.entry(root).or_default().push(self.nodes[i].id.clone());
        }
        groups.into_values().collect()
    }
}

/// Builder for constructing task graphs.
pub struct DagBuilder {
    nodes: Vec<TaskNode>,
}

impl DagBuilder {
    pub fn new(nodes: Vec<TaskNode>) -> Self {
        Self { nodes }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        Self::new(records.into_iter().map(TaskNode::from).collect())
    }

    pub fn from_definitions<'a>(defs: impl IntoIterator<Item = &'a TaskDefinition>) -> Self {
        Self::new(defs.into_iter().map(TaskNode::from).collect())
    }

    /// Build the task graph.
    ///
    /// Fails only on duplicate task IDs, since a duplicate makes the graph
    /// ambiguous. Unknown references are recorded on the graph instead.
    pub fn build(self) -> Result<TaskGraph, DagError> {
        let mut seen = BTreeSet::new();
        let duplicates: Vec<DagViolation> = self
            .nodes
            .iter()
            .filter(|n| !seen.insert(n.id.as_str()))
            .map(|n| DagViolation::DuplicateTask { id: n.id.clone() })
            .collect();
        if !duplicates.is_empty() {
            return Err(DagError::new(duplicates));
        }
        Ok(self.assemble())
    }

    fn assemble(mut self) -> TaskGraph {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let index_map: BTreeMap<String, NodeIndex> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut forward_edges: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.nodes.len()];
        let mut reverse_edges: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.nodes.len()];
        let mut unresolved = Vec::new();

        for (to_idx, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                match index_map.get(dep) {
                    Some(&from_idx) => {
                        if !reverse_edges[to_idx].contains(&from_idx) {
                            forward_edges[from_idx].push(to_idx);
                            reverse_edges[to_idx].push(from_idx);
                        }
                    }
                    None => unresolved.push(DagViolation::MissingReference {
                        task: node.id.clone(),
                        reference: dep.clone(),
                        edge: EdgeKind::DependsOn,
                    }),
                }
            }
            for blocked in &node.blocks {
                if !index_map.contains_key(blocked) {
                    unresolved.push(DagViolation::MissingReference {
                        task: node.id.clone(),
                        reference: blocked.clone(),
                        edge: EdgeKind::Blocks,
                    });
                }
            }
        }

        for edges in &mut forward_edges {
            edges.sort_unstable();
        }

        TaskGraph {
            nodes: self.nodes,
            index_map,
            forward_edges,
            reverse_edges,
            unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, deps: &[&str]) -> TaskNode {
        TaskNode::new(id, deps)
    }

    #[test]
    fn test_build_simple_graph() {
        let graph = DagBuilder::new(vec![
            node("T4", &["T2", "T3"]),
            node("T1", &[]),
            node("T2", &["T1"]),
            node("T3", &["T1"]),
        ])
        .build()
        .unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.roots(), vec![0]);
        assert_eq!(graph.dependents(0), &[1, 2]);
        assert_eq!(graph.dependencies(3).len(), 2);
    }

    #[test]
    fn test_topological_order_breaks_ties_lexicographically() {
        let graph = DagBuilder::new(vec![
            node("c", &[]),
            node("a", &[]),
            node("b", &["c"]),
            node("d", &["a"]),
        ])
        .build()
        .unwrap();

        assert_eq!(graph.topological_order().unwrap(), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_order_respects_every_edge() {
        let nodes = vec![
            node("T05", &["T03", "T04"]),
            node("T01", &[]),
            node("T02", &["T01"]),
            node("T03", &["T01"]),
            node("T04", &["T02"]),
        ];
        let graph = DagBuilder::new(nodes.clone()).build().unwrap();
        let order = graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        for n in &nodes {
            for dep in &n.depends_on {
                assert!(pos(dep) < pos(&n.id), "{dep} must precede {}", n.id);
            }
        }
    }

    #[test]
    fn test_cycle_detection_names_cycle_set() {
        let graph = DagBuilder::new(vec![node("T1", &["T2"]), node("T2", &["T1"])])
            .build()
            .unwrap();
        let err = graph.topological_order().unwrap_err();
        assert_eq!(
            err.violations(),
            &[DagViolation::Cycle {
                tasks: vec!["T1".to_string(), "T2".to_string()]
            }]
        );
    }

    #[test]
    fn test_missing_dependency_is_recorded() {
        let mut t1 = node("T1", &["ghost"]);
        t1.blocks = vec!["phantom".to_string()];
        let graph = DagBuilder::new(vec![t1]).build().unwrap();
        assert_eq!(graph.unresolved().len(), 2);
        assert_eq!(graph.topological_order().unwrap(), vec!["T1"]);
    }

    #[test]
    fn test_duplicate_task_id() {
        let err = DagBuilder::new(vec![node("T1", &[]), node("T1", &[])])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DagBuilder::new(vec![]).build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_order().unwrap().is_empty());
    }

    #[test]
    fn test_induced_subgraph_drops_outside_edges() {
        let graph = DagBuilder::new(vec![
            node("A", &[]).steel(),
            node("B", &["A"]),
            node("C", &["B", "A"]).steel(),
        ])
        .build()
        .unwrap();
        let steel = graph.induced(|n| n.steel_thread);
        assert_eq!(steel.len(), 2);
        assert!(steel.unresolved().is_empty());
        assert_eq!(steel.topological_order().unwrap(), vec!["A", "C"]);
    }

    #[test]
    fn test_weak_components() {
        let graph = DagBuilder::new(vec![
            node("A", &[]),
            node("B", &["A"]),
            node("X", &[]),
            node("Y", &["X"]),
        ])
        .build()
        .unwrap();
        assert_eq!(
            graph.weak_components(),
            vec![vec!["A".to_string(), "B".to_string()], vec!["X".to_string(), "Y".to_string()]]
        );
    }
}
