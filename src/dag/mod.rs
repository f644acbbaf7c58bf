//! Dependency graph validation for tasks.
//!
//! ## Architecture
//!
//! 1. **Builder** - Constructs an index-based graph from task nodes and
//!    records references to unknown tasks
//! 2. **Validate** - Cycle detection, topological ordering and steel-thread
//!    ordering over that graph
//!
//! Everything here is pure: callers pass in nodes taken from the store or
//! from task definition files, and get back an order or a violation set.
//!
//! ## Example
//!
//! ```
//! use taskforge::dag::{TaskNode, validate_dag};
//!
//! let nodes = vec![
//!     TaskNode::new("T1", &[]),
//!     TaskNode::new("T2", &["T1"]),
//!     TaskNode::new("T3", &["T2"]),
//! ];
//! assert_eq!(validate_dag(&nodes).unwrap(), vec!["T1", "T2", "T3"]);
//! ```

mod builder;
mod validate;

use serde::Serialize;

pub use builder::{DagBuilder, NodeIndex, TaskGraph, TaskNode};
pub use validate::{SteelThreadReport, topological_sort, validate_dag, validate_steel_thread};

use crate::errors::TaskforgeError;

/// Which list a dangling reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DependsOn,
    Blocks,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::DependsOn => write!(f, "depends_on"),
            EdgeKind::Blocks => write!(f, "blocks"),
        }
    }
}

/// One structural problem in the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DagViolation {
    DuplicateTask {
        id: String,
    },
    MissingReference {
        task: String,
        reference: String,
        edge: EdgeKind,
    },
    /// Nodes left unsorted by Kahn's algorithm.
    Cycle {
        tasks: Vec<String>,
    },
}

impl std::fmt::Display for DagViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DagViolation::DuplicateTask { id } => write!(f, "Duplicate task id: {}", id),
            DagViolation::MissingReference {
                task,
                reference,
                edge,
            } => write!(f, "Task {} {} unknown task {}", task, edge, reference),
            DagViolation::Cycle { tasks } => {
                write!(f, "Cycle detected. Involved tasks: {}", tasks.join(", "))
            }
        }
    }
}

/// A non-empty set of graph violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagError {
    violations: Vec<DagViolation>,
}

impl DagError {
    pub fn new(violations: Vec<DagViolation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[DagViolation] {
        &self.violations
    }

    pub fn into_violations(self) -> Vec<DagViolation> {
        self.violations
    }

    /// Task IDs named by a cycle violation, if any.
    pub fn cycle_tasks(&self) -> Option<&[String]> {
        self.violations.iter().find_map(|v| match v {
            DagViolation::Cycle { tasks } => Some(tasks.as_slice()),
            _ => None,
        })
    }
}

impl std::fmt::Display for DagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for DagError {}

impl From<DagError> for TaskforgeError {
    fn from(err: DagError) -> Self {
        TaskforgeError::validation(
            "task graph is invalid",
            err.violations.iter().map(|v| v.to_string()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_scenario_orders_and_cycle_scenario_fails() {
        let chain = vec![
            TaskNode::new("T3", &["T2"]),
            TaskNode::new("T2", &["T1"]),
            TaskNode::new("T1", &[]),
        ];
        assert_eq!(validate_dag(&chain).unwrap(), vec!["T1", "T2", "T3"]);

        let cyclic = vec![TaskNode::new("T1", &["T2"]), TaskNode::new("T2", &["T1"])];
        let err = validate_dag(&cyclic).unwrap_err();
        assert_eq!(
            err.cycle_tasks().unwrap(),
            &["T1".to_string(), "T2".to_string()]
        );
    }

    #[test]
    fn dag_error_converts_to_validation_failed() {
        let err: TaskforgeError = DagError::new(vec![DagViolation::Cycle {
            tasks: vec!["A".into(), "B".into()],
        }])
        .into();
        match err {
            TaskforgeError::ValidationFailed { violations, .. } => {
                assert_eq!(violations, vec!["Cycle detected. Involved tasks: A, B".to_string()]);
            }
            other => panic!("Expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn repeated_runs_are_reproducible() {
        let nodes: Vec<TaskNode> = ["e", "b", "d", "a", "c"]
            .iter()
            .map(|id| TaskNode::new(id, &[]))
            .collect();
        let first = validate_dag(&nodes).unwrap();
        for _ in 0..5 {
            assert_eq!(validate_dag(&nodes).unwrap(), first);
        }
        assert_eq!(first, vec!["a", "b", "c", "d", "e"]);
    }
}
