//! Whole-graph and steel-thread validation.
//!
//! These are pure functions over task nodes: no I/O, no shared state.

use serde::Serialize;

use super::builder::{DagBuilder, TaskNode};
use super::{DagError, DagViolation};

/// Validate the full graph and return its topological order.
///
/// Missing references and cycles are collected together; an order is only
/// returned when there are no violations at all.
pub fn validate_dag(nodes: &[TaskNode]) -> Result<Vec<String>, DagError> {
    let graph = DagBuilder::new(nodes.to_vec()).build()?;

    let mut violations: Vec<DagViolation> = graph.unresolved().to_vec();
    let order = match graph.topological_order() {
        Ok(order) => Some(order),
        Err(err) => {
            violations.extend(err.into_violations());
            None
        }
    };

    match order {
        Some(order) if violations.is_empty() => Ok(order),
        _ => Err(DagError::new(violations)),
    }
}

/// Topological order without the missing-reference check.
pub fn topological_sort(nodes: &[TaskNode]) -> Result<Vec<String>, DagError> {
    DagBuilder::new(nodes.to_vec()).build()?.topological_order()
}

/// Outcome of steel-thread validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SteelThreadReport {
    /// Steel-thread tasks in execution order. Empty when no task is flagged.
    pub order: Vec<String>,
    /// Weakly connected components of the steel-thread subgraph.
    pub components: Vec<Vec<String>>,
    pub warnings: Vec<String>,
}

impl SteelThreadReport {
    pub fn is_connected(&self) -> bool {
        self.components.len() <= 1
    }
}

/// Order the steel-thread subset of the graph.
///
/// Only edges between two steel-thread tasks are kept. A steel-thread task
/// that depends on a regular task, or a subgraph that falls apart into
/// several components, yields warnings. References to unknown tasks and
/// cycles inside the subgraph are errors.
pub fn validate_steel_thread(nodes: &[TaskNode]) -> Result<SteelThreadReport, DagError> {
    let graph = DagBuilder::new(nodes.to_vec()).build()?;

    let steel_missing: Vec<DagViolation> = graph
        .unresolved()
        .iter()
        .filter(|v| match v {
            DagViolation::MissingReference { task, .. } => graph
                .get_index(task)
                .and_then(|i| graph.node(i))
                .is_some_and(|n| n.steel_thread),
            _ => false,
        })
        .cloned()
        .collect();
    if !steel_missing.is_empty() {
        return Err(DagError::new(steel_missing));
    }

    let steel = graph.induced(|n| n.steel_thread);
    if steel.is_empty() {
        return Ok(SteelThreadReport::default());
    }

    let mut warnings = Vec::new();
    for node in graph.nodes().iter().filter(|n| n.steel_thread) {
        for dep in &node.depends_on {
            let dep_is_steel = graph
                .get_index(dep)
                .and_then(|i| graph.node(i))
                .is_some_and(|d| d.steel_thread);
            if !dep_is_steel {
                warnings.push(format!(
                    "steel-thread task {} depends on non-steel-thread task {}",
                    node.id, dep
                ));
            }
        }
    }

    let order = steel.topological_order()?;
    let components = steel.weak_components();
    if components.len() > 1 {
        warnings.push(format!(
            "steel-thread subgraph is disconnected ({} components)",
            components.len()
        ));
    }

    Ok(SteelThreadReport {
        order,
        components,
        warnings,
    })
}
