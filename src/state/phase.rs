//! Pipeline phase sequence and its exit gates.
//!
//! | Phase        | Leaving it requires                                    |
//! |--------------|--------------------------------------------------------|
//! | `ingestion`  | `inputs/spec.md` exists                                |
//! | `logical`    | a valid capability map is registered                   |
//! | `physical`   | a valid physical map is registered                     |
//! | `definition` | at least one task is loaded                            |
//! | `validation` | task validation verdict is READY or READY_WITH_NOTES   |
//! | `sequencing` | the task graph is fully resolved and acyclic           |
//! | `ready`      | graph still valid and verdict still allows progress   |
//! | `executing`  | every task is complete or skipped                      |
//! | `complete`   | terminal                                               |

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::store::StateStore;
use super::types::{ArtifactKind, DecompositionState, EventKind, TaskStatus};
use crate::dag::{TaskNode, validate_dag};
use crate::errors::{Result, TaskforgeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ingestion,
    Logical,
    Physical,
    Definition,
    Validation,
    Sequencing,
    Ready,
    Executing,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::Ingestion,
        Phase::Logical,
        Phase::Physical,
        Phase::Definition,
        Phase::Validation,
        Phase::Sequencing,
        Phase::Ready,
        Phase::Executing,
        Phase::Complete,
    ];

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|p| p == self).unwrap_or(0)
    }

    pub fn next(&self) -> Option<Phase> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Ingestion => "ingestion",
            Phase::Logical => "logical",
            Phase::Physical => "physical",
            Phase::Definition => "definition",
            Phase::Validation => "validation",
            Phase::Sequencing => "sequencing",
            Phase::Ready => "ready",
            Phase::Executing => "executing",
            Phase::Complete => "complete",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .find(|p| p.to_string() == s.to_lowercase())
            .copied()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid phase '{}'. Valid values: ingestion, logical, physical, definition, validation, sequencing, ready, executing, complete",
                    s
                )
            })
    }
}

/// Whether the current phase may be left, and what is in the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvanceCheck {
    pub current: Phase,
    pub next: Option<Phase>,
    pub blockers: Vec<String>,
}

impl AdvanceCheck {
    pub fn can_advance(&self) -> bool {
        self.next.is_some() && self.blockers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
}

/// Reasons the current phase cannot be left. Empty means the gate is open.
pub fn exit_blockers(state: &DecompositionState, planning_dir: &Path) -> Vec<String> {
    let mut blockers = Vec::new();
    let verdict_gate = |blockers: &mut Vec<String>| match &state.artifacts.task_validation_verdict {
        Some(v) if v.verdict.allows_progress() => {}
        Some(v) => blockers.push(format!("task validation verdict is {}", v.verdict)),
        None => blockers.push("task validation verdict not recorded".to_string()),
    };
    let dag_gate = |blockers: &mut Vec<String>| {
        let nodes: Vec<TaskNode> = state.tasks.values().map(TaskNode::from).collect();
        if let Err(err) = validate_dag(&nodes) {
            blockers.extend(err.violations().iter().map(|v| v.to_string()));
        }
    };

    match state.phase.current {
        Phase::Ingestion => {
            if !planning_dir.join("inputs").join("spec.md").is_file() {
                blockers.push("inputs/spec.md not found".to_string());
            }
        }
        Phase::Logical => artifact_gate(state, ArtifactKind::CapabilityMap, &mut blockers),
        Phase::Physical => artifact_gate(state, ArtifactKind::PhysicalMap, &mut blockers),
        Phase::Definition => {
            if state.tasks.is_empty() {
                blockers.push("no tasks loaded".to_string());
            }
        }
        Phase::Validation => verdict_gate(&mut blockers),
        Phase::Sequencing => dag_gate(&mut blockers),
        Phase::Ready => {
            dag_gate(&mut blockers);
            verdict_gate(&mut blockers);
        }
        Phase::Executing => {
            let unfinished: Vec<&str> = state
                .tasks
                .values()
                .filter(|t| !t.status.satisfies_dependents())
                .map(|t| t.id.as_str())
                .collect();
            if !unfinished.is_empty() {
                blockers.push(format!(
                    "{} task(s) not complete or skipped: {}",
                    unfinished.len(),
                    unfinished.join(", ")
                ));
            }
        }
        Phase::Complete => blockers.push("phase complete is terminal".to_string()),
    }
    blockers
}

fn artifact_gate(state: &DecompositionState, kind: ArtifactKind, blockers: &mut Vec<String>) {
    match state.artifacts.get(kind) {
        Some(a) if a.valid => {}
        Some(a) => blockers.push(format!(
            "{} is invalid: {}",
            kind,
            a.error.as_deref().unwrap_or("unknown error")
        )),
        None => blockers.push(format!("{} not registered", kind)),
    }
}

impl StateStore {
    pub fn check_advance(&self) -> Result<AdvanceCheck> {
        let state = self.load()?;
        Ok(AdvanceCheck {
            current: state.phase.current,
            next: state.phase.current.next(),
            blockers: exit_blockers(&state, self.planning_dir()),
        })
    }

    /// Move to the next phase if the current phase's exit gate is open.
    pub fn advance(&self) -> Result<PhaseTransition> {
        let planning_dir = self.planning_dir().to_path_buf();
        let transition = self.update(|state| {
            let from = state.phase.current;
            let Some(to) = from.next() else {
                return Err(TaskforgeError::validation(
                    format!("cannot advance past terminal phase {}", from),
                    vec![],
                ));
            };
            let blockers = exit_blockers(state, &planning_dir);
            if !blockers.is_empty() {
                return Err(TaskforgeError::validation(
                    format!("cannot leave phase {}", from),
                    blockers,
                ));
            }
            if !state.phase.completed.contains(&from) {
                state.phase.completed.push(from);
            }
            state.phase.current = to;
            state.record_event(
                EventKind::PhaseAdvanced,
                None,
                Some(json!({ "from": from, "to": to })),
            );
            Ok(PhaseTransition { from, to })
        })?;
        info!(from = %transition.from, to = %transition.to, "phase advanced");
        Ok(transition)
    }

    /// Return to `definition` to revise the plan.
    ///
    /// This is a recorded action separate from `advance`. It is refused
    /// before `definition` is reached, once the pipeline is complete, and
    /// while any task is running. The task validation verdict is cleared
    /// because the revised plan has to be reviewed again.
    pub fn replan(&self, reason: &str) -> Result<PhaseTransition> {
        let transition = self.update(|state| {
            let from = state.phase.current;
            if from <= Phase::Definition || from.is_terminal() {
                return Err(TaskforgeError::validation(
                    format!("cannot replan from phase {}", from),
                    vec![],
                ));
            }
            let running: Vec<String> = state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .map(|t| t.id.clone())
                .collect();
            if !running.is_empty() {
                return Err(TaskforgeError::validation(
                    "cannot replan while tasks are running",
                    running,
                ));
            }
            state.phase.current = Phase::Definition;
            state.phase.completed.retain(|p| *p < Phase::Definition);
            state.artifacts.task_validation_verdict = None;
            state.record_event(
                EventKind::Replanned,
                None,
                Some(json!({ "from": from, "reason": reason })),
            );
            Ok(PhaseTransition {
                from,
                to: Phase::Definition,
            })
        })?;
        info!(from = %transition.from, reason, "replanning");
        Ok(transition)
    }
}
