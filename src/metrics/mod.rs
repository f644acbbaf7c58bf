//! Read-only roll-ups over task history.
//!
//! Every function here folds a loaded [`DecompositionState`]; nothing is
//! written back. Rates are fractions in `[0, 1]`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::Result;
use crate::state::{
    CalibrationOutcome, CalibrationScore, DecompositionState, FailureCategory, StateStore,
    TaskStatus, ready_tasks,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    /// Pending and blocked.
    pub pending_tasks: usize,
    pub running_tasks: usize,
    /// (complete + failed + skipped) / total.
    pub completion_rate: f64,
    /// complete / (complete + failed).
    pub success_rate: f64,
    /// Completed tasks that needed a single spawn, over completed tasks.
    pub first_attempt_success_rate: f64,
    pub avg_duration_seconds: f64,
    pub total_duration_seconds: f64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanningMetrics {
    pub total_phases: u32,
    pub current_phase: u32,
    pub tasks_per_phase: BTreeMap<u32, usize>,
    /// Complete or skipped.
    pub completed_per_phase: BTreeMap<u32, usize>,
    pub phase_progress: BTreeMap<u32, f64>,
    pub overall_progress: f64,
    pub remaining_tasks: usize,
    pub ready_tasks: usize,
    pub blocked_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTaskInfo {
    pub task_id: String,
    pub name: String,
    pub category: FailureCategory,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub retryable: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureMetrics {
    pub total_failures: usize,
    pub by_category: BTreeMap<FailureCategory, usize>,
    pub retryable_count: usize,
    pub non_retryable_count: usize,
    pub failed_tasks: Vec<FailedTaskInfo>,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

pub fn performance(state: &DecompositionState) -> PerformanceMetrics {
    let mut m = PerformanceMetrics {
        total_tasks: state.tasks.len(),
        total_tokens: state.execution.total_tokens,
        total_cost_usd: state.execution.total_cost_usd,
        ..Default::default()
    };

    let mut first_attempt = 0;
    let mut timed = 0;
    for task in state.tasks.values() {
        match task.status {
            TaskStatus::Complete => {
                m.completed_tasks += 1;
                if task.attempts == 1 {
                    first_attempt += 1;
                }
                if let Some(d) = task.duration_seconds.filter(|d| *d > 0.0) {
                    m.total_duration_seconds += d;
                    timed += 1;
                }
            }
            TaskStatus::Failed => m.failed_tasks += 1,
            TaskStatus::Skipped => m.skipped_tasks += 1,
            TaskStatus::Pending | TaskStatus::Blocked => m.pending_tasks += 1,
            TaskStatus::Running => m.running_tasks += 1,
        }
    }

    m.completion_rate = ratio(
        m.completed_tasks + m.failed_tasks + m.skipped_tasks,
        m.total_tasks,
    );
    m.success_rate = ratio(m.completed_tasks, m.completed_tasks + m.failed_tasks);
    m.first_attempt_success_rate = ratio(first_attempt, m.completed_tasks);
    if timed > 0 {
        m.avg_duration_seconds = m.total_duration_seconds / timed as f64;
    }
    m
}

pub fn planning(state: &DecompositionState) -> PlanningMetrics {
    let mut m = PlanningMetrics {
        current_phase: state.execution.current_phase,
        ready_tasks: ready_tasks(state).len(),
        ..Default::default()
    };

    for task in state.tasks.values() {
        *m.tasks_per_phase.entry(task.phase).or_default() += 1;
        m.total_phases = m.total_phases.max(task.phase);
        if task.status.satisfies_dependents() {
            *m.completed_per_phase.entry(task.phase).or_default() += 1;
        }
        if task.status == TaskStatus::Blocked {
            m.blocked_tasks += 1;
        }
    }

    m.phase_progress = m
        .tasks_per_phase
        .iter()
        .map(|(phase, total)| {
            let done = m.completed_per_phase.get(phase).copied().unwrap_or(0);
            (*phase, ratio(done, *total))
        })
        .collect();
    let done: usize = m.completed_per_phase.values().sum();
    m.overall_progress = ratio(done, state.tasks.len());
    m.remaining_tasks = state.tasks.len() - done;
    m
}

pub fn failures(state: &DecompositionState) -> FailureMetrics {
    let mut m = FailureMetrics::default();
    for task in state.tasks.values().filter(|t| t.status == TaskStatus::Failed) {
        let (category, message, retryable) = match &task.failure {
            Some(f) => (f.category, f.message.clone(), f.retryable),
            None => (FailureCategory::Unknown, String::new(), false),
        };
        m.total_failures += 1;
        *m.by_category.entry(category).or_default() += 1;
        if retryable {
            m.retryable_count += 1;
        } else {
            m.non_retryable_count += 1;
        }
        m.failed_tasks.push(FailedTaskInfo {
            task_id: task.id.clone(),
            name: task.name.clone(),
            category,
            message,
            retryable,
            attempts: task.attempts,
        });
    }
    m
}

/// Verifier accuracy from the calibration outcomes recorded on tasks.
pub fn calibration_score(state: &DecompositionState) -> CalibrationScore {
    let (mut correct, mut fp, mut fn_) = (0, 0, 0);
    for calibration in state.tasks.values().filter_map(|t| t.calibration.as_ref()) {
        match calibration.outcome {
            CalibrationOutcome::Correct => correct += 1,
            CalibrationOutcome::FalsePositive => fp += 1,
            CalibrationOutcome::FalseNegative => fn_ += 1,
        }
    }
    CalibrationScore::new(correct, fp, fn_)
}

impl StateStore {
    pub fn metrics(&self) -> Result<PerformanceMetrics> {
        Ok(performance(&self.load()?))
    }

    pub fn planning_metrics(&self) -> Result<PlanningMetrics> {
        Ok(planning(&self.load()?))
    }

    pub fn failure_metrics(&self) -> Result<FailureMetrics> {
        Ok(failures(&self.load()?))
    }

    pub fn calibration_score(&self) -> Result<CalibrationScore> {
        Ok(calibration_score(&self.load()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Calibration, TaskFailure, TaskRecord};
    use chrono::Utc;

    fn record(id: &str, phase: u32, status: TaskStatus, attempts: u32) -> TaskRecord {
        let mut t = TaskRecord::new(id, format!("task {}", id), phase);
        t.status = status;
        t.attempts = attempts;
        t
    }

    fn sample() -> DecompositionState {
        let mut state = DecompositionState::new("/srv/app");
        let mut t1 = record("T1", 1, TaskStatus::Complete, 1);
        t1.duration_seconds = Some(30.0);
        let mut t2 = record("T2", 1, TaskStatus::Complete, 3);
        t2.duration_seconds = Some(90.0);
        let mut t3 = record("T3", 2, TaskStatus::Failed, 2);
        t3.failure = Some(TaskFailure {
            category: FailureCategory::Test,
            message: "assertion failed".into(),
            retryable: true,
            subcategory: None,
        });
        let t4 = record("T4", 2, TaskStatus::Failed, 1);
        let t5 = record("T5", 2, TaskStatus::Skipped, 0);
        let mut t6 = record("T6", 3, TaskStatus::Pending, 0);
        t6.depends_on = vec!["T5".into()];
        let mut t7 = record("T7", 3, TaskStatus::Blocked, 0);
        t7.depends_on = vec!["T3".into()];
        for t in [t1, t2, t3, t4, t5, t6, t7] {
            state.tasks.insert(t.id.clone(), t);
        }
        state.execution.total_tokens = 1200;
        state.execution.total_cost_usd = 0.5;
        state
    }

    #[test]
    fn performance_rates() {
        let m = performance(&sample());
        assert_eq!(m.total_tasks, 7);
        assert_eq!(m.completed_tasks, 2);
        assert_eq!(m.failed_tasks, 2);
        assert_eq!(m.skipped_tasks, 1);
        assert_eq!(m.pending_tasks, 2);
        assert_eq!(m.completion_rate, 5.0 / 7.0);
        assert_eq!(m.success_rate, 0.5);
        assert_eq!(m.first_attempt_success_rate, 0.5);
        assert_eq!(m.avg_duration_seconds, 60.0);
        assert_eq!(m.total_duration_seconds, 120.0);
        assert_eq!(m.total_tokens, 1200);
    }

    #[test]
    fn empty_state_has_zero_rates() {
        let m = performance(&DecompositionState::new("/srv/app"));
        assert_eq!(m.success_rate, 0.0);
        assert_eq!(m.completion_rate, 0.0);
    }

    #[test]
    fn planning_per_phase() {
        let m = planning(&sample());
        assert_eq!(m.total_phases, 3);
        assert_eq!(m.tasks_per_phase[&2], 3);
        assert_eq!(m.completed_per_phase[&1], 2);
        assert_eq!(m.completed_per_phase[&2], 1);
        assert_eq!(m.phase_progress[&1], 1.0);
        assert_eq!(m.remaining_tasks, 4);
        assert_eq!(m.ready_tasks, 1);
        assert_eq!(m.blocked_tasks, 1);
    }

    #[test]
    fn failure_breakdown() {
        let m = failures(&sample());
        assert_eq!(m.total_failures, 2);
        assert_eq!(m.by_category[&FailureCategory::Test], 1);
        assert_eq!(m.by_category[&FailureCategory::Unknown], 1);
        assert_eq!(m.retryable_count, 1);
        assert_eq!(m.non_retryable_count, 1);
        assert_eq!(m.failed_tasks[0].task_id, "T3");
    }

    #[test]
    fn calibration_from_records() {
        let mut state = sample();
        assert_eq!(calibration_score(&state).score, 1.0);

        for (id, outcome) in [
            ("T1", CalibrationOutcome::Correct),
            ("T2", CalibrationOutcome::Correct),
            ("T3", CalibrationOutcome::FalsePositive),
            ("T4", CalibrationOutcome::FalseNegative),
        ] {
            state.tasks.get_mut(id).unwrap().calibration = Some(Calibration {
                outcome,
                notes: None,
                recorded_at: Utc::now(),
            });
        }
        let score = calibration_score(&state);
        assert_eq!(score.score, 0.5);
        assert_eq!(score.total_verified, 4);
        assert_eq!(score.false_negatives, 1);
    }
}
