//! Per-task status state machine.
//!
//! ```text
//! pending ──start──▶ running ──complete──▶ complete
//!    │                  └──────fail──────▶ failed ──retry──▶ pending
//!    └──skip──▶ skipped ◀──skip── blocked
//! ```
//!
//! The `apply_*` functions are pure transitions over a loaded document; they
//! either mutate the task and execution counters or return
//! `InvalidTransition` without touching anything. `Lifecycle` wraps them in a
//! locked load-mutate-save and keeps the active checkpoint in step.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use super::store::StateStore;
use super::types::{
    DecompositionState, EventKind, FailureCategory, TaskFailure, TaskFiles, TaskRecord, TaskStatus,
};
use crate::checkpoint::{CheckpointManager, TaskOutcome};
use crate::errors::{ResourceKind, Result, TaskforgeError};

/// Check the task exists and is in one of `allowed`.
fn guard(
    state: &DecompositionState,
    task_id: &str,
    operation: &str,
    allowed: &[TaskStatus],
) -> Result<()> {
    let task = state
        .tasks
        .get(task_id)
        .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Task, task_id))?;
    if allowed.contains(&task.status) {
        Ok(())
    } else {
        Err(TaskforgeError::InvalidTransition {
            task_id: task_id.to_string(),
            operation: operation.to_string(),
            current: task.status,
        })
    }
}

fn task_mut<'a>(state: &'a mut DecompositionState, task_id: &str) -> Result<&'a mut TaskRecord> {
    state
        .tasks
        .get_mut(task_id)
        .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Task, task_id))
}

fn elapsed_seconds(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<f64> {
    started_at.map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0)
}

/// pending → running. Counts an attempt.
pub fn apply_start(state: &mut DecompositionState, task_id: &str, now: DateTime<Utc>) -> Result<()> {
    guard(state, task_id, "start", &[TaskStatus::Pending])?;
    let task = task_mut(state, task_id)?;
    task.status = TaskStatus::Running;
    task.started_at = Some(now);
    task.completed_at = None;
    task.attempts += 1;
    let attempt = task.attempts;

    if !state.execution.active_tasks.iter().any(|t| t == task_id) {
        state.execution.active_tasks.push(task_id.to_string());
    }
    state.record_event(
        EventKind::TaskStarted,
        Some(task_id),
        Some(json!({ "attempt": attempt })),
    );
    Ok(())
}

/// running → complete, recording the files the task touched.
pub fn apply_complete(
    state: &mut DecompositionState,
    task_id: &str,
    files: TaskFiles,
    now: DateTime<Utc>,
) -> Result<()> {
    guard(state, task_id, "complete", &[TaskStatus::Running])?;
    let task = task_mut(state, task_id)?;
    task.status = TaskStatus::Complete;
    task.completed_at = Some(now);
    task.duration_seconds = elapsed_seconds(task.started_at, now);
    let details = json!({
        "files_created": files.created.len(),
        "files_modified": files.modified.len(),
        "duration_seconds": task.duration_seconds,
    });
    task.files = files;

    state.execution.active_tasks.retain(|t| t != task_id);
    state.execution.completed_count += 1;
    state.refresh_current_phase();
    state.record_event(EventKind::TaskCompleted, Some(task_id), Some(details));
    Ok(())
}

/// running → failed.
pub fn apply_fail(
    state: &mut DecompositionState,
    task_id: &str,
    failure: TaskFailure,
    now: DateTime<Utc>,
) -> Result<()> {
    guard(state, task_id, "fail", &[TaskStatus::Running])?;
    let task = task_mut(state, task_id)?;
    task.status = TaskStatus::Failed;
    task.completed_at = Some(now);
    task.duration_seconds = elapsed_seconds(task.started_at, now);
    let details = json!({
        "category": failure.category,
        "message": failure.message,
        "retryable": failure.retryable,
    });
    task.failure = Some(failure);

    state.execution.active_tasks.retain(|t| t != task_id);
    state.execution.failed_count += 1;
    state.record_event(EventKind::TaskFailed, Some(task_id), Some(details));
    Ok(())
}

/// failed → pending, clearing everything the failed run recorded.
pub fn apply_retry(state: &mut DecompositionState, task_id: &str) -> Result<()> {
    guard(state, task_id, "retry", &[TaskStatus::Failed])?;
    let task = task_mut(state, task_id)?;
    if task.failure.as_ref().is_some_and(|f| !f.retryable) {
        warn!(task_id, "retrying a failure marked not retryable");
    }
    task.status = TaskStatus::Pending;
    task.started_at = None;
    task.completed_at = None;
    task.duration_seconds = None;
    task.failure = None;
    task.files = TaskFiles::default();
    task.verification = None;
    let attempts = task.attempts;

    state.execution.failed_count = state.execution.failed_count.saturating_sub(1);
    state.refresh_current_phase();
    state.record_event(
        EventKind::TaskRetried,
        Some(task_id),
        Some(json!({ "previous_attempts": attempts })),
    );
    Ok(())
}

/// pending | blocked → skipped. Dependents treat the task as satisfied.
pub fn apply_skip(
    state: &mut DecompositionState,
    task_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    guard(
        state,
        task_id,
        "skip",
        &[TaskStatus::Pending, TaskStatus::Blocked],
    )?;
    let task = task_mut(state, task_id)?;
    task.status = TaskStatus::Skipped;
    task.completed_at = Some(now);
    task.skip_reason = Some(reason.to_string());
    state.refresh_current_phase();
    state.record_event(
        EventKind::TaskSkipped,
        Some(task_id),
        Some(json!({ "reason": reason })),
    );
    Ok(())
}

/// Task lifecycle operations against a planning directory.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    store: StateStore,
    checkpoints: CheckpointManager,
}

impl Lifecycle {
    pub fn new(store: StateStore) -> Self {
        let checkpoints = CheckpointManager::for_store(&store);
        Self { store, checkpoints }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn start(&self, task_id: &str) -> Result<TaskRecord> {
        let record = self.store.update(|state| {
            if state.halt.requested {
                warn!(task_id, "starting task while a halt is requested");
            }
            apply_start(state, task_id, Utc::now())?;
            Ok(state.tasks[task_id].clone())
        })?;
        info!(task_id, attempt = record.attempts, "task started");
        Ok(record)
    }

    pub fn complete(&self, task_id: &str, files: TaskFiles) -> Result<TaskRecord> {
        let record = self.store.update(|state| {
            apply_complete(state, task_id, files, Utc::now())?;
            Ok(state.tasks[task_id].clone())
        })?;
        info!(task_id, "task complete");
        self.sync_checkpoint(task_id, TaskOutcome::Completed);
        Ok(record)
    }

    /// `retryable` defaults from the category when not given.
    pub fn fail(
        &self,
        task_id: &str,
        category: FailureCategory,
        message: &str,
        retryable: Option<bool>,
    ) -> Result<TaskRecord> {
        let failure = TaskFailure {
            category,
            message: message.to_string(),
            retryable: retryable.unwrap_or_else(|| category.default_retryable()),
            subcategory: None,
        };
        let record = self.store.update(|state| {
            apply_fail(state, task_id, failure, Utc::now())?;
            Ok(state.tasks[task_id].clone())
        })?;
        info!(task_id, %category, "task failed");
        self.sync_checkpoint(task_id, TaskOutcome::Failed);
        Ok(record)
    }

    pub fn retry(&self, task_id: &str) -> Result<TaskRecord> {
        let record = self.store.update(|state| {
            apply_retry(state, task_id)?;
            Ok(state.tasks[task_id].clone())
        })?;
        info!(task_id, "task reset to pending");
        Ok(record)
    }

    pub fn skip(&self, task_id: &str, reason: &str) -> Result<TaskRecord> {
        let record = self.store.update(|state| {
            apply_skip(state, task_id, reason, Utc::now())?;
            Ok(state.tasks[task_id].clone())
        })?;
        info!(task_id, reason, "task skipped");
        Ok(record)
    }

    /// The store already holds the outcome, so a checkpoint problem is
    /// logged rather than reported as a failed transition.
    fn sync_checkpoint(&self, task_id: &str, outcome: TaskOutcome) {
        match self.checkpoints.record_if_tracked(task_id, outcome) {
            Ok(true) => info!(task_id, ?outcome, "checkpoint updated"),
            Ok(false) => {}
            Err(err) => warn!(task_id, error = %err, "could not update checkpoint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn state_with(tasks: Vec<TaskRecord>) -> DecompositionState {
        let mut state = DecompositionState::new("/work/app");
        for t in tasks {
            state.tasks.insert(t.id.clone(), t);
        }
        state
    }

    fn make_lifecycle(tasks: Vec<TaskRecord>) -> (TempDir, Lifecycle) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("planning"));
        store.init("/work/app").unwrap();
        store
            .update(|s| {
                for t in tasks {
                    s.tasks.insert(t.id.clone(), t);
                }
                Ok(())
            })
            .unwrap();
        (dir, Lifecycle::new(store))
    }

    #[test]
    fn first_attempt_success_has_one_attempt() {
        let mut state = state_with(vec![TaskRecord::new("T1", "one", 1)]);
        let now = Utc::now();
        apply_start(&mut state, "T1", now).unwrap();
        assert_eq!(state.execution.active_tasks, vec!["T1".to_string()]);

        let files = TaskFiles {
            created: vec!["src/a.rs".into()],
            modified: vec![],
        };
        apply_complete(&mut state, "T1", files.clone(), now + chrono::Duration::seconds(3))
            .unwrap();
        let t1 = &state.tasks["T1"];
        assert_eq!(t1.status, TaskStatus::Complete);
        assert_eq!(t1.attempts, 1);
        assert_eq!(t1.files, files);
        assert_eq!(t1.duration_seconds, Some(3.0));
        assert!(state.execution.active_tasks.is_empty());
        assert_eq!(state.execution.completed_count, 1);
    }

    #[test]
    fn invalid_transitions_leave_record_unmodified() {
        let mut state = state_with(vec![TaskRecord::new("T1", "one", 1)]);
        let before = state.clone();

        let err = apply_complete(&mut state, "T1", TaskFiles::default(), Utc::now()).unwrap_err();
        match err {
            TaskforgeError::InvalidTransition {
                operation, current, ..
            } => {
                assert_eq!(operation, "complete");
                assert_eq!(current, TaskStatus::Pending);
            }
            other => panic!("Expected InvalidTransition, got {other:?}"),
        }
        assert!(apply_retry(&mut state, "T1").is_err());
        assert_eq!(state, before);

        apply_start(&mut state, "T1", Utc::now()).unwrap();
        let snapshot = state.clone();
        let err = apply_start(&mut state, "T1", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            TaskforgeError::InvalidTransition {
                current: TaskStatus::Running,
                ..
            }
        ));
        assert!(apply_skip(&mut state, "T1", "no", Utc::now()).is_err());
        assert_eq!(state, snapshot);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let mut state = state_with(vec![]);
        assert!(matches!(
            apply_start(&mut state, "T404", Utc::now()).unwrap_err(),
            TaskforgeError::NotFound {
                kind: ResourceKind::Task,
                ..
            }
        ));
    }

    #[test]
    fn fail_then_retry_clears_failure() {
        let mut state = state_with(vec![TaskRecord::new("T1", "one", 1)]);
        apply_start(&mut state, "T1", Utc::now()).unwrap();
        apply_fail(
            &mut state,
            "T1",
            TaskFailure {
                category: FailureCategory::Test,
                message: "assertion failed".into(),
                retryable: true,
                subcategory: None,
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(state.execution.failed_count, 1);
        assert!(state.tasks["T1"].failure.is_some());

        apply_retry(&mut state, "T1").unwrap();
        let t1 = &state.tasks["T1"];
        assert_eq!(t1.status, TaskStatus::Pending);
        assert_eq!(t1.attempts, 1);
        assert!(t1.failure.is_none());
        assert!(t1.started_at.is_none());
        assert_eq!(state.execution.failed_count, 0);
    }

    #[test]
    fn skip_from_blocked() {
        let mut blocked = TaskRecord::new("T2", "two", 1);
        blocked.status = TaskStatus::Blocked;
        let mut state = state_with(vec![blocked]);
        apply_skip(&mut state, "T2", "descoped", Utc::now()).unwrap();
        assert_eq!(state.tasks["T2"].status, TaskStatus::Skipped);
        assert_eq!(state.tasks["T2"].skip_reason.as_deref(), Some("descoped"));
    }

    #[test]
    fn complete_skipped_task_is_invalid() {
        let mut state = state_with(vec![TaskRecord::new("T1", "one", 1)]);
        apply_skip(&mut state, "T1", "later", Utc::now()).unwrap();
        let err = apply_complete(&mut state, "T1", TaskFiles::default(), Utc::now()).unwrap_err();
        assert!(err.to_string().contains("skipped"));
    }

    #[test]
    fn lifecycle_persists_transitions() {
        let (_dir, lifecycle) = make_lifecycle(vec![TaskRecord::new("T1", "one", 1)]);
        lifecycle.start("T1").unwrap();
        let failed = lifecycle
            .fail("T1", FailureCategory::Build, "compile error", None)
            .unwrap();
        assert!(failed.failure.unwrap().retryable);

        let stored = lifecycle.store().task("T1").unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);

        lifecycle.retry("T1").unwrap();
        assert_eq!(lifecycle.store().task("T1").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn halt_does_not_block_completion() {
        let (_dir, lifecycle) = make_lifecycle(vec![TaskRecord::new("T1", "one", 1)]);
        lifecycle.start("T1").unwrap();
        lifecycle
            .store()
            .request_halt("maintenance", "operator")
            .unwrap();
        assert_eq!(lifecycle.store().task("T1").unwrap().status, TaskStatus::Running);
        let done = lifecycle.complete("T1", TaskFiles::default()).unwrap();
        assert_eq!(done.status, TaskStatus::Complete);
    }

    #[test]
    fn halt_does_not_block_failure() {
        let (_dir, lifecycle) = make_lifecycle(vec![TaskRecord::new("T1", "one", 1)]);
        lifecycle.start("T1").unwrap();
        lifecycle
            .store()
            .request_halt("maintenance", "operator")
            .unwrap();
        let failed = lifecycle
            .fail("T1", FailureCategory::Timeout, "runner killed", None)
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(lifecycle.store().load().unwrap().halt.requested);
    }

    #[test]
    fn current_phase_follows_finished_work() {
        let mut state = state_with(vec![
            TaskRecord::new("T1", "one", 1),
            TaskRecord::new("T2", "two", 1),
            TaskRecord::new("T3", "three", 2),
        ]);
        state.recalculate_execution();
        assert_eq!(state.execution.current_phase, 1);

        apply_start(&mut state, "T1", Utc::now()).unwrap();
        apply_complete(&mut state, "T1", TaskFiles::default(), Utc::now()).unwrap();
        assert_eq!(state.execution.current_phase, 1);

        apply_skip(&mut state, "T2", "descoped", Utc::now()).unwrap();
        assert_eq!(state.execution.current_phase, 2);

        apply_start(&mut state, "T3", Utc::now()).unwrap();
        apply_complete(&mut state, "T3", TaskFiles::default(), Utc::now()).unwrap();
        assert_eq!(state.execution.current_phase, 0);
    }

    #[test]
    fn completion_moves_task_in_active_checkpoint() {
        let (_dir, lifecycle) = make_lifecycle(vec![
            TaskRecord::new("T1", "one", 1),
            TaskRecord::new("T2", "two", 1),
        ]);
        let checkpoints = CheckpointManager::for_store(lifecycle.store());
        checkpoints
            .create(&["T1".to_string(), "T2".to_string()])
            .unwrap();

        lifecycle.start("T1").unwrap();
        lifecycle.complete("T1", TaskFiles::default()).unwrap();
        lifecycle.start("T2").unwrap();
        lifecycle
            .fail("T2", FailureCategory::Env, "disk full", Some(false))
            .unwrap();

        let cp = checkpoints.require().unwrap();
        assert_eq!(cp.tasks.completed, vec!["T1".to_string()]);
        assert_eq!(cp.tasks.failed, vec!["T2".to_string()]);
        assert!(cp.tasks.pending.is_empty());
    }
}
