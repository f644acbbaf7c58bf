//! Batch checkpoints and crash recovery.
//!
//! A checkpoint lists the task IDs a driver is about to spawn. As outcomes
//! arrive each ID moves from `pending` to `completed` or `failed`. After an
//! interruption `recover` reconciles the IDs still pending against result
//! records under `bundles/`, never guessing an outcome it has no evidence
//! for.
//!
//! Lock order is checkpoint then state. Nothing takes the checkpoint lock
//! while holding the state lock.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bundle::{TaskResult, result_path};
use crate::errors::{ResourceKind, Result, TaskforgeError};
use crate::state::lifecycle::{apply_complete, apply_fail, apply_start};
use crate::state::persist::{DocumentLock, LockMode, atomic_write_json, read_json};
use crate::state::{DecompositionState, StateStore, TaskFailure, TaskStatus};

pub const CHECKPOINT_FILE: &str = "orchestrator-checkpoint.json";
pub const CHECKPOINT_VERSION: &str = "1.0";

/// Final disposition of a task within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Completed => write!(f, "completed"),
            TaskOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" | "complete" | "completed" => Ok(TaskOutcome::Completed),
            "failed" | "failure" => Ok(TaskOutcome::Failed),
            _ => anyhow::bail!(
                "Invalid outcome '{}'. Valid values: success, complete, completed, failed, failure",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Active,
    Complete,
}

impl std::fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointState::Active => write!(f, "active"),
            CheckpointState::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointTasks {
    #[serde(default)]
    pub pending: Vec<String>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: String,
    pub batch_id: String,
    pub spawned_at: DateTime<Utc>,
    pub status: CheckpointState,
    pub tasks: CheckpointTasks,
    /// Pending IDs recovery could not reconcile, with the reason.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub orphaned: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    fn new(task_ids: Vec<String>) -> Self {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            version: CHECKPOINT_VERSION.to_string(),
            batch_id: format!("batch-{}-{}", now.format("%Y%m%dT%H%M%S"), &suffix[..8]),
            spawned_at: now,
            status: CheckpointState::Active,
            tasks: CheckpointTasks {
                pending: task_ids,
                completed: Vec::new(),
                failed: Vec::new(),
            },
            orphaned: BTreeMap::new(),
            updated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CheckpointState::Active
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.task_ids().any(|id| id == task_id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &String> {
        self.tasks
            .pending
            .iter()
            .chain(self.tasks.completed.iter())
            .chain(self.tasks.failed.iter())
    }

    /// Move `task_id` into the list for `outcome`, dropping it from the others.
    pub fn place(&mut self, task_id: &str, outcome: TaskOutcome) {
        self.tasks.pending.retain(|id| id != task_id);
        self.tasks.completed.retain(|id| id != task_id);
        self.tasks.failed.retain(|id| id != task_id);
        self.orphaned.remove(task_id);
        match outcome {
            TaskOutcome::Completed => self.tasks.completed.push(task_id.to_string()),
            TaskOutcome::Failed => self.tasks.failed.push(task_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointStatus {
    #[serde(flatten)]
    pub checkpoint: Checkpoint,
    pub total: usize,
    pub pending_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub orphaned_count: usize,
}

impl From<Checkpoint> for CheckpointStatus {
    fn from(checkpoint: Checkpoint) -> Self {
        Self {
            total: checkpoint.task_ids().count(),
            pending_count: checkpoint.tasks.pending.len(),
            completed_count: checkpoint.tasks.completed.len(),
            failed_count: checkpoint.tasks.failed.len(),
            orphaned_count: checkpoint.orphaned.len(),
            checkpoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveredTask {
    pub task_id: String,
    pub outcome: TaskOutcome,
    /// Store status before recovery applied the outcome.
    pub previous_status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedTask {
    pub task_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub batch_id: String,
    pub recovered: Vec<RecoveredTask>,
    pub orphaned: Vec<OrphanedTask>,
}

/// Manages `orchestrator-checkpoint.json` beside a state store.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    store: StateStore,
}

impl CheckpointManager {
    pub fn for_store(store: &StateStore) -> Self {
        Self {
            store: store.clone(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.store.planning_dir().join(CHECKPOINT_FILE)
    }

    fn timeout(&self) -> Duration {
        self.store.lock_timeout()
    }

    fn read(&self) -> Result<Option<Checkpoint>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path, ResourceKind::Checkpoint).map(Some)
    }

    fn write(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.updated_at = Some(Utc::now());
        atomic_write_json(&self.path(), checkpoint)
    }

    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let _lock = DocumentLock::acquire(&path, LockMode::Shared, self.timeout())?;
        self.read()
    }

    pub fn require(&self) -> Result<Checkpoint> {
        self.load()?
            .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Checkpoint, CHECKPOINT_FILE))
    }

    /// Start a batch. Every ID must be a known task, listed once.
    pub fn create(&self, task_ids: &[String]) -> Result<Checkpoint> {
        if task_ids.is_empty() {
            return Err(TaskforgeError::validation(
                "a checkpoint needs at least one task",
                Vec::new(),
            ));
        }
        let mut seen = BTreeSet::new();
        let duplicates: Vec<String> = task_ids
            .iter()
            .filter(|id| !seen.insert(id.as_str()))
            .map(|id| format!("task {} listed more than once", id))
            .collect();
        if !duplicates.is_empty() {
            return Err(TaskforgeError::validation(
                "checkpoint task list has duplicates",
                duplicates,
            ));
        }

        let path = self.path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.timeout())?;
        if let Some(existing) = self.read()?
            && existing.is_active()
        {
            return Err(TaskforgeError::validation(
                format!("checkpoint {} is still active", existing.batch_id),
                vec!["complete or clear it before creating another".to_string()],
            ));
        }

        let state = self.store.load()?;
        let unknown: Vec<String> = task_ids
            .iter()
            .filter(|id| !state.tasks.contains_key(id.as_str()))
            .map(|id| format!("unknown task {}", id))
            .collect();
        if !unknown.is_empty() {
            return Err(TaskforgeError::validation(
                "checkpoint names tasks the store does not know",
                unknown,
            ));
        }

        let mut checkpoint = Checkpoint::new(task_ids.to_vec());
        self.write(&mut checkpoint)?;
        info!(batch_id = %checkpoint.batch_id, tasks = task_ids.len(), "checkpoint created");
        Ok(checkpoint)
    }

    /// Record an outcome for a task in the batch.
    pub fn update_task(&self, task_id: &str, outcome: TaskOutcome) -> Result<Checkpoint> {
        let path = self.path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.timeout())?;
        let mut checkpoint = self
            .read()?
            .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Checkpoint, CHECKPOINT_FILE))?;
        if !checkpoint.is_active() {
            return Err(TaskforgeError::validation(
                format!("checkpoint {} is already complete", checkpoint.batch_id),
                vec!["create a new checkpoint for further updates".to_string()],
            ));
        }
        if !checkpoint.contains(task_id) {
            return Err(TaskforgeError::validation(
                format!(
                    "task {} is not part of batch {}",
                    task_id, checkpoint.batch_id
                ),
                Vec::new(),
            ));
        }
        checkpoint.place(task_id, outcome);
        self.write(&mut checkpoint)?;
        info!(task_id, %outcome, batch_id = %checkpoint.batch_id, "checkpoint task updated");
        Ok(checkpoint)
    }

    /// Like `update_task`, but a missing or inactive checkpoint, or a task
    /// outside the batch, is not an error. Returns whether anything changed.
    pub fn record_if_tracked(&self, task_id: &str, outcome: TaskOutcome) -> Result<bool> {
        let path = self.path();
        if !path.exists() {
            return Ok(false);
        }
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.timeout())?;
        let Some(mut checkpoint) = self.read()? else {
            return Ok(false);
        };
        if !checkpoint.is_active() || !checkpoint.contains(task_id) {
            return Ok(false);
        }
        checkpoint.place(task_id, outcome);
        self.write(&mut checkpoint)?;
        Ok(true)
    }

    /// Mark the batch complete. Every task needs a final disposition.
    pub fn complete(&self) -> Result<Checkpoint> {
        let path = self.path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.timeout())?;
        let mut checkpoint = self
            .read()?
            .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Checkpoint, CHECKPOINT_FILE))?;
        if !checkpoint.tasks.pending.is_empty() {
            return Err(TaskforgeError::validation(
                format!(
                    "batch {} still has pending tasks",
                    checkpoint.batch_id
                ),
                checkpoint.tasks.pending.clone(),
            ));
        }
        checkpoint.status = CheckpointState::Complete;
        self.write(&mut checkpoint)?;
        info!(batch_id = %checkpoint.batch_id, "checkpoint complete");
        Ok(checkpoint)
    }

    pub fn status(&self) -> Result<Option<CheckpointStatus>> {
        Ok(self.load()?.map(CheckpointStatus::from))
    }

    /// Delete the checkpoint. Returns false when there was none.
    pub fn clear(&self) -> Result<bool> {
        let path = self.path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.timeout())?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("checkpoint cleared");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TaskforgeError::io(&path, e)),
        }
    }

    /// Reconcile every pending task in the batch against its result record.
    ///
    /// A task is recovered only when `bundles/<ID>-result.json` parses, names
    /// the same task (or no task), reports a final outcome, and the store
    /// record can take that outcome. The store transition and the checkpoint
    /// move happen together; anything else stays pending and is flagged
    /// orphaned with the reason.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let path = self.path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.timeout())?;
        let mut checkpoint = self
            .read()?
            .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Checkpoint, CHECKPOINT_FILE))?;

        let evidence: Vec<(String, Result<TaskResult, String>)> = checkpoint
            .tasks
            .pending
            .iter()
            .map(|id| (id.clone(), self.evidence(id)))
            .collect();

        let (recovered, orphaned) = self.store.update(|state| {
            let mut recovered = Vec::new();
            let mut orphaned = Vec::new();
            for (task_id, found) in evidence {
                let outcome = found.and_then(|result| reconcile(state, &task_id, &result));
                match outcome {
                    Ok(task) => recovered.push(task),
                    Err(reason) => orphaned.push(OrphanedTask { task_id, reason }),
                }
            }
            if !recovered.is_empty() {
                state.recalculate_execution();
            }
            Ok((recovered, orphaned))
        })?;

        for task in &recovered {
            checkpoint.place(&task.task_id, task.outcome);
            info!(task_id = %task.task_id, outcome = %task.outcome, "task recovered");
        }
        for task in &orphaned {
            warn!(task_id = %task.task_id, reason = %task.reason, "task orphaned");
            checkpoint
                .orphaned
                .insert(task.task_id.clone(), task.reason.clone());
        }
        self.write(&mut checkpoint)?;

        Ok(RecoveryReport {
            batch_id: checkpoint.batch_id,
            recovered,
            orphaned,
        })
    }

    /// The result record for a task, or why it cannot serve as evidence.
    fn evidence(&self, task_id: &str) -> Result<TaskResult, String> {
        let path = result_path(&self.store.bundles_dir(), task_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err("no result record".to_string());
            }
            Err(e) => return Err(format!("result record unreadable: {}", e)),
        };
        let result: TaskResult = serde_json::from_slice(&bytes)
            .map_err(|e| format!("result record is not valid JSON: {}", e))?;
        if !result.task_id.is_empty() && result.task_id != task_id {
            return Err(format!("result record names task {}", result.task_id));
        }
        Ok(result)
    }
}

/// Apply the outcome in `result` to the store record for `task_id`.
fn reconcile(
    state: &mut DecompositionState,
    task_id: &str,
    result: &TaskResult,
) -> Result<RecoveredTask, String> {
    let Some(outcome) = result.outcome() else {
        return Err(format!("result status '{}' is not final", result.status));
    };
    let Some(previous_status) = state.tasks.get(task_id).map(|t| t.status) else {
        return Err("task is not in the state document".to_string());
    };

    let now = Utc::now();
    let apply = |state: &mut DecompositionState| -> Result<()> {
        match outcome {
            TaskOutcome::Completed => apply_complete(state, task_id, result.files.to_task_files(), now),
            TaskOutcome::Failed => apply_fail(
                state,
                task_id,
                TaskFailure {
                    category: result.failure_category(),
                    message: result
                        .error
                        .clone()
                        .unwrap_or_else(|| "failure recovered from result record".to_string()),
                    retryable: result.failure_category().default_retryable(),
                    subcategory: None,
                },
                now,
            ),
        }
    };

    let applied = match (previous_status, outcome) {
        (TaskStatus::Complete, TaskOutcome::Completed) | (TaskStatus::Failed, TaskOutcome::Failed) => {
            Ok(())
        }
        (TaskStatus::Running, _) => apply(state),
        (TaskStatus::Pending, _) => apply_start(state, task_id, now).and_then(|_| apply(state)),
        (status, outcome) => {
            return Err(format!(
                "store status {} cannot take outcome {}",
                status, outcome
            ));
        }
    };
    applied.map_err(|e| e.to_string())?;

    Ok(RecoveredTask {
        task_id: task_id.to_string(),
        outcome,
        previous_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskRecord;
    use serde_json::json;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn setup(statuses: &[(&str, TaskStatus)]) -> (TempDir, StateStore, CheckpointManager) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("planning"));
        store.init("/work/app").unwrap();
        store
            .update(|s| {
                for (id, status) in statuses {
                    let mut t = TaskRecord::new(*id, *id, 1);
                    t.status = *status;
                    if *status == TaskStatus::Running {
                        t.started_at = Some(Utc::now());
                        t.attempts = 1;
                    }
                    s.tasks.insert(id.to_string(), t);
                }
                s.recalculate_execution();
                Ok(())
            })
            .unwrap();
        let manager = CheckpointManager::for_store(&store);
        (dir, store, manager)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn write_result(store: &StateStore, task_id: &str, body: serde_json::Value) {
        fs::write(
            result_path(&store.bundles_dir(), task_id),
            serde_json::to_string_pretty(&body).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn outcome_synonyms() {
        assert_eq!("success".parse::<TaskOutcome>().unwrap(), TaskOutcome::Completed);
        assert_eq!("COMPLETE".parse::<TaskOutcome>().unwrap(), TaskOutcome::Completed);
        assert_eq!("failure".parse::<TaskOutcome>().unwrap(), TaskOutcome::Failed);
        assert!("running".parse::<TaskOutcome>().is_err());
    }

    #[test]
    fn create_rejects_empty_duplicate_and_second_active() {
        let (_dir, _store, manager) = setup(&[("T1", TaskStatus::Pending)]);
        assert!(manager.create(&[]).is_err());
        assert!(manager.create(&ids(&["T1", "T1"])).is_err());
        assert!(manager.create(&ids(&["T9"])).is_err());

        let cp = manager.create(&ids(&["T1"])).unwrap();
        assert!(cp.batch_id.starts_with("batch-"));
        assert_eq!(cp.version, CHECKPOINT_VERSION);

        let err = manager.create(&ids(&["T1"])).unwrap_err();
        assert!(err.to_string().contains("still active"));
    }

    #[test]
    fn update_moves_between_lists() {
        let (_dir, _store, manager) =
            setup(&[("T1", TaskStatus::Running), ("T2", TaskStatus::Running)]);
        manager.create(&ids(&["T1", "T2"])).unwrap();

        manager.update_task("T1", TaskOutcome::Failed).unwrap();
        let cp = manager.update_task("T1", TaskOutcome::Completed).unwrap();
        assert_eq!(cp.tasks.completed, ids(&["T1"]));
        assert!(cp.tasks.failed.is_empty());
        assert_eq!(cp.tasks.pending, ids(&["T2"]));

        assert!(manager.update_task("T9", TaskOutcome::Completed).is_err());
        assert!(manager.complete().is_err());

        manager.update_task("T2", TaskOutcome::Failed).unwrap();
        let done = manager.complete().unwrap();
        assert_eq!(done.status, CheckpointState::Complete);
        assert!(!manager.record_if_tracked("T2", TaskOutcome::Completed).unwrap());
    }

    #[test]
    fn completed_batch_rejects_updates() {
        let (_dir, _store, manager) = setup(&[("T1", TaskStatus::Running)]);
        manager.create(&ids(&["T1"])).unwrap();
        manager.update_task("T1", TaskOutcome::Completed).unwrap();
        manager.complete().unwrap();

        match manager.update_task("T1", TaskOutcome::Failed).unwrap_err() {
            TaskforgeError::ValidationFailed { message, .. } => {
                assert!(message.contains("already complete"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let cp = manager.require().unwrap();
        assert_eq!(cp.tasks.completed, ids(&["T1"]));
        assert!(cp.tasks.failed.is_empty());
    }

    #[test]
    fn status_and_clear() {
        let (_dir, _store, manager) = setup(&[("T1", TaskStatus::Pending)]);
        assert!(manager.status().unwrap().is_none());
        assert!(!manager.clear().unwrap());

        manager.create(&ids(&["T1"])).unwrap();
        let status = manager.status().unwrap().unwrap();
        assert_eq!(status.total, 1);
        assert_eq!(status.pending_count, 1);

        assert!(manager.clear().unwrap());
        assert!(manager.load().unwrap().is_none());
    }

    #[test]
    fn recovery_partitions_every_pending_task() {
        let (_dir, store, manager) = setup(&[
            ("T1", TaskStatus::Running),
            ("T2", TaskStatus::Running),
            ("T3", TaskStatus::Running),
            ("T4", TaskStatus::Running),
            ("T5", TaskStatus::Pending),
        ]);
        manager.create(&ids(&["T1", "T2", "T3", "T4", "T5"])).unwrap();

        write_result(
            &store,
            "T1",
            json!({ "task_id": "T1", "status": "success",
                    "files": { "created": ["src/a.rs"] } }),
        );
        write_result(
            &store,
            "T2",
            json!({ "task_id": "T2", "status": "failed", "error": "tests red" }),
        );
        write_result(&store, "T4", json!({ "task_id": "T9", "status": "success" }));
        write_result(&store, "T5", json!({ "task_id": "T5", "status": "complete" }));

        let report = manager.recover().unwrap();
        let recovered: Vec<_> = report.recovered.iter().map(|r| r.task_id.as_str()).collect();
        let orphaned: Vec<_> = report.orphaned.iter().map(|o| o.task_id.as_str()).collect();
        assert_eq!(recovered, vec!["T1", "T2", "T5"]);
        assert_eq!(orphaned, vec!["T3", "T4"]);
        assert_eq!(report.orphaned[0].reason, "no result record");
        assert!(report.orphaned[1].reason.contains("T9"));

        let cp = manager.require().unwrap();
        assert_eq!(cp.tasks.completed, ids(&["T1", "T5"]));
        assert_eq!(cp.tasks.failed, ids(&["T2"]));
        assert_eq!(cp.tasks.pending, ids(&["T3", "T4"]));
        assert_eq!(cp.orphaned.len(), 2);
        let mut all: Vec<_> = cp.task_ids().cloned().collect();
        all.sort();
        assert_eq!(all, ids(&["T1", "T2", "T3", "T4", "T5"]));

        let state = store.load().unwrap();
        assert_eq!(state.tasks["T1"].status, TaskStatus::Complete);
        assert_eq!(state.tasks["T1"].files.created, ids(&["src/a.rs"]));
        assert_eq!(state.tasks["T2"].status, TaskStatus::Failed);
        assert_eq!(
            state.tasks["T2"].failure.as_ref().unwrap().message,
            "tests red"
        );
        assert_eq!(state.tasks["T3"].status, TaskStatus::Running);
        assert_eq!(state.tasks["T5"].status, TaskStatus::Complete);
        assert_eq!(state.tasks["T5"].attempts, 1);
    }

    #[test]
    fn recovery_orphans_conflicting_store_status() {
        let (_dir, store, manager) = setup(&[("T1", TaskStatus::Running)]);
        manager.create(&ids(&["T1"])).unwrap();
        store
            .update(|s| {
                s.tasks.get_mut("T1").unwrap().status = TaskStatus::Skipped;
                Ok(())
            })
            .unwrap();
        write_result(&store, "T1", json!({ "task_id": "T1", "status": "success" }));

        let report = manager.recover().unwrap();
        assert!(report.recovered.is_empty());
        assert!(report.orphaned[0].reason.contains("skipped"));
        assert_eq!(store.task("T1").unwrap().status, TaskStatus::Skipped);
    }

    #[test]
    fn recovery_ignores_non_final_status() {
        let (_dir, store, manager) = setup(&[("T1", TaskStatus::Running)]);
        manager.create(&ids(&["T1"])).unwrap();
        write_result(&store, "T1", json!({ "task_id": "T1", "status": "in_progress" }));

        let report = manager.recover().unwrap();
        assert_eq!(report.orphaned.len(), 1);
        assert!(report.orphaned[0].reason.contains("not final"));
    }
}
