//! The task graph store: load, save and query the decomposition state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use super::persist::{
    DEFAULT_LOCK_TIMEOUT, DocumentLock, LockMode, atomic_write_json, read_json,
};
use super::phase::Phase;
use super::types::{
    ArtifactKind, ArtifactRef, DecompositionState, EventKind, STATE_VERSION, TaskRecord,
    TaskStatus, TaskValidation, TaskValidationVerdict,
};
use crate::config::Config;
use crate::errors::{ResourceKind, Result, TaskforgeError};
use crate::planning::{self, CapabilityMap, PhysicalMap};
use crate::schema::{SchemaName, SchemaRegistry};
use crate::util::checksum_bytes;

pub const STATE_FILE: &str = "state.json";

/// Handle on a planning directory's state document.
#[derive(Debug, Clone)]
pub struct StateStore {
    planning_dir: PathBuf,
    lock_timeout: Duration,
}

impl StateStore {
    pub fn new(planning_dir: impl Into<PathBuf>) -> Self {
        Self {
            planning_dir: planning_dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.planning_dir.clone()).with_lock_timeout(config.lock_timeout())
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn planning_dir(&self) -> &Path {
        &self.planning_dir
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn state_path(&self) -> PathBuf {
        self.planning_dir.join(STATE_FILE)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.planning_dir.join("tasks")
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.planning_dir.join("bundles")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.planning_dir.join("artifacts")
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.planning_dir.join("inputs")
    }

    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    /// Create the state document. Fails if one already exists.
    pub fn init(&self, target_dir: &str) -> Result<DecompositionState> {
        let path = self.state_path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.lock_timeout)?;
        if path.exists() {
            return Err(TaskforgeError::AlreadyExists { path });
        }
        for dir in [
            self.tasks_dir(),
            self.bundles_dir(),
            self.artifacts_dir(),
            self.inputs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| TaskforgeError::io(&dir, e))?;
        }

        let mut state = DecompositionState::new(target_dir);
        state.record_event(
            EventKind::DecompositionInitialized,
            None,
            Some(json!({ "target_dir": target_dir })),
        );
        atomic_write_json(&path, &state)?;
        info!(planning_dir = %self.planning_dir.display(), target_dir, "decomposition initialized");
        Ok(state)
    }

    /// Load the state document under a shared lock.
    pub fn load(&self) -> Result<DecompositionState> {
        let path = self.state_path();
        if !path.exists() {
            return Err(TaskforgeError::not_found(
                ResourceKind::State,
                path.display().to_string(),
            ));
        }
        let _lock = DocumentLock::acquire(&path, LockMode::Shared, self.lock_timeout)?;
        read_json(&path, ResourceKind::State)
    }

    /// Save the state document, stamping `updated_at`.
    pub fn save(&self, state: &mut DecompositionState) -> Result<()> {
        let path = self.state_path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.lock_timeout)?;
        state.updated_at = Utc::now();
        atomic_write_json(&path, state)
    }

    /// Load, mutate and save while holding the exclusive lock.
    ///
    /// When `mutate` fails nothing is written, so the stored document is left
    /// exactly as it was.
    pub fn update<T>(
        &self,
        mutate: impl FnOnce(&mut DecompositionState) -> Result<T>,
    ) -> Result<T> {
        let path = self.state_path();
        if !path.exists() {
            return Err(TaskforgeError::not_found(
                ResourceKind::State,
                path.display().to_string(),
            ));
        }
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.lock_timeout)?;
        let mut state: DecompositionState = read_json(&path, ResourceKind::State)?;
        let out = mutate(&mut state)?;
        state.updated_at = Utc::now();
        atomic_write_json(&path, &state)?;
        Ok(out)
    }

    pub fn task(&self, task_id: &str) -> Result<TaskRecord> {
        self.load()?
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Task, task_id))
    }

    /// Merge `tasks/*.json` into the store. Known IDs are never overwritten.
    pub fn load_tasks(&self) -> Result<LoadReport> {
        let defs = planning::load_definitions(&self.tasks_dir())?;
        let planning_dir = self.planning_dir.clone();
        self.update(|state| {
            let mut report = LoadReport::default();
            for (path, def) in &defs {
                if state.tasks.contains_key(&def.id) {
                    report.existing.push(def.id.clone());
                    continue;
                }
                let rel = path
                    .strip_prefix(&planning_dir)
                    .unwrap_or(path)
                    .display()
                    .to_string();
                state.tasks.insert(def.id.clone(), def.to_record(Some(rel)));
                report.added.push(def.id.clone());
            }
            if !report.added.is_empty() {
                state.recalculate_execution();
                state.record_event(
                    EventKind::TasksLoaded,
                    None,
                    Some(json!({ "added": report.added.len(), "total": state.tasks.len() })),
                );
            }
            debug!(added = report.added.len(), existing = report.existing.len(), "tasks merged");
            Ok(report)
        })
    }

    pub fn ready_tasks(&self) -> Result<Vec<TaskRecord>> {
        let state = self.load()?;
        Ok(ready_tasks(&state).into_iter().cloned().collect())
    }

    pub fn status(&self) -> Result<StatusSummary> {
        Ok(StatusSummary::from_state(&self.load()?))
    }

    /// Record an upstream artifact after parsing and, when a registry is
    /// given, schema-validating it. An artifact that fails either check is
    /// recorded with `valid = false` and the reason.
    pub fn register_artifact(
        &self,
        kind: ArtifactKind,
        path: Option<&Path>,
        schemas: Option<&SchemaRegistry>,
    ) -> Result<ArtifactRef> {
        let full_path = match path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.planning_dir.join(p),
            None => self.planning_dir.join(kind.default_path()),
        };
        let bytes = match std::fs::read(&full_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TaskforgeError::not_found(
                    ResourceKind::Artifact,
                    full_path.display().to_string(),
                ));
            }
            Err(e) => return Err(TaskforgeError::io(&full_path, e)),
        };

        let error = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Err(e) => Some(format!("invalid JSON: {}", e)),
            Ok(value) => {
                let structural = match kind {
                    ArtifactKind::CapabilityMap => {
                        serde_json::from_value::<CapabilityMap>(value.clone()).err()
                    }
                    ArtifactKind::PhysicalMap => {
                        serde_json::from_value::<PhysicalMap>(value.clone()).err()
                    }
                };
                match (structural, schemas) {
                    (Some(e), _) => Some(e.to_string()),
                    (None, Some(registry)) => {
                        let report = registry.validate(SchemaName::for_artifact(kind), &value)?;
                        (!report.valid).then(|| report.errors.join("; "))
                    }
                    (None, None) => None,
                }
            }
        };

        let artifact = ArtifactRef {
            path: full_path
                .strip_prefix(&self.planning_dir)
                .unwrap_or(&full_path)
                .display()
                .to_string(),
            checksum: Some(checksum_bytes(&bytes)),
            valid: error.is_none(),
            validated_at: Utc::now(),
            error,
        };

        let recorded = artifact.clone();
        self.update(move |state| {
            state.record_event(
                EventKind::ArtifactRegistered,
                None,
                Some(json!({
                    "artifact": kind.to_string(),
                    "path": recorded.path,
                    "valid": recorded.valid,
                })),
            );
            state.artifacts.set(kind, recorded);
            Ok(())
        })?;
        info!(artifact = %kind, valid = artifact.valid, "artifact registered");
        Ok(artifact)
    }

    /// Record the task-definition review verdict.
    pub fn register_task_validation(
        &self,
        verdict: TaskValidationVerdict,
        summary: Option<String>,
        issues: Vec<String>,
    ) -> Result<TaskValidation> {
        self.update(|state| {
            let validation = TaskValidation {
                verdict,
                summary,
                issues,
                validated_at: Utc::now(),
            };
            state.artifacts.task_validation_verdict = Some(validation.clone());
            state.record_event(
                EventKind::TaskValidationRecorded,
                None,
                Some(json!({ "verdict": verdict.to_string() })),
            );
            Ok(validation)
        })
    }

    /// Add token usage and cost to the execution totals.
    pub fn log_tokens(
        &self,
        task_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        model: Option<&str>,
    ) -> Result<()> {
        self.update(|state| {
            if !state.tasks.contains_key(task_id) {
                return Err(TaskforgeError::not_found(ResourceKind::Task, task_id));
            }
            let total = input_tokens + output_tokens;
            state.execution.total_tokens += total;
            state.execution.total_cost_usd += cost_usd;
            state.record_event(
                EventKind::TokensLogged,
                Some(task_id),
                Some(json!({
                    "input_tokens": input_tokens,
                    "output_tokens": output_tokens,
                    "cost_usd": cost_usd,
                    "model": model,
                })),
            );
            Ok(())
        })
    }
}

/// Result of merging task definitions into the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub added: Vec<String>,
    pub existing: Vec<String>,
}

/// Pending tasks whose dependencies are all complete or skipped, ordered by
/// implementation phase then ID.
///
/// A dependency that does not resolve to a known task is never satisfied.
pub fn ready_tasks(state: &DecompositionState) -> Vec<&TaskRecord> {
    let mut ready: Vec<&TaskRecord> = state
        .tasks
        .values()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter(|t| {
            t.depends_on.iter().all(|dep| {
                state
                    .tasks
                    .get(dep)
                    .is_some_and(|d| d.status.satisfies_dependents())
            })
        })
        .collect();
    ready.sort_by(|a, b| a.phase.cmp(&b.phase).then_with(|| a.id.cmp(&b.id)));
    ready
}

/// Structural checks on a loaded document.
pub fn validate_state(state: &DecompositionState) -> Vec<String> {
    let mut problems = Vec::new();
    if state.version != STATE_VERSION {
        problems.push(format!(
            "unsupported version '{}', expected '{}'",
            state.version, STATE_VERSION
        ));
    }
    if state.target_dir.trim().is_empty() {
        problems.push("target_dir is empty".to_string());
    }
    if state.updated_at < state.created_at {
        problems.push("updated_at precedes created_at".to_string());
    }
    for (key, task) in &state.tasks {
        if &task.id != key {
            problems.push(format!("task key {} holds record with id {}", key, task.id));
        }
    }
    for phase in &state.phase.completed {
        if phase.index() >= state.phase.current.index() {
            problems.push(format!(
                "phase {} is marked completed but current phase is {}",
                phase, state.phase.current
            ));
        }
    }
    for active in &state.execution.active_tasks {
        match state.tasks.get(active) {
            Some(t) if t.status == TaskStatus::Running => {}
            Some(t) => problems.push(format!("active task {} has status {}", active, t.status)),
            None => problems.push(format!("active task {} does not exist", active)),
        }
    }
    problems
}

/// Overview returned by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub phase: Phase,
    pub completed_phases: Vec<Phase>,
    pub target_dir: String,
    pub total_tasks: usize,
    pub by_status: BTreeMap<String, usize>,
    pub active_tasks: Vec<String>,
    pub ready_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub progress: String,
    pub halted: bool,
}

impl StatusSummary {
    pub fn from_state(state: &DecompositionState) -> Self {
        let by_status = TaskStatus::ALL
            .iter()
            .map(|s| (s.to_string(), state.count_status(*s)))
            .collect();
        let done = state
            .tasks
            .values()
            .filter(|t| t.status.satisfies_dependents())
            .count();
        Self {
            phase: state.phase.current,
            completed_phases: state.phase.completed.clone(),
            target_dir: state.target_dir.clone(),
            total_tasks: state.tasks.len(),
            by_status,
            active_tasks: state.execution.active_tasks.clone(),
            ready_tasks: ready_tasks(state).iter().map(|t| t.id.clone()).collect(),
            failed_tasks: state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Failed)
                .map(|t| t.id.clone())
                .collect(),
            progress: format!("{}/{}", done, state.tasks.len()),
            halted: state.halt.requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn make_store() -> (TempDir, StateStore) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("project-planning"));
        (dir, store)
    }

    fn insert(store: &StateStore, tasks: Vec<TaskRecord>) {
        store
            .update(|state| {
                for t in tasks {
                    state.tasks.insert(t.id.clone(), t);
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn init_creates_layout_and_refuses_second_init() {
        let (_dir, store) = make_store();
        let state = store.init("/work/app").unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.phase.current, Phase::Ingestion);
        assert!(store.tasks_dir().is_dir());
        assert!(store.bundles_dir().is_dir());

        let err = store.init("/work/app").unwrap_err();
        assert!(matches!(err, TaskforgeError::AlreadyExists { .. }));
    }

    #[test]
    fn load_missing_vs_corrupt() {
        let (_dir, store) = make_store();
        assert!(matches!(
            store.load().unwrap_err(),
            TaskforgeError::NotFound {
                kind: ResourceKind::State,
                ..
            }
        ));

        fs::create_dir_all(store.planning_dir()).unwrap();
        fs::write(store.state_path(), "{\"version\": \"2.0\", ").unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            TaskforgeError::StateCorrupt { .. }
        ));
    }

    #[test]
    fn failed_update_leaves_document_untouched() {
        let (_dir, store) = make_store();
        store.init("/work/app").unwrap();
        let before = fs::read_to_string(store.state_path()).unwrap();

        let result: Result<()> = store.update(|state| {
            state.target_dir = "changed".into();
            Err(TaskforgeError::validation("nope", vec![]))
        });
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(store.state_path()).unwrap(), before);
    }

    #[test]
    fn load_tasks_is_idempotent_merge() {
        let (_dir, store) = make_store();
        store.init("/work/app").unwrap();
        fs::write(
            store.tasks_dir().join("T1.json"),
            r#"{"id": "T1", "name": "first", "phase": 1}"#,
        )
        .unwrap();

        let report = store.load_tasks().unwrap();
        assert_eq!(report.added, vec!["T1".to_string()]);

        store
            .update(|s| {
                s.tasks.get_mut("T1").unwrap().status = TaskStatus::Complete;
                Ok(())
            })
            .unwrap();
        fs::write(
            store.tasks_dir().join("T1.json"),
            r#"{"id": "T1", "name": "renamed", "phase": 2}"#,
        )
        .unwrap();

        let report = store.load_tasks().unwrap();
        assert!(report.added.is_empty());
        assert_eq!(report.existing, vec!["T1".to_string()]);
        let t1 = store.task("T1").unwrap();
        assert_eq!(t1.name, "first");
        assert_eq!(t1.status, TaskStatus::Complete);
        assert_eq!(t1.file.as_deref(), Some("tasks/T1.json"));
    }

    #[test]
    fn ready_set_follows_chain() {
        let (_dir, store) = make_store();
        store.init("/work/app").unwrap();
        insert(
            &store,
            vec![
                TaskRecord::new("T1", "one", 1),
                TaskRecord::new("T2", "two", 1).with_deps(&["T1"]),
                TaskRecord::new("T3", "three", 1).with_deps(&["T2"]),
            ],
        );

        let ids = |v: Vec<TaskRecord>| v.into_iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids(store.ready_tasks().unwrap()), vec!["T1"]);

        store
            .update(|s| {
                s.tasks.get_mut("T1").unwrap().status = TaskStatus::Skipped;
                Ok(())
            })
            .unwrap();
        assert_eq!(ids(store.ready_tasks().unwrap()), vec!["T2"]);
    }

    #[test]
    fn ready_tasks_sorted_by_phase_then_id() {
        let mut state = DecompositionState::new("/work");
        for t in [
            TaskRecord::new("T9", "a", 1),
            TaskRecord::new("T1", "b", 2),
            TaskRecord::new("T5", "c", 1),
            TaskRecord::new("T7", "d", 1).with_deps(&["missing"]),
        ] {
            state.tasks.insert(t.id.clone(), t);
        }
        let ids: Vec<_> = ready_tasks(&state).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T5", "T9", "T1"]);
    }

    #[test]
    fn status_summary_counts() {
        let mut state = DecompositionState::new("/work");
        let mut done = TaskRecord::new("T1", "a", 1);
        done.status = TaskStatus::Complete;
        let mut failed = TaskRecord::new("T2", "b", 1);
        failed.status = TaskStatus::Failed;
        for t in [done, failed, TaskRecord::new("T3", "c", 1)] {
            state.tasks.insert(t.id.clone(), t);
        }
        let summary = StatusSummary::from_state(&state);
        assert_eq!(summary.total_tasks, 3);
        assert_eq!(summary.by_status["complete"], 1);
        assert_eq!(summary.failed_tasks, vec!["T2".to_string()]);
        assert_eq!(summary.ready_tasks, vec!["T3".to_string()]);
        assert_eq!(summary.progress, "1/3");
    }

    #[test]
    fn validate_state_flags_problems() {
        let mut state = DecompositionState::new("");
        state.version = "1.0".into();
        state
            .tasks
            .insert("T1".into(), TaskRecord::new("T2", "mismatch", 1));
        state.execution.active_tasks.push("T9".into());
        let problems = validate_state(&state);
        assert_eq!(problems.len(), 4);
    }

    #[test]
    fn register_artifact_records_validity() {
        let (_dir, store) = make_store();
        store.init("/work/app").unwrap();
        fs::write(
            store.artifacts_dir().join("capability-map.json"),
            r#"{"domains": []}"#,
        )
        .unwrap();
        fs::write(store.artifacts_dir().join("physical-map.json"), r#"{"nope": 1}"#).unwrap();

        let good = store
            .register_artifact(ArtifactKind::CapabilityMap, None, None)
            .unwrap();
        assert!(good.valid);
        assert_eq!(good.path, "artifacts/capability-map.json");

        let bad = store
            .register_artifact(ArtifactKind::PhysicalMap, None, None)
            .unwrap();
        assert!(!bad.valid);
        assert!(bad.error.unwrap().contains("file_mapping"));

        let state = store.load().unwrap();
        assert!(state.artifacts.is_valid(ArtifactKind::CapabilityMap));
        assert!(!state.artifacts.is_valid(ArtifactKind::PhysicalMap));
    }

    #[test]
    fn register_missing_artifact_is_not_found() {
        let (_dir, store) = make_store();
        store.init("/work/app").unwrap();
        let err = store
            .register_artifact(ArtifactKind::CapabilityMap, None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            TaskforgeError::NotFound {
                kind: ResourceKind::Artifact,
                ..
            }
        ));
    }

    #[test]
    fn log_tokens_accumulates() {
        let (_dir, store) = make_store();
        store.init("/work/app").unwrap();
        insert(&store, vec![TaskRecord::new("T1", "one", 1)]);
        store.log_tokens("T1", 100, 50, 0.25, Some("model-x")).unwrap();
        store.log_tokens("T1", 10, 5, 0.05, None).unwrap();
        let state = store.load().unwrap();
        assert_eq!(state.execution.total_tokens, 165);
        assert!((state.execution.total_cost_usd - 0.30).abs() < 1e-9);
        assert!(store.log_tokens("T9", 1, 1, 0.0, None).is_err());
    }
}
