//! Salvage a state document that no longer parses or validates.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::persist::{DocumentLock, LockMode, atomic_write_bytes, atomic_write_json};
use super::phase::Phase;
use super::store::{StateStore, validate_state};
use super::types::{
    DecompositionState, EventKind, STATE_VERSION, TaskFiles, TaskRecord, TaskStatus,
};
use crate::errors::{ResourceKind, Result, TaskforgeError};
use crate::planning;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateRecovery {
    /// False when the document was healthy and left untouched.
    pub recovered: bool,
    pub tasks_recovered: usize,
    pub data_lost: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

impl StateStore {
    /// Rebuild `state.json` from whatever can still be read.
    ///
    /// The original bytes are copied to `state.json.corrupted.<timestamp>`
    /// first. Task definitions on disk fill in tasks the document lost, and
    /// the execution counters are recomputed from the surviving records.
    /// `fallback_target_dir` stands in when the document no longer names one.
    pub fn recover_state(&self, fallback_target_dir: Option<&str>) -> Result<StateRecovery> {
        let path = self.state_path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.lock_timeout())?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TaskforgeError::not_found(
                    ResourceKind::State,
                    path.display().to_string(),
                ));
            }
            Err(e) => return Err(TaskforgeError::io(&path, e)),
        };

        if let Ok(state) = serde_json::from_slice::<DecompositionState>(&bytes)
            && validate_state(&state).is_empty()
        {
            return Ok(StateRecovery::default());
        }

        let (mut state, mut data_lost) = match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => salvage(&map),
            _ => (
                DecompositionState::new(""),
                vec!["entire state (JSON parse failed)".to_string()],
            ),
        };
        if state.target_dir.trim().is_empty() {
            match fallback_target_dir.filter(|dir| !dir.trim().is_empty()) {
                Some(dir) => state.target_dir = dir.to_string(),
                None => {
                    return Err(TaskforgeError::ConfigMissing {
                        key: "target_dir".to_string(),
                    });
                }
            }
        }

        let backup = PathBuf::from(format!(
            "{}.corrupted.{}",
            path.display(),
            Utc::now().format("%Y%m%d-%H%M%S")
        ));
        atomic_write_bytes(&backup, &bytes)?;
        warn!(backup = %backup.display(), "state document is corrupt, backed up");

        match planning::load_definitions(&self.tasks_dir()) {
            Ok(defs) => {
                for (def_path, def) in defs {
                    if state.tasks.contains_key(&def.id) {
                        continue;
                    }
                    let rel = def_path
                        .strip_prefix(self.planning_dir())
                        .unwrap_or(&def_path)
                        .display()
                        .to_string();
                    state.tasks.insert(def.id.clone(), def.to_record(Some(rel)));
                }
            }
            Err(err) => {
                warn!(error = %err, "task definitions could not be re-merged");
                data_lost.push("task definitions (unreadable)".to_string());
            }
        }

        state.recalculate_execution();
        state.record_event(
            EventKind::StateRecovered,
            None,
            Some(json!({
                "reason": "corrupted state file",
                "backup": backup.display().to_string(),
                "data_lost": data_lost,
            })),
        );
        state.updated_at = Utc::now();
        atomic_write_json(&path, &state)?;

        info!(tasks = state.tasks.len(), lost = data_lost.len(), "state recovered");
        Ok(StateRecovery {
            recovered: true,
            tasks_recovered: state.tasks.len(),
            data_lost,
            backup_path: Some(backup),
        })
    }
}

fn salvage(doc: &Map<String, Value>) -> (DecompositionState, Vec<String>) {
    let mut lost = Vec::new();
    let mut state = DecompositionState::new("");

    match doc.get("version").and_then(Value::as_str) {
        Some(STATE_VERSION) => {}
        _ => lost.push("version (invalid or missing)".to_string()),
    }

    match doc.get("target_dir").and_then(Value::as_str) {
        Some(dir) if !dir.is_empty() => state.target_dir = dir.to_string(),
        _ => lost.push("target_dir".to_string()),
    }

    match doc.get("created_at").and_then(as_timestamp) {
        Some(ts) => state.created_at = ts,
        None => lost.push("created_at (using current time)".to_string()),
    }

    match doc.get("phase").and_then(Value::as_object) {
        Some(phase) => {
            match phase.get("current").and_then(as_phase) {
                Some(current) => state.phase.current = current,
                None => lost.push("phase.current (invalid)".to_string()),
            }
            if let Some(completed) = phase.get("completed").and_then(Value::as_array) {
                state.phase.completed = completed
                    .iter()
                    .filter_map(as_phase)
                    .filter(|p| *p < state.phase.current)
                    .collect();
            }
        }
        None => lost.push("phase".to_string()),
    }

    match doc.get("tasks").and_then(Value::as_object) {
        Some(tasks) => {
            for (id, raw) in tasks {
                match raw.as_object() {
                    Some(fields) => {
                        let (task, task_lost) = salvage_task(id, fields);
                        lost.extend(task_lost);
                        state.tasks.insert(id.clone(), task);
                    }
                    None => lost.push(format!("task {}: not an object", id)),
                }
            }
        }
        None => lost.push("tasks".to_string()),
    }

    if let Some(execution) = doc.get("execution").and_then(Value::as_object) {
        if let Some(tokens) = execution.get("total_tokens").and_then(Value::as_u64) {
            state.execution.total_tokens = tokens;
        }
        if let Some(cost) = execution.get("total_cost_usd").and_then(Value::as_f64) {
            state.execution.total_cost_usd = cost;
        }
    } else {
        lost.push("execution".to_string());
    }

    if let Some(artifacts) = doc.get("artifacts") {
        match serde_json::from_value(artifacts.clone()) {
            Ok(a) => state.artifacts = a,
            Err(_) => lost.push("artifacts".to_string()),
        }
    }
    if let Some(halt) = doc.get("halt") {
        match serde_json::from_value(halt.clone()) {
            Ok(h) => state.halt = h,
            Err(_) => lost.push("halt".to_string()),
        }
    }
    if let Some(events) = doc.get("events").and_then(Value::as_array) {
        let before = events.len();
        state.events = events
            .iter()
            .filter_map(|e| serde_json::from_value(e.clone()).ok())
            .collect();
        if state.events.len() < before {
            lost.push(format!("events ({} unreadable)", before - state.events.len()));
        }
    }

    (state, lost)
}

fn salvage_task(id: &str, fields: &Map<String, Value>) -> (TaskRecord, Vec<String>) {
    let mut lost = Vec::new();
    let mut task = TaskRecord::new(
        id,
        fields.get("name").and_then(Value::as_str).unwrap_or_default(),
        fields
            .get("phase")
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or(0),
    );

    match fields.get("status") {
        Some(raw) => match raw.as_str().and_then(|s| s.parse::<TaskStatus>().ok()) {
            Some(status) => task.status = status,
            None => lost.push(format!("task {}: invalid status", id)),
        },
        None => lost.push(format!("task {}: status", id)),
    }

    task.depends_on = strings(fields.get("depends_on"));
    task.blocks = strings(fields.get("blocks"));
    task.steel_thread = fields
        .get("steel_thread")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    task.attempts = fields
        .get("attempts")
        .and_then(Value::as_u64)
        .and_then(|a| u32::try_from(a).ok())
        .unwrap_or(0);
    task.file = fields.get("file").and_then(Value::as_str).map(str::to_string);
    task.started_at = fields.get("started_at").and_then(as_timestamp);
    task.completed_at = fields.get("completed_at").and_then(as_timestamp);
    task.duration_seconds = fields.get("duration_seconds").and_then(Value::as_f64);
    task.skip_reason = fields
        .get("skip_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    task.blocked_by = fields
        .get("blocked_by")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(files) = fields.get("files") {
        task.files = serde_json::from_value::<TaskFiles>(files.clone()).unwrap_or_else(|_| {
            lost.push(format!("task {}: files", id));
            TaskFiles::default()
        });
    }
    if let Some(failure) = fields.get("failure") {
        task.failure = serde_json::from_value(failure.clone()).ok();
        if task.failure.is_none() {
            lost.push(format!("task {}: failure", id));
        }
    }
    if let Some(verification) = fields.get("verification") {
        task.verification = serde_json::from_value(verification.clone()).ok();
        if task.verification.is_none() {
            lost.push(format!("task {}: verification", id));
        }
    }
    if let Some(calibration) = fields.get("calibration") {
        task.calibration = serde_json::from_value(calibration.clone()).ok();
        if task.calibration.is_none() {
            lost.push(format!("task {}: calibration", id));
        }
    }

    (task, lost)
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

fn as_phase(value: &Value) -> Option<Phase> {
    value.as_str().and_then(|s| s.parse().ok())
}
