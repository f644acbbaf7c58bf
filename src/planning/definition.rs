//! Task definition documents (`tasks/<ID>.json`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{ResourceKind, Result, TaskforgeError};
use crate::state::TaskRecord;
use crate::state::persist::read_json;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    pub path: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub layer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behaviors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub criterion: String,
    #[serde(default)]
    pub verification: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quote: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub capability: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub capability_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_ref: Option<SpecRef>,
    #[serde(default)]
    pub steel_thread: bool,
}

/// State-machine coverage a task claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineCoverage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions_covered: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guards_enforced: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states_reached: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phase: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub steel_thread: bool,
    #[serde(default)]
    pub behaviors: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileMapping>,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub external: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<TaskContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_machine: Option<StateMachineCoverage>,
}

impl TaskDefinition {
    /// Steel-thread membership from either the top-level flag or the context.
    pub fn is_steel_thread(&self) -> bool {
        self.steel_thread || self.context.as_ref().is_some_and(|c| c.steel_thread)
    }

    /// Fresh pending record for the store.
    pub fn to_record(&self, file: Option<String>) -> TaskRecord {
        let mut record = TaskRecord::new(&self.id, &self.name, self.phase);
        record.depends_on = self.depends_on.clone();
        record.blocks = self.blocks.clone();
        record.steel_thread = self.is_steel_thread();
        record.file = file;
        record
    }
}

pub fn definition_path(tasks_dir: &Path, task_id: &str) -> PathBuf {
    tasks_dir.join(format!("{}.json", task_id))
}

/// Load one task definition by ID.
pub fn load_definition(tasks_dir: &Path, task_id: &str) -> Result<TaskDefinition> {
    let path = definition_path(tasks_dir, task_id);
    let mut def: TaskDefinition = read_json(&path, ResourceKind::Task)?;
    if def.id.is_empty() {
        def.id = task_id.to_string();
    }
    Ok(def)
}

/// Load every `*.json` definition in `tasks_dir`, sorted by ID.
///
/// A missing directory yields an empty list. A file without an `id` is a
/// validation error naming the file.
pub fn load_definitions(tasks_dir: &Path) -> Result<Vec<(PathBuf, TaskDefinition)>> {
    let entries = match fs::read_dir(tasks_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TaskforgeError::io(tasks_dir, e)),
    };

    let mut defs = Vec::new();
    let mut missing_ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TaskforgeError::io(tasks_dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
            continue;
        }
        let def: TaskDefinition = read_json(&path, ResourceKind::Task)?;
        if def.id.trim().is_empty() {
            missing_ids.push(path.display().to_string());
            continue;
        }
        defs.push((path, def));
    }

    if !missing_ids.is_empty() {
        return Err(TaskforgeError::validation(
            "task definitions without an id",
            missing_ids,
        ));
    }

    defs.sort_by(|a, b| a.1.id.cmp(&b.1.id));
    Ok(defs)
}
