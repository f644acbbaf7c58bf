//! JSON Schema validation for planning documents.
//!
//! Schemas are read from a configured directory by file name and compiled
//! once per registry (draft 7).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use jsonschema::{Draft, JSONSchema};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{ResourceKind, Result, TaskforgeError};
use crate::state::ArtifactKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaName {
    State,
    CapabilityMap,
    PhysicalMap,
    Task,
    TaskResult,
    ExecutionBundle,
    Checkpoint,
}

impl SchemaName {
    pub const ALL: [SchemaName; 7] = [
        SchemaName::State,
        SchemaName::CapabilityMap,
        SchemaName::PhysicalMap,
        SchemaName::Task,
        SchemaName::TaskResult,
        SchemaName::ExecutionBundle,
        SchemaName::Checkpoint,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            SchemaName::State => "state.schema.json",
            SchemaName::CapabilityMap => "capability-map.schema.json",
            SchemaName::PhysicalMap => "physical-map.schema.json",
            SchemaName::Task => "task.schema.json",
            SchemaName::TaskResult => "task-result.schema.json",
            SchemaName::ExecutionBundle => "execution-bundle.schema.json",
            SchemaName::Checkpoint => "orchestrator-checkpoint.schema.json",
        }
    }

    pub fn for_artifact(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::CapabilityMap => SchemaName::CapabilityMap,
            ArtifactKind::PhysicalMap => SchemaName::PhysicalMap,
        }
    }
}

impl std::fmt::Display for SchemaName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Compiled schemas from one directory.
pub struct SchemaRegistry {
    dir: PathBuf,
    cache: Mutex<HashMap<SchemaName, Arc<JSONSchema>>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl SchemaRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn compiled(&self, name: SchemaName) -> Result<Arc<JSONSchema>> {
        if let Ok(cache) = self.cache.lock()
            && let Some(schema) = cache.get(&name)
        {
            return Ok(Arc::clone(schema));
        }

        let path = self.dir.join(name.file_name());
        if !path.is_file() {
            return Err(TaskforgeError::SchemaNotFound {
                name: name.file_name().to_string(),
            });
        }
        let text = std::fs::read_to_string(&path).map_err(|e| TaskforgeError::io(&path, e))?;
        let raw: Value =
            serde_json::from_str(&text).map_err(|e| TaskforgeError::SchemaCompileFailed {
                name: name.file_name().to_string(),
                message: e.to_string(),
            })?;
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&raw)
            .map_err(|e| TaskforgeError::SchemaCompileFailed {
                name: name.file_name().to_string(),
                message: e.to_string(),
            })?;
        debug!(schema = %name, "schema compiled");

        let schema = Arc::new(schema);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name, Arc::clone(&schema));
        }
        Ok(schema)
    }

    /// Validate a document. Schema violations are reported, not returned as
    /// errors; a missing or broken schema is an error.
    pub fn validate(&self, name: SchemaName, instance: &Value) -> Result<SchemaReport> {
        let schema = self.compiled(name)?;
        let report = match schema.validate(instance) {
            Ok(()) => SchemaReport {
                valid: true,
                errors: Vec::new(),
            },
            Err(errors) => SchemaReport {
                valid: false,
                errors: errors
                    .map(|e| {
                        let path = e.instance_path.to_string();
                        if path.is_empty() {
                            e.to_string()
                        } else {
                            format!("{}: {}", path, e)
                        }
                    })
                    .collect(),
            },
        };
        Ok(report)
    }

    pub fn validate_file(&self, name: SchemaName, path: &Path) -> Result<SchemaReport> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TaskforgeError::not_found(
                    ResourceKind::Schema,
                    path.display().to_string(),
                ));
            }
            Err(e) => return Err(TaskforgeError::io(path, e)),
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => self.validate(name, &value),
            Err(e) => Ok(SchemaReport {
                valid: false,
                errors: vec![format!("invalid JSON: {}", e)],
            }),
        }
    }
}
