use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::constraints::{Constraints, parse_constraints};
use super::{
    ArtifactChecksums, BUNDLE_VERSION, Behavior, Bundle, BundleContext, BundleInfo, Checksums,
    Dependencies, bundle_path,
};
use crate::errors::{ResourceKind, Result, TaskforgeError};
use crate::planning::{
    CapabilityMap, FileMapping, PhysicalMap, TaskDefinition, definition_path, load_definition,
};
use crate::schema::{SchemaName, SchemaRegistry, SchemaReport};
use crate::state::persist::{atomic_write_json, read_json};
use crate::state::{ArtifactKind, DecompositionState, StateStore, TaskStatus, ready_tasks};
use crate::util::{checksum_file, resolve_target_path};

/// Outcome of generating bundles for the whole ready set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerateReport {
    pub generated: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

impl GenerateReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Builds and manages bundles for one planning directory.
#[derive(Debug, Clone)]
pub struct BundleGenerator {
    store: StateStore,
    schemas: Option<Arc<SchemaRegistry>>,
}

impl BundleGenerator {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            schemas: None,
        }
    }

    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.store.bundles_dir()
    }

    fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        self.store.planning_dir().join(kind.default_path())
    }

    fn constraints_path(&self) -> PathBuf {
        self.store.inputs_dir().join("constraints.md")
    }

    /// Assemble and write the bundle for one task.
    pub fn generate(&self, task_id: &str) -> Result<Bundle> {
        let state = self.store.load()?;
        self.generate_with_state(&state, task_id)
    }

    fn generate_with_state(&self, state: &DecompositionState, task_id: &str) -> Result<Bundle> {
        if !state.tasks.contains_key(task_id) {
            return Err(TaskforgeError::not_found(ResourceKind::Task, task_id));
        }
        let def = load_definition(&self.store.tasks_dir(), task_id)?;
        let capability_map = CapabilityMap::load(&self.artifact_path(ArtifactKind::CapabilityMap))?;
        let physical_map = PhysicalMap::load(&self.artifact_path(ArtifactKind::PhysicalMap))?;
        let constraints = self.load_constraints()?;

        let target_dir = PathBuf::from(&state.target_dir);
        let dependency_files = dependency_files(state, &def);
        let checksums = Checksums {
            artifacts: self.artifact_checksums(task_id),
            dependency_files: dependency_files
                .iter()
                .filter_map(|f| {
                    checksum_file(&resolve_target_path(&target_dir, f)).map(|c| (f.clone(), c))
                })
                .collect(),
        };

        let bundle = Bundle {
            version: BUNDLE_VERSION.to_string(),
            bundle_created_at: Utc::now(),
            task_id: task_id.to_string(),
            name: def.name.clone(),
            phase: def.phase,
            target_dir: state.target_dir.clone(),
            context: build_context(&def, &capability_map),
            behaviors: expand_behaviors(&def, &capability_map),
            files: collect_files(&def, &physical_map),
            dependencies: Dependencies {
                tasks: def.depends_on.clone(),
                files: dependency_files,
                external: def.external.clone(),
            },
            acceptance_criteria: def.acceptance_criteria.clone(),
            constraints,
            state_machine: def.state_machine.clone(),
            checksums,
        };

        atomic_write_json(&bundle_path(&self.bundles_dir(), task_id), &bundle)?;
        info!(
            task_id,
            behaviors = bundle.behaviors.len(),
            files = bundle.files.len(),
            "bundle generated"
        );
        Ok(bundle)
    }

    fn load_constraints(&self) -> Result<Constraints> {
        let path = self.constraints_path();
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(parse_constraints(&raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Constraints::default()),
            Err(e) => Err(TaskforgeError::io(&path, e)),
        }
    }

    fn artifact_checksums(&self, task_id: &str) -> ArtifactChecksums {
        ArtifactChecksums {
            capability_map: checksum_file(&self.artifact_path(ArtifactKind::CapabilityMap)),
            physical_map: checksum_file(&self.artifact_path(ArtifactKind::PhysicalMap)),
            constraints: checksum_file(&self.constraints_path()),
            task_definition: checksum_file(&definition_path(&self.store.tasks_dir(), task_id)),
        }
    }

    /// Generate bundles for every ready task on a bounded worker pool.
    ///
    /// Workers only read the store and write their own bundle file. One
    /// task's failure is recorded and does not stop the others.
    pub async fn generate_ready(&self, max_workers: usize) -> Result<GenerateReport> {
        let state = Arc::new(self.store.load()?);
        let ready: Vec<String> = ready_tasks(&state).iter().map(|t| t.id.clone()).collect();
        if ready.is_empty() {
            return Ok(GenerateReport::default());
        }

        let workers = worker_count(max_workers);
        debug!(tasks = ready.len(), workers, "generating ready bundles");
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut handles = Vec::with_capacity(ready.len());
        for task_id in &ready {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| TaskforgeError::Other(e.into()))?;
            let generator = self.clone();
            let state = Arc::clone(&state);
            let task_id = task_id.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                generator.generate_with_state(&state, &task_id)
            }));
        }

        let mut report = GenerateReport::default();
        for (task_id, joined) in ready.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(_)) => report.generated.push(task_id),
                Ok(Err(e)) => {
                    warn!(task_id = %task_id, error = %e, "bundle generation failed");
                    report.failed.insert(task_id, e.to_string());
                }
                Err(e) => {
                    report
                        .failed
                        .insert(task_id, format!("worker panicked: {}", e));
                }
            }
        }
        info!(
            generated = report.generated.len(),
            failed = report.failed.len(),
            "ready bundles generated"
        );
        Ok(report)
    }

    pub fn load(&self, task_id: &str) -> Result<Bundle> {
        let path = bundle_path(&self.bundles_dir(), task_id);
        if !path.exists() {
            return Err(TaskforgeError::not_found(
                ResourceKind::Bundle,
                path.display().to_string(),
            ));
        }
        read_json(&path, ResourceKind::Bundle)
    }

    /// Validate a written bundle against `execution-bundle.schema.json`.
    pub fn validate(&self, task_id: &str) -> Result<SchemaReport> {
        let path = bundle_path(&self.bundles_dir(), task_id);
        if !path.exists() {
            return Err(TaskforgeError::not_found(
                ResourceKind::Bundle,
                path.display().to_string(),
            ));
        }
        let schemas = self.schemas.as_ref().ok_or_else(|| TaskforgeError::ConfigMissing {
            key: "schema_dir".to_string(),
        })?;
        schemas.validate_file(SchemaName::ExecutionBundle, &path)
    }

    /// Every readable bundle, sorted by task ID.
    pub fn list(&self) -> Result<Vec<BundleInfo>> {
        let mut bundles = Vec::new();
        for (task_id, path) in self.bundle_files()? {
            match self.load(&task_id) {
                Ok(bundle) => bundles.push(BundleInfo {
                    task_id: bundle.task_id,
                    name: bundle.name,
                    phase: bundle.phase,
                    created_at: bundle.bundle_created_at,
                    file_path: path,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable bundle"),
            }
        }
        bundles.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(bundles)
    }

    /// Delete every bundle file. Result documents are kept.
    pub fn clean(&self) -> Result<usize> {
        let mut removed = 0;
        for (_, path) in self.bundle_files()? {
            std::fs::remove_file(&path).map_err(|e| TaskforgeError::io(&path, e))?;
            removed += 1;
        }
        info!(removed, "bundles cleaned");
        Ok(removed)
    }

    fn bundle_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.bundles_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TaskforgeError::io(&dir, e)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TaskforgeError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(task_id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix("-bundle.json"))
            {
                files.push((task_id.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }

    pub(super) fn current_artifact_checksums(&self, task_id: &str) -> ArtifactChecksums {
        self.artifact_checksums(task_id)
    }

    pub(super) fn target_path(bundle: &Bundle, file: &str) -> PathBuf {
        resolve_target_path(Path::new(&bundle.target_dir), file)
    }
}

/// `min(available_parallelism, cap)`, and at least one.
fn worker_count(cap: usize) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    available.min(cap).max(1)
}

/// Files created by dependencies that have completed, in dependency order.
fn dependency_files(state: &DecompositionState, def: &TaskDefinition) -> Vec<String> {
    let mut seen = BTreeSet::new();
    def.depends_on
        .iter()
        .filter_map(|dep| state.tasks.get(dep))
        .filter(|dep| dep.status == TaskStatus::Complete)
        .flat_map(|dep| dep.files.created.iter())
        .filter(|f| !f.is_empty() && seen.insert(f.as_str()))
        .cloned()
        .collect()
}

fn expand_behaviors(def: &TaskDefinition, map: &CapabilityMap) -> Vec<Behavior> {
    let index = map.behavior_index();
    def.behaviors
        .iter()
        .map(|id| match index.get(id.as_str()) {
            Some(loc) => Behavior {
                id: loc.behavior.id.clone(),
                name: loc.behavior.name.clone(),
                kind: loc.behavior.kind.clone(),
                description: loc.behavior.description.clone(),
            },
            None => Behavior {
                id: id.clone(),
                name: format!("Unknown behavior {}", id),
                kind: "process".to_string(),
                description: String::new(),
            },
        })
        .collect()
}

/// The task's own files first, then the physical map's files and tests for
/// each behavior. The first mapping of a path wins.
fn collect_files(def: &TaskDefinition, map: &PhysicalMap) -> Vec<FileMapping> {
    let mut seen = BTreeSet::new();
    let mut files = Vec::new();

    for file in &def.files {
        if !file.path.is_empty() && seen.insert(file.path.clone()) {
            files.push(file.clone());
        }
    }
    for behavior_id in &def.behaviors {
        for mapping in map.for_behavior(behavior_id) {
            for file in &mapping.files {
                if !file.path.is_empty() && seen.insert(file.path.clone()) {
                    let mut file = file.clone();
                    file.behaviors = vec![behavior_id.clone()];
                    files.push(file);
                }
            }
            for test in &mapping.tests {
                if !test.path.is_empty() && seen.insert(test.path.clone()) {
                    let mut test = test.clone();
                    test.layer = "test".to_string();
                    test.behaviors = vec![behavior_id.clone()];
                    files.push(test);
                }
            }
        }
    }
    files
}

/// Context from the definition, or from where its first behavior sits in
/// the capability map when the definition names no domain.
fn build_context(def: &TaskDefinition, map: &CapabilityMap) -> BundleContext {
    let mut ctx = match &def.context {
        Some(c) => BundleContext {
            domain: c.domain.clone(),
            capability: c.capability.clone(),
            capability_id: c.capability_id.clone(),
            spec_ref: c.spec_ref.clone(),
            steel_thread: c.steel_thread,
        },
        None => BundleContext::default(),
    };
    ctx.steel_thread = def.is_steel_thread();

    let index = map.behavior_index();
    if ctx.domain.is_empty()
        && let Some(first) = def.behaviors.first()
        && let Some(loc) = index.get(first.as_str())
    {
        ctx.domain = loc.domain.name.clone();
        ctx.capability = loc.capability.name.clone();
        ctx.capability_id = loc.capability.id.clone();
        ctx.spec_ref = loc.capability.spec_ref.clone();
    }
    ctx
}
