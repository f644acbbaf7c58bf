//! Execution bundles: everything one task needs, packaged for an isolated
//! worker.
//!
//! ## Architecture
//!
//! 1. **Generator** - Joins the task definition with the capability and
//!    physical maps, dependency outputs and constraints, then writes
//!    `bundles/<ID>-bundle.json`
//! 2. **Integrity** - Recomputes checksums recorded at generation time and
//!    reports drift or missing files
//! 3. **Result** - Reads and annotates the worker's `<ID>-result.json`

mod constraints;
mod generator;
mod integrity;
mod result;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use constraints::{Constraints, parse_constraints};
pub use generator::{BundleGenerator, GenerateReport};
pub use integrity::IntegrityReport;
pub use result::{ResultFiles, ResultGit, TaskResult, attach_git, load_result, result_path};

use crate::planning::{AcceptanceCriterion, FileMapping, SpecRef, StateMachineCoverage};

pub const BUNDLE_VERSION: &str = "1.3";

pub fn bundle_path(bundles_dir: &Path, task_id: &str) -> PathBuf {
    bundles_dir.join(format!("{}-bundle.json", task_id))
}

/// A capability-map behavior expanded into the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behavior {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleContext {
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

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub tasks: Vec<String>,
    /// Files created by completed dependency tasks.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub external: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChecksums {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    #[serde(default)]
    pub artifacts: ArtifactChecksums,
    /// Dependency file, as listed in `dependencies.files`, to its checksum.
    /// Files absent at generation time have no entry.
    #[serde(default)]
    pub dependency_files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub version: String,
    pub bundle_created_at: chrono::DateTime<chrono::Utc>,
    pub task_id: String,
    pub name: String,
    pub phase: u32,
    pub target_dir: String,
    #[serde(default)]
    pub context: BundleContext,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    #[serde(default)]
    pub files: Vec<FileMapping>,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_machine: Option<StateMachineCoverage>,
    #[serde(default)]
    pub checksums: Checksums,
}

/// Summary line for `bundle list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleInfo {
    pub task_id: String,
    pub name: String,
    pub phase: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub file_path: PathBuf,
}
