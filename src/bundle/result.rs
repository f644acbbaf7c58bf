//! Result documents written by the executing worker (`<ID>-result.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::checkpoint::TaskOutcome;
use crate::errors::{ResourceKind, Result, TaskforgeError};
use crate::state::persist::{atomic_write_json, read_json};
use crate::state::{FailureCategory, TaskFiles};

pub fn result_path(bundles_dir: &Path, task_id: &str) -> PathBuf {
    bundles_dir.join(format!("{}-result.json", task_id))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFiles {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified: Vec<String>,
}

impl ResultFiles {
    pub fn to_task_files(&self) -> TaskFiles {
        TaskFiles {
            created: self.created.iter().filter(|f| !f.is_empty()).cloned().collect(),
            modified: self.modified.iter().filter(|f| !f.is_empty()).cloned().collect(),
        }
    }
}

/// Commit metadata attached after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultGit {
    pub committed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_by: Option<String>,
}

/// Fields the core reads from a result document. Anything else the worker
/// wrote is kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub files: ResultFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<ResultGit>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskResult {
    /// The final outcome, when `status` names one.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.status.parse().ok()
    }

    /// Reported failure category, `unknown` when absent or unrecognised.
    pub fn failure_category(&self) -> FailureCategory {
        self.failure_category
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or_default()
    }

    /// Created then modified, skipping blanks.
    pub fn all_files(&self) -> Vec<String> {
        self.files
            .created
            .iter()
            .chain(self.files.modified.iter())
            .filter(|f| !f.is_empty())
            .cloned()
            .collect()
    }
}

pub fn load_result(bundles_dir: &Path, task_id: &str) -> Result<TaskResult> {
    let path = result_path(bundles_dir, task_id);
    if !path.exists() {
        return Err(TaskforgeError::not_found(
            ResourceKind::Result,
            path.display().to_string(),
        ));
    }
    read_json(&path, ResourceKind::Result)
}

/// Record commit metadata on a result document.
pub fn attach_git(bundles_dir: &Path, task_id: &str, sha: &str, message: &str) -> Result<TaskResult> {
    if sha.trim().is_empty() {
        return Err(TaskforgeError::validation("commit sha is empty", Vec::new()));
    }
    let mut result = load_result(bundles_dir, task_id)?;
    result.git = Some(ResultGit {
        committed: true,
        commit_sha: Some(sha.to_string()),
        commit_message: Some(message.to_string()),
        committed_by: Some("hook".to_string()),
    });
    atomic_write_json(&result_path(bundles_dir, task_id), &result)?;
    info!(task_id, sha, "commit attached to result");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn attach_git_keeps_unknown_fields() {
        let dir = tempdir().unwrap();
        fs::write(
            result_path(dir.path(), "T1"),
            json!({
                "version": "1.0",
                "task_id": "T1",
                "status": "success",
                "files": { "created": ["src/a.rs", ""], "modified": ["Cargo.toml"] },
                "verification": { "verdict": "PASS" }
            })
            .to_string(),
        )
        .unwrap();

        let result = attach_git(dir.path(), "T1", "abc123", "feat: add a").unwrap();
        assert_eq!(result.all_files(), vec!["src/a.rs", "Cargo.toml"]);
        assert_eq!(result.outcome(), Some(TaskOutcome::Completed));

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(result_path(dir.path(), "T1")).unwrap())
                .unwrap();
        assert_eq!(raw["git"]["commit_sha"], "abc123");
        assert_eq!(raw["verification"]["verdict"], "PASS");
    }

    #[test]
    fn missing_result_is_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_result(dir.path(), "T1").unwrap_err(),
            TaskforgeError::NotFound {
                kind: ResourceKind::Result,
                ..
            }
        ));
    }

    #[test]
    fn failure_category_falls_back_to_unknown() {
        let result: TaskResult = serde_json::from_value(json!({
            "task_id": "T1", "status": "failed", "failure_category": "cosmic-rays"
        }))
        .unwrap();
        assert_eq!(result.failure_category(), FailureCategory::Unknown);
        assert_eq!(result.outcome(), Some(TaskOutcome::Failed));
    }
}
