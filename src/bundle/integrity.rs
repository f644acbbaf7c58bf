//! Drift detection between a bundle and the files it was built from.

use serde::Serialize;
use tracing::warn;

use super::bundle_path;
use super::generator::BundleGenerator;
use crate::errors::{Result, TaskforgeError};
use crate::util::checksum_file;

/// A non-empty report blocks execution start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_files: Vec<String>,
    /// Changed dependency files, and changed inputs as `artifact:<name>`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_files: Vec<String>,
}

impl BundleGenerator {
    /// Recompute every checksum recorded in the bundle and report paths that
    /// changed or no longer exist.
    pub fn validate_integrity(&self, task_id: &str) -> Result<IntegrityReport> {
        let bundle = self.load(task_id)?;
        let mut report = IntegrityReport::default();

        // Files absent at generation time carry no checksum and are not drift.
        for file in &bundle.dependencies.files {
            let Some(expected) = bundle.checksums.dependency_files.get(file) else {
                continue;
            };
            let path = Self::target_path(&bundle, file);
            if !path.exists() {
                report.missing_files.push(file.clone());
            } else if checksum_file(&path).as_ref() != Some(expected) {
                report.changed_files.push(file.clone());
            }
        }

        let recorded = &bundle.checksums.artifacts;
        let current = self.current_artifact_checksums(task_id);
        for (name, expected, now) in [
            ("capability_map", &recorded.capability_map, &current.capability_map),
            ("physical_map", &recorded.physical_map, &current.physical_map),
            ("constraints", &recorded.constraints, &current.constraints),
            ("task_definition", &recorded.task_definition, &current.task_definition),
        ] {
            if expected.is_some() && expected != now {
                report.changed_files.push(format!("artifact:{}", name));
            }
        }

        report.valid = report.missing_files.is_empty() && report.changed_files.is_empty();
        if !report.valid {
            warn!(
                task_id,
                missing = report.missing_files.len(),
                changed = report.changed_files.len(),
                "bundle drift detected"
            );
        }
        Ok(report)
    }

    /// Refuse to go on when the task's bundle has drifted. A task without a
    /// bundle passes.
    pub fn ensure_intact(&self, task_id: &str) -> Result<()> {
        if !bundle_path(&self.bundles_dir(), task_id).exists() {
            return Ok(());
        }
        let report = self.validate_integrity(task_id)?;
        if report.valid {
            return Ok(());
        }
        let violations = report
            .missing_files
            .iter()
            .map(|f| format!("missing: {}", f))
            .chain(report.changed_files.iter().map(|f| format!("changed: {}", f)))
            .collect();
        Err(TaskforgeError::validation(
            format!("bundle for {} is stale; regenerate it", task_id),
            violations,
        ))
    }
}
