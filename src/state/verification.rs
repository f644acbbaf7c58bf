//! Verifier verdicts and calibration of those verdicts against outcomes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::persist::{DocumentLock, LockMode, atomic_write_json, read_json};
use super::store::StateStore;
use super::types::{
    Calibration, CalibrationOutcome, CriterionCheck, EventKind, Recommendation, TaskStatus,
    Verification, VerificationVerdict,
};
use crate::errors::{ResourceKind, Result, TaskforgeError};

pub const CALIBRATION_FILE: &str = "calibration.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub task_id: String,
    pub verdict: VerificationVerdict,
    pub recommendation: Recommendation,
    pub actual_outcome: CalibrationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Running history kept in `calibration.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    #[serde(default)]
    pub total_verified: u32,
    #[serde(default)]
    pub correct: u32,
    #[serde(default)]
    pub false_positives: Vec<String>,
    #[serde(default)]
    pub false_negatives: Vec<String>,
    #[serde(default)]
    pub history: Vec<CalibrationEntry>,
}

impl CalibrationData {
    pub fn push(&mut self, entry: CalibrationEntry) {
        self.total_verified += 1;
        match entry.actual_outcome {
            CalibrationOutcome::Correct => self.correct += 1,
            CalibrationOutcome::FalsePositive => self.false_positives.push(entry.task_id.clone()),
            CalibrationOutcome::FalseNegative => self.false_negatives.push(entry.task_id.clone()),
        }
        self.history.push(entry);
    }

    pub fn score(&self) -> CalibrationScore {
        CalibrationScore::new(
            self.correct as usize,
            self.false_positives.len(),
            self.false_negatives.len(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationScore {
    pub score: f64,
    pub total_verified: usize,
    pub correct: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl CalibrationScore {
    /// Fraction of verdicts that matched the outcome; 1.0 with no history.
    pub fn new(correct: usize, false_positives: usize, false_negatives: usize) -> Self {
        let total = correct + false_positives + false_negatives;
        let score = if total == 0 {
            1.0
        } else {
            correct as f64 / total as f64
        };
        Self {
            score,
            total_verified: total,
            correct,
            false_positives,
            false_negatives,
        }
    }
}

impl StateStore {
    pub fn calibration_path(&self) -> PathBuf {
        self.planning_dir().join(CALIBRATION_FILE)
    }

    /// Record a verifier verdict. A `BLOCK` recommendation moves every
    /// pending task listed in the verified task's `blocks` to `blocked`.
    ///
    /// Returns the IDs that were blocked.
    pub fn record_verification(
        &self,
        task_id: &str,
        verdict: VerificationVerdict,
        recommendation: Recommendation,
        criteria: Vec<CriterionCheck>,
    ) -> Result<Vec<String>> {
        let blocked = self.update(|state| {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Task, task_id))?;
            task.verification = Some(Verification {
                verdict,
                recommendation,
                criteria,
                verified_at: Utc::now(),
            });
            let downstream = task.blocks.clone();

            let mut blocked = Vec::new();
            if recommendation == Recommendation::Block {
                for id in &downstream {
                    match state.tasks.get_mut(id) {
                        Some(t) if t.status == TaskStatus::Pending => {
                            t.status = TaskStatus::Blocked;
                            t.blocked_by = Some(task_id.to_string());
                            blocked.push(id.clone());
                        }
                        Some(_) => {}
                        None => warn!(task_id, blocked = %id, "blocks list names an unknown task"),
                    }
                }
                for id in &blocked {
                    state.record_event(
                        EventKind::TaskBlocked,
                        Some(id),
                        Some(json!({
                            "reason": format!("Blocked by verification failure of {}", task_id),
                        })),
                    );
                }
            }

            state.record_event(
                EventKind::VerificationRecorded,
                Some(task_id),
                Some(json!({
                    "verdict": verdict,
                    "recommendation": recommendation,
                    "blocked": blocked,
                })),
            );
            Ok(blocked)
        })?;
        info!(task_id, %verdict, %recommendation, blocked = blocked.len(), "verification recorded");
        Ok(blocked)
    }

    /// Compare a verifier verdict with what actually happened. The task must
    /// have a recorded verification.
    pub fn record_calibration(
        &self,
        task_id: &str,
        outcome: CalibrationOutcome,
        notes: Option<String>,
    ) -> Result<CalibrationEntry> {
        let entry = self.update(|state| {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| TaskforgeError::not_found(ResourceKind::Task, task_id))?;
            let Some(verification) = task.verification.as_ref() else {
                return Err(TaskforgeError::validation(
                    format!("task {} has no verification to calibrate", task_id),
                    Vec::new(),
                ));
            };
            let recorded_at = Utc::now();
            let entry = CalibrationEntry {
                task_id: task_id.to_string(),
                verdict: verification.verdict,
                recommendation: verification.recommendation,
                actual_outcome: outcome,
                notes: notes.clone(),
                recorded_at,
            };
            task.calibration = Some(Calibration {
                outcome,
                notes,
                recorded_at,
            });
            state.record_event(
                EventKind::CalibrationRecorded,
                Some(task_id),
                Some(json!({ "outcome": outcome })),
            );
            Ok(entry)
        })?;

        let path = self.calibration_path();
        let _lock = DocumentLock::acquire(&path, LockMode::Exclusive, self.lock_timeout())?;
        let mut data = self.read_calibration()?;
        data.push(entry.clone());
        atomic_write_json(&path, &data)?;
        info!(task_id, %outcome, "calibration recorded");
        Ok(entry)
    }

    /// Calibration history; empty when nothing has been recorded.
    pub fn calibration(&self) -> Result<CalibrationData> {
        let path = self.calibration_path();
        if !path.exists() {
            return Ok(CalibrationData::default());
        }
        let _lock = DocumentLock::acquire(&path, LockMode::Shared, self.lock_timeout())?;
        self.read_calibration()
    }

    fn read_calibration(&self) -> Result<CalibrationData> {
        let path = self.calibration_path();
        if !path.exists() {
            return Ok(CalibrationData::default());
        }
        read_json(&path, ResourceKind::State)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::TaskRecord;
    use tempfile::{TempDir, tempdir};

    fn make_store() -> (TempDir, StateStore) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("planning"));
        store.init("/work/app").unwrap();
        store
            .update(|s| {
                let mut t1 = TaskRecord::new("T1", "one", 1);
                t1.blocks = vec!["T2".into(), "T3".into()];
                s.tasks.insert("T1".into(), t1);
                s.tasks.insert("T2".into(), TaskRecord::new("T2", "two", 1).with_deps(&["T1"]));
                let mut t3 = TaskRecord::new("T3", "three", 1).with_deps(&["T1"]);
                t3.status = TaskStatus::Skipped;
                s.tasks.insert("T3".into(), t3);
                Ok(())
            })
            .unwrap();
        (dir, store)
    }

    #[test]
    fn block_recommendation_blocks_pending_downstream() {
        let (_dir, store) = make_store();
        let blocked = store
            .record_verification(
                "T1",
                VerificationVerdict::Fail,
                Recommendation::Block,
                vec![CriterionCheck {
                    name: "tests pass".into(),
                    passed: false,
                    evidence: Some("2 failures".into()),
                }],
            )
            .unwrap();
        assert_eq!(blocked, vec!["T2".to_string()]);

        let t2 = store.task("T2").unwrap();
        assert_eq!(t2.status, TaskStatus::Blocked);
        assert_eq!(t2.blocked_by.as_deref(), Some("T1"));
        assert_eq!(store.task("T3").unwrap().status, TaskStatus::Skipped);
    }

    #[test]
    fn proceed_blocks_nothing() {
        let (_dir, store) = make_store();
        let blocked = store
            .record_verification(
                "T1",
                VerificationVerdict::Pass,
                Recommendation::Proceed,
                Vec::new(),
            )
            .unwrap();
        assert!(blocked.is_empty());
        assert!(store.task("T1").unwrap().verification.is_some());
    }

    #[test]
    fn calibration_requires_verification() {
        let (_dir, store) = make_store();
        let err = store
            .record_calibration("T1", CalibrationOutcome::Correct, None)
            .unwrap_err();
        assert!(matches!(err, TaskforgeError::ValidationFailed { .. }));
        assert!(!store.calibration_path().exists());
    }

    #[test]
    fn calibration_history_accumulates() {
        let (_dir, store) = make_store();
        store
            .record_verification(
                "T1",
                VerificationVerdict::Pass,
                Recommendation::Proceed,
                Vec::new(),
            )
            .unwrap();
        store
            .record_calibration("T1", CalibrationOutcome::Correct, None)
            .unwrap();
        store
            .record_calibration(
                "T1",
                CalibrationOutcome::FalsePositive,
                Some("regressed later".into()),
            )
            .unwrap();

        let data = store.calibration().unwrap();
        assert_eq!(data.total_verified, 2);
        assert_eq!(data.correct, 1);
        assert_eq!(data.false_positives, vec!["T1".to_string()]);
        assert_eq!(data.history.len(), 2);
        assert!((data.score().score - 0.5).abs() < f64::EPSILON);

        let record = store.task("T1").unwrap();
        assert_eq!(
            record.calibration.unwrap().outcome,
            CalibrationOutcome::FalsePositive
        );
    }

    #[test]
    fn empty_calibration_scores_one() {
        assert_eq!(CalibrationData::default().score().score, 1.0);
    }
}
