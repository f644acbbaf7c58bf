//! Cooperative halt flag.
//!
//! Halting is advisory: the driver loop calls `check_halt` before spawning the
//! next task. Nothing in the lifecycle refuses `complete` or `fail` because of
//! it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::store::StateStore;
use super::types::{EventKind, HaltInfo, TaskStatus};
use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HaltStatus {
    pub halted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_task: Option<String>,
}

impl From<&HaltInfo> for HaltStatus {
    fn from(halt: &HaltInfo) -> Self {
        Self {
            halted: halt.requested,
            reason: halt.reason.clone(),
            requested_by: halt.requested_by.clone(),
            requested_at: halt.requested_at,
            halted_at: halt.halted_at,
            active_task: halt.active_task.clone(),
        }
    }
}

impl StateStore {
    /// Set the halt flag. Running tasks keep running.
    pub fn request_halt(&self, reason: &str, requested_by: &str) -> Result<HaltStatus> {
        let status = self.update(|state| {
            state.halt = HaltInfo {
                requested: true,
                reason: Some(reason.to_string()),
                requested_by: Some(requested_by.to_string()),
                requested_at: Some(Utc::now()),
                halted_at: None,
                active_task: None,
            };
            state.record_event(
                EventKind::HaltRequested,
                None,
                Some(json!({ "reason": reason, "requested_by": requested_by })),
            );
            Ok(HaltStatus::from(&state.halt))
        })?;
        info!(reason, requested_by, "halt requested");
        Ok(status)
    }

    pub fn check_halt(&self) -> Result<bool> {
        Ok(self.load()?.halt.requested)
    }

    /// Acknowledge a requested halt from the driver side.
    ///
    /// Stamps `halted_at` and the first running task, if any, and returns
    /// every task still running so the caller can decide what to wait for.
    /// Does nothing when no halt is requested.
    pub fn confirm_halt(&self) -> Result<Vec<String>> {
        self.update(|state| {
            if !state.halt.requested {
                return Ok(Vec::new());
            }
            let running: Vec<String> = state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .map(|t| t.id.clone())
                .collect();
            state.halt.halted_at = Some(Utc::now());
            state.halt.active_task = running.first().cloned();
            state.record_event(
                EventKind::HaltConfirmed,
                state.halt.active_task.clone().as_deref(),
                Some(json!({ "running": running })),
            );
            info!(running = running.len(), "halt confirmed");
            Ok(running)
        })
    }

    /// Clear the halt flag and its audit fields.
    pub fn resume_execution(&self) -> Result<()> {
        self.update(|state| {
            let was_halted = state.halt.requested;
            state.halt = HaltInfo::default();
            state.record_event(
                EventKind::ExecutionResumed,
                None,
                Some(json!({ "was_halted": was_halted })),
            );
            Ok(())
        })?;
        info!("execution resumed");
        Ok(())
    }

    pub fn halt_status(&self) -> Result<HaltStatus> {
        Ok(HaltStatus::from(&self.load()?.halt))
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
        (dir, store)
    }

    #[test]
    fn request_check_resume() {
        let (_dir, store) = make_store();
        assert!(!store.check_halt().unwrap());

        let status = store.request_halt("rate limit", "operator").unwrap();
        assert!(status.halted);
        assert_eq!(status.reason.as_deref(), Some("rate limit"));
        assert!(status.requested_at.is_some());
        assert!(store.check_halt().unwrap());

        store.resume_execution().unwrap();
        let status = store.halt_status().unwrap();
        assert!(!status.halted);
        assert!(status.reason.is_none());
    }

    #[test]
    fn confirm_halt_records_running_task() {
        let (_dir, store) = make_store();
        store
            .update(|s| {
                let mut t = TaskRecord::new("T2", "two", 1);
                t.status = TaskStatus::Running;
                s.tasks.insert("T2".into(), t);
                s.tasks.insert("T1".into(), TaskRecord::new("T1", "one", 1));
                Ok(())
            })
            .unwrap();

        assert!(store.confirm_halt().unwrap().is_empty());
        assert!(store.halt_status().unwrap().halted_at.is_none());

        store.request_halt("stop", "ci").unwrap();
        let running = store.confirm_halt().unwrap();
        assert_eq!(running, vec!["T2".to_string()]);

        let status = store.halt_status().unwrap();
        assert_eq!(status.active_task.as_deref(), Some("T2"));
        assert!(status.halted_at.is_some());
        assert_eq!(store.task("T2").unwrap().status, TaskStatus::Running);
    }
}
