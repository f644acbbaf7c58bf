//! Persisted document types for the decomposition state.
//!
//! `DecompositionState` is the root document stored at `<planning>/state.json`.
//! Every enum here is closed: adding a status, category or verdict is a
//! compile-time decision that every `match` has to acknowledge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::phase::Phase;

/// Schema version written into every state document.
pub const STATE_VERSION: &str = "2.0";

/// Status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    Skipped,
    Blocked,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Complete,
        TaskStatus::Failed,
        TaskStatus::Skipped,
        TaskStatus::Blocked,
    ];

    /// Complete and skipped tasks never move again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }

    /// Whether a dependent task may treat this one as done.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "complete" => Ok(TaskStatus::Complete),
            "failed" => Ok(TaskStatus::Failed),
            "skipped" => Ok(TaskStatus::Skipped),
            "blocked" => Ok(TaskStatus::Blocked),
            _ => anyhow::bail!(
                "Invalid task status '{}'. Valid values: pending, running, complete, failed, skipped, blocked",
                s
            ),
        }
    }
}

/// Failure classification recorded by `fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Test,
    Build,
    Spec,
    Env,
    Timeout,
    #[default]
    Unknown,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 6] = [
        FailureCategory::Test,
        FailureCategory::Build,
        FailureCategory::Spec,
        FailureCategory::Env,
        FailureCategory::Timeout,
        FailureCategory::Unknown,
    ];

    /// Whether a failure of this kind is worth retrying without a plan change.
    pub fn default_retryable(&self) -> bool {
        match self {
            FailureCategory::Test | FailureCategory::Build => true,
            FailureCategory::Env | FailureCategory::Timeout => true,
            FailureCategory::Spec => false,
            FailureCategory::Unknown => false,
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::Test => write!(f, "test"),
            FailureCategory::Build => write!(f, "build"),
            FailureCategory::Spec => write!(f, "spec"),
            FailureCategory::Env => write!(f, "env"),
            FailureCategory::Timeout => write!(f, "timeout"),
            FailureCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for FailureCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "test" => Ok(FailureCategory::Test),
            "build" => Ok(FailureCategory::Build),
            "spec" => Ok(FailureCategory::Spec),
            "env" => Ok(FailureCategory::Env),
            "timeout" => Ok(FailureCategory::Timeout),
            "unknown" => Ok(FailureCategory::Unknown),
            _ => anyhow::bail!(
                "Invalid failure category '{}'. Valid values: test, build, spec, env, timeout, unknown",
                s
            ),
        }
    }
}

/// Verdict returned by the external verifier for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationVerdict {
    Pass,
    Fail,
    Conditional,
}

impl std::fmt::Display for VerificationVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationVerdict::Pass => write!(f, "PASS"),
            VerificationVerdict::Fail => write!(f, "FAIL"),
            VerificationVerdict::Conditional => write!(f, "CONDITIONAL"),
        }
    }
}

impl std::str::FromStr for VerificationVerdict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PASS" => Ok(VerificationVerdict::Pass),
            "FAIL" => Ok(VerificationVerdict::Fail),
            "CONDITIONAL" => Ok(VerificationVerdict::Conditional),
            _ => anyhow::bail!(
                "Invalid verdict '{}'. Valid values: PASS, FAIL, CONDITIONAL",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Proceed,
    Block,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::Proceed => write!(f, "PROCEED"),
            Recommendation::Block => write!(f, "BLOCK"),
        }
    }
}

impl std::str::FromStr for Recommendation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PROCEED" => Ok(Recommendation::Proceed),
            "BLOCK" => Ok(Recommendation::Block),
            _ => anyhow::bail!(
                "Invalid recommendation '{}'. Valid values: PROCEED, BLOCK",
                s
            ),
        }
    }
}

/// How a verifier verdict compared with what actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationOutcome {
    Correct,
    FalsePositive,
    FalseNegative,
}

impl std::fmt::Display for CalibrationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationOutcome::Correct => write!(f, "correct"),
            CalibrationOutcome::FalsePositive => write!(f, "false_positive"),
            CalibrationOutcome::FalseNegative => write!(f, "false_negative"),
        }
    }
}

impl std::str::FromStr for CalibrationOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "correct" => Ok(CalibrationOutcome::Correct),
            "false_positive" => Ok(CalibrationOutcome::FalsePositive),
            "false_negative" => Ok(CalibrationOutcome::FalseNegative),
            _ => anyhow::bail!(
                "Invalid calibration outcome '{}'. Valid values: correct, false_positive, false_negative",
                s
            ),
        }
    }
}

/// Verdict of the task-definition review that gates `validation` and `ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskValidationVerdict {
    Ready,
    ReadyWithNotes,
    Blocked,
}

impl TaskValidationVerdict {
    pub fn allows_progress(&self) -> bool {
        matches!(self, Self::Ready | Self::ReadyWithNotes)
    }
}

impl std::fmt::Display for TaskValidationVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskValidationVerdict::Ready => write!(f, "READY"),
            TaskValidationVerdict::ReadyWithNotes => write!(f, "READY_WITH_NOTES"),
            TaskValidationVerdict::Blocked => write!(f, "BLOCKED"),
        }
    }
}

impl std::str::FromStr for TaskValidationVerdict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "READY" => Ok(TaskValidationVerdict::Ready),
            "READY_WITH_NOTES" => Ok(TaskValidationVerdict::ReadyWithNotes),
            "BLOCKED" => Ok(TaskValidationVerdict::Blocked),
            _ => anyhow::bail!(
                "Invalid verdict '{}'. Valid values: READY, READY_WITH_NOTES, BLOCKED",
                s
            ),
        }
    }
}

/// Upstream planning artifacts tracked in the state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    CapabilityMap,
    PhysicalMap,
}

impl ArtifactKind {
    /// Default location relative to the planning directory.
    pub fn default_path(&self) -> &'static str {
        match self {
            ArtifactKind::CapabilityMap => "artifacts/capability-map.json",
            ArtifactKind::PhysicalMap => "artifacts/physical-map.json",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::CapabilityMap => write!(f, "capability_map"),
            ArtifactKind::PhysicalMap => write!(f, "physical_map"),
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "capability_map" => Ok(ArtifactKind::CapabilityMap),
            "physical_map" => Ok(ArtifactKind::PhysicalMap),
            _ => anyhow::bail!(
                "Invalid artifact '{}'. Valid values: capability_map, physical_map",
                s
            ),
        }
    }
}

/// Audit-log event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DecompositionInitialized,
    TasksLoaded,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskRetried,
    TaskSkipped,
    TaskBlocked,
    PhaseAdvanced,
    Replanned,
    ArtifactRegistered,
    TaskValidationRecorded,
    GatesRecorded,
    HaltRequested,
    HaltConfirmed,
    ExecutionResumed,
    VerificationRecorded,
    CalibrationRecorded,
    TokensLogged,
    StateRecovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Files a task reported touching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFiles {
    #[serde(default)]
    pub created: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
}

impl TaskFiles {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty()
    }

    /// Append `other`'s paths, skipping any already listed under the same kind.
    pub fn merge(&mut self, other: TaskFiles) {
        for (into, from) in [
            (&mut self.created, other.created),
            (&mut self.modified, other.modified),
        ] {
            for path in from {
                if !into.contains(&path) {
                    into.push(path);
                }
            }
        }
    }

    /// Created then modified, in recorded order.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.created.iter().chain(self.modified.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub category: FailureCategory,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verdict: VerificationVerdict,
    pub recommendation: Recommendation,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<CriterionCheck>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub outcome: CalibrationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// One unit of work tracked by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Implementation phase the task belongs to (1-based).
    #[serde(default)]
    pub phase: u32,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub steel_thread: bool,
    #[serde(default)]
    pub attempts: u32,
    /// Definition file relative to the planning directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "TaskFiles::is_empty")]
    pub files: TaskFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<Calibration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Task whose verification blocked this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, phase: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phase,
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
            blocks: Vec::new(),
            steel_thread: false,
            attempts: 0,
            file: None,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            files: TaskFiles::default(),
            failure: None,
            verification: None,
            calibration: None,
            skip_reason: None,
            blocked_by: None,
        }
    }

    pub fn with_deps(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_steel_thread(mut self, steel_thread: bool) -> Self {
        self.steel_thread = steel_thread;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub current: Phase,
    #[serde(default)]
    pub completed: Vec<Phase>,
}

impl Default for PhaseProgress {
    fn default() -> Self {
        Self {
            current: Phase::Ingestion,
            completed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Lowest implementation phase that still has unfinished work.
    #[serde(default)]
    pub current_phase: u32,
    #[serde(default)]
    pub active_tasks: Vec<String>,
    #[serde(default)]
    pub completed_count: u32,
    #[serde(default)]
    pub failed_count: u32,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub valid: bool,
    pub validated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResults {
    pub passed: bool,
    pub checked_at: DateTime<Utc>,
    #[serde(default)]
    pub failures: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskValidation {
    pub verdict: TaskValidationVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_map_ref: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_map_ref: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_results: Option<ValidationResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_validation_verdict: Option<TaskValidation>,
}

impl Artifacts {
    pub fn get(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        match kind {
            ArtifactKind::CapabilityMap => self.capability_map_ref.as_ref(),
            ArtifactKind::PhysicalMap => self.physical_map_ref.as_ref(),
        }
    }

    pub fn set(&mut self, kind: ArtifactKind, artifact: ArtifactRef) {
        match kind {
            ArtifactKind::CapabilityMap => self.capability_map_ref = Some(artifact),
            ArtifactKind::PhysicalMap => self.physical_map_ref = Some(artifact),
        }
    }

    pub fn is_valid(&self, kind: ArtifactKind) -> bool {
        self.get(kind).is_some_and(|a| a.valid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HaltInfo {
    #[serde(default)]
    pub requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<String>,
}

/// Root document, one per planning directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionState {
    pub version: String,
    pub phase: PhaseProgress,
    pub target_dir: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskRecord>,
    #[serde(default)]
    pub execution: Execution,
    #[serde(default)]
    pub artifacts: Artifacts,
    #[serde(default)]
    pub halt: HaltInfo,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl DecompositionState {
    pub fn new(target_dir: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION.to_string(),
            phase: PhaseProgress::default(),
            target_dir: target_dir.into(),
            created_at: now,
            updated_at: now,
            tasks: BTreeMap::new(),
            execution: Execution::default(),
            artifacts: Artifacts::default(),
            halt: HaltInfo::default(),
            events: Vec::new(),
        }
    }

    /// Append an audit event stamped with the current time.
    pub fn record_event(
        &mut self,
        kind: EventKind,
        task_id: Option<&str>,
        details: Option<serde_json::Value>,
    ) {
        self.events.push(Event {
            timestamp: Utc::now(),
            kind,
            task_id: task_id.map(str::to_string),
            details,
        });
    }

    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Recompute counters and the active list from the task records.
    pub fn recalculate_execution(&mut self) {
        self.execution.active_tasks = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id.clone())
            .collect();
        self.execution.completed_count = self.count_status(TaskStatus::Complete) as u32;
        self.execution.failed_count = self.count_status(TaskStatus::Failed) as u32;
        self.refresh_current_phase();
    }

    /// Lowest phase that still has unfinished work, or 0 when none does.
    pub fn refresh_current_phase(&mut self) {
        self.execution.current_phase = self
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.phase)
            .min()
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let back: TaskStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(back, TaskStatus::Blocked);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn failure_category_parse_rejects_unknown_values() {
        assert_eq!("BUILD".parse::<FailureCategory>().unwrap(), FailureCategory::Build);
        let err = "network".parse::<FailureCategory>().unwrap_err();
        assert!(err.to_string().contains("Valid values"));
    }

    #[test]
    fn task_validation_verdict_wire_format() {
        let json = serde_json::to_string(&TaskValidationVerdict::ReadyWithNotes).unwrap();
        assert_eq!(json, "\"READY_WITH_NOTES\"");
        assert!(TaskValidationVerdict::ReadyWithNotes.allows_progress());
        assert!(!TaskValidationVerdict::Blocked.allows_progress());
        assert_eq!(
            "ready-with-notes".parse::<TaskValidationVerdict>().unwrap(),
            TaskValidationVerdict::ReadyWithNotes
        );
    }

    #[test]
    fn task_record_tolerates_minimal_definition() {
        let record: TaskRecord = serde_json::from_str(r#"{"id": "T1"}"#).unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert!(record.depends_on.is_empty());
    }

    #[test]
    fn event_kind_is_serialized_as_type() {
        let mut state = DecompositionState::new("/tmp/target");
        state.record_event(EventKind::TaskStarted, Some("T1"), None);
        let json = serde_json::to_value(&state.events[0]).unwrap();
        assert_eq!(json["type"], "task_started");
        assert_eq!(json["task_id"], "T1");
    }

    #[test]
    fn task_files_merge_skips_duplicates() {
        let mut files = TaskFiles {
            created: vec!["src/a.rs".into()],
            modified: vec!["Cargo.toml".into()],
        };
        files.merge(TaskFiles {
            created: vec!["src/a.rs".into(), "src/b.rs".into()],
            modified: vec!["Cargo.toml".into(), "src/lib.rs".into()],
        });
        assert_eq!(files.created, vec!["src/a.rs".to_string(), "src/b.rs".to_string()]);
        assert_eq!(
            files.modified,
            vec!["Cargo.toml".to_string(), "src/lib.rs".to_string()]
        );
    }

    #[test]
    fn recalculate_execution_counts_statuses() {
        let mut state = DecompositionState::new("/tmp/target");
        let mut t1 = TaskRecord::new("T1", "one", 1);
        t1.status = TaskStatus::Complete;
        let mut t2 = TaskRecord::new("T2", "two", 2);
        t2.status = TaskStatus::Running;
        let mut t3 = TaskRecord::new("T3", "three", 3);
        t3.status = TaskStatus::Failed;
        for t in [t1, t2, t3] {
            state.tasks.insert(t.id.clone(), t);
        }
        state.recalculate_execution();
        assert_eq!(state.execution.completed_count, 1);
        assert_eq!(state.execution.failed_count, 1);
        assert_eq!(state.execution.active_tasks, vec!["T2".to_string()]);
        assert_eq!(state.execution.current_phase, 2);
    }
}
