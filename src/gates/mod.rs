//! Quality gates run over the task definitions before sequencing.
//!
//! Three gates, each pure over the loaded definitions:
//!
//! - **Spec coverage** - share of capability-map behaviors claimed by a task
//! - **Acceptance criteria** - every task carries checkable criteria
//! - **Phase leakage** - tasks of the current implementation phase that talk
//!   about work belonging to a later one
//!
//! [`StateStore::run_gates`] loads the inputs, runs all three and records
//! the outcome under `artifacts.validation_results`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::errors::Result;
use crate::planning::{CapabilityMap, TaskDefinition, load_definitions};
use crate::state::{ArtifactKind, EventKind, StateStore, ValidationResults};

pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 0.9;

/// Shortest criterion text that can describe something checkable.
const MIN_CRITERION_LEN: usize = 10;

static VERIFICATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(go\s+test|pytest|npm\s+test|make\s+test|cargo\s+test|bash|sh|\./)").unwrap()
});

/// Keywords that mark work belonging to a later implementation phase.
const PHASE_KEYWORDS: &[(u32, &[&str])] = &[
    (2, &["deployment", "production", "scale", "performance optimization"]),
    (3, &["migration", "deprecation", "backward compatibility"]),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecCoverage {
    pub passed: bool,
    pub ratio: f64,
    pub threshold: f64,
    pub total_behaviors: usize,
    pub covered_behaviors: usize,
    /// `ID (name)`, sorted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uncovered: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_domain: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriterionIssue {
    pub task_id: String,
    /// `None` when the issue is about the task as a whole.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criterion_index: Option<usize>,
    pub issue: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptanceReport {
    pub passed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<CriterionIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakageViolation {
    pub task_id: String,
    pub keyword: String,
    pub phase: u32,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakageReport {
    pub passed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<LeakageViolation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GateOutcome {
    fn new(name: &str, passed: bool) -> Self {
        Self {
            name: name.to_string(),
            passed,
            error: None,
        }
    }

    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateReport {
    pub passed: bool,
    pub gates: Vec<GateOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_coverage: Option<SpecCoverage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<AcceptanceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_leakage: Option<LeakageReport>,
}

impl GateReport {
    pub fn failures(&self) -> Vec<String> {
        let mut failures: Vec<String> = self
            .gates
            .iter()
            .filter(|g| !g.passed)
            .map(|g| match &g.error {
                Some(e) => format!("{}: {}", g.name, e),
                None => format!("{}: failed", g.name),
            })
            .collect();
        if let Some(coverage) = &self.spec_coverage
            && !coverage.passed
        {
            failures.push(format!(
                "spec coverage {:.1}% below {:.1}%",
                coverage.ratio * 100.0,
                coverage.threshold * 100.0
            ));
        }
        if let Some(ac) = &self.acceptance_criteria {
            failures.extend(
                ac.issues
                    .iter()
                    .filter(|i| i.severity == Severity::Error)
                    .map(describe_issue),
            );
        }
        if let Some(leakage) = &self.phase_leakage {
            failures.extend(
                leakage
                    .violations
                    .iter()
                    .map(|v| format!("{}: {}", v.task_id, v.evidence)),
            );
        }
        failures
    }

    pub fn warnings(&self) -> Vec<String> {
        self.acceptance_criteria
            .iter()
            .flat_map(|ac| ac.issues.iter())
            .filter(|i| i.severity == Severity::Warning)
            .map(describe_issue)
            .collect()
    }

    pub fn to_validation_results(&self, checked_at: DateTime<Utc>) -> ValidationResults {
        ValidationResults {
            passed: self.passed,
            checked_at,
            failures: self.failures(),
            warnings: self.warnings(),
        }
    }
}

fn describe_issue(issue: &CriterionIssue) -> String {
    match issue.criterion_index {
        Some(i) => format!("{} criterion {}: {}", issue.task_id, i, issue.issue),
        None => format!("{}: {}", issue.task_id, issue.issue),
    }
}

/// Fraction of capability-map behaviors referenced by at least one task.
/// Without a map nothing is covered and the gate fails.
pub fn check_spec_coverage(
    defs: &[TaskDefinition],
    map: Option<&CapabilityMap>,
    threshold: f64,
) -> SpecCoverage {
    let Some(map) = map else {
        return SpecCoverage {
            passed: false,
            ratio: 0.0,
            threshold,
            total_behaviors: 0,
            covered_behaviors: 0,
            uncovered: Vec::new(),
            by_domain: BTreeMap::new(),
        };
    };

    let index = map.behavior_index();
    let covered: BTreeSet<&str> = defs
        .iter()
        .flat_map(|d| d.behaviors.iter())
        .map(String::as_str)
        .filter(|id| index.contains_key(id))
        .collect();

    let mut domain_totals: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut uncovered = Vec::new();
    for (id, loc) in &index {
        let entry = domain_totals.entry(loc.domain.id.clone()).or_default();
        entry.0 += 1;
        if covered.contains(id) {
            entry.1 += 1;
        } else {
            uncovered.push(format!("{} ({})", id, loc.behavior.name));
        }
    }

    let total = index.len();
    let ratio = if total == 0 {
        0.0
    } else {
        covered.len() as f64 / total as f64
    };
    SpecCoverage {
        passed: ratio >= threshold,
        ratio,
        threshold,
        total_behaviors: total,
        covered_behaviors: covered.len(),
        uncovered,
        by_domain: domain_totals
            .into_iter()
            .map(|(domain, (total, hit))| (domain, hit as f64 / total as f64))
            .collect(),
    }
}

pub fn validate_acceptance_criteria(defs: &[TaskDefinition]) -> AcceptanceReport {
    let mut issues = Vec::new();
    let mut push = |task_id: &str, index: Option<usize>, issue: String, severity: Severity| {
        issues.push(CriterionIssue {
            task_id: task_id.to_string(),
            criterion_index: index,
            issue,
            severity,
        })
    };

    for def in defs {
        if def.acceptance_criteria.is_empty() {
            push(&def.id, None, "Task has no acceptance criteria".into(), Severity::Error);
            continue;
        }
        for (i, ac) in def.acceptance_criteria.iter().enumerate() {
            let criterion = ac.criterion.trim();
            let verification = ac.verification.trim();
            if criterion.is_empty() {
                push(&def.id, Some(i), "Empty criterion text".into(), Severity::Error);
            } else if criterion.chars().count() < MIN_CRITERION_LEN {
                push(
                    &def.id,
                    Some(i),
                    format!("Criterion too short (less than {} characters)", MIN_CRITERION_LEN),
                    Severity::Error,
                );
            }
            if verification.is_empty() {
                push(&def.id, Some(i), "Missing verification command".into(), Severity::Error);
            } else if !VERIFICATION_REGEX.is_match(verification) {
                push(
                    &def.id,
                    Some(i),
                    format!("Verification command may not be executable: {}", verification),
                    Severity::Warning,
                );
            }
        }
    }

    AcceptanceReport {
        passed: !issues.iter().any(|i| i.severity == Severity::Error),
        issues,
    }
}

/// Flag tasks of `current_phase` whose name or criteria mention keywords of
/// a later phase.
pub fn detect_phase_leakage(defs: &[TaskDefinition], current_phase: u32) -> LeakageReport {
    let mut violations = Vec::new();
    for def in defs.iter().filter(|d| d.phase == current_phase) {
        let mut text = def.name.to_lowercase();
        for ac in &def.acceptance_criteria {
            text.push(' ');
            text.push_str(&ac.criterion.to_lowercase());
            text.push(' ');
            text.push_str(&ac.verification.to_lowercase());
        }

        for (phase, keywords) in PHASE_KEYWORDS.iter().filter(|(p, _)| *p > current_phase) {
            for keyword in keywords.iter().filter(|k| text.contains(*k)) {
                violations.push(LeakageViolation {
                    task_id: def.id.clone(),
                    keyword: keyword.to_string(),
                    phase: *phase,
                    evidence: format!(
                        "Phase {} keyword '{}' found in Phase {} task",
                        phase, keyword, current_phase
                    ),
                });
            }
        }
    }
    LeakageReport {
        passed: violations.is_empty(),
        violations,
    }
}

/// Run every gate over already-loaded inputs.
pub fn run_all(
    defs: &[TaskDefinition],
    map: Option<&CapabilityMap>,
    current_phase: u32,
    threshold: f64,
) -> GateReport {
    let coverage = check_spec_coverage(defs, map, threshold);
    let leakage = detect_phase_leakage(defs, current_phase);
    let ac = validate_acceptance_criteria(defs);

    let gates = vec![
        GateOutcome::new("spec_coverage", coverage.passed),
        GateOutcome::new("phase_leakage", leakage.passed),
        GateOutcome::new("acceptance_criteria", ac.passed),
    ];
    GateReport {
        passed: gates.iter().all(|g| g.passed),
        gates,
        spec_coverage: Some(coverage),
        acceptance_criteria: Some(ac),
        phase_leakage: Some(leakage),
    }
}

impl StateStore {
    /// Load task definitions and the capability map, run every gate, and
    /// record the outcome in the state document.
    pub fn run_gates(&self, current_phase: u32, threshold: f64) -> Result<GateReport> {
        let defs: Vec<TaskDefinition> = load_definitions(&self.tasks_dir())?
            .into_iter()
            .map(|(_, def)| def)
            .collect();

        let report = if defs.is_empty() {
            GateReport {
                passed: false,
                gates: vec![GateOutcome::failed(
                    "load_tasks",
                    format!("no task definitions in {}", self.tasks_dir().display()),
                )],
                spec_coverage: None,
                acceptance_criteria: None,
                phase_leakage: None,
            }
        } else {
            let map_path = self
                .planning_dir()
                .join(ArtifactKind::CapabilityMap.default_path());
            let (map, load_error) = match CapabilityMap::load(&map_path) {
                Ok(map) => (Some(map), None),
                Err(e) => (None, Some(e.to_string())),
            };
            let mut report = run_all(&defs, map.as_ref(), current_phase, threshold);
            if let Some(error) = load_error {
                warn!(error = %error, "capability map unavailable for coverage gate");
                report.gates.insert(0, GateOutcome::failed("load_capability_map", error));
                report.passed = false;
            }
            report
        };

        let results = report.to_validation_results(Utc::now());
        self.update(|state| {
            state.artifacts.validation_results = Some(results);
            state.record_event(
                EventKind::GatesRecorded,
                None,
                Some(json!({ "passed": report.passed })),
            );
            Ok(())
        })?;
        info!(passed = report.passed, gates = report.gates.len(), "validation gates recorded");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn def(value: serde_json::Value) -> TaskDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn capability_map() -> CapabilityMap {
        serde_json::from_value(json!({
            "domains": [
                { "id": "D1", "name": "Accounts", "capabilities": [{
                    "id": "C1", "name": "Signup",
                    "behaviors": [
                        { "id": "B1", "name": "Validate email", "type": "validation" },
                        { "id": "B2", "name": "Persist user", "type": "process" }
                    ]
                }]},
                { "id": "D2", "name": "Billing", "capabilities": [{
                    "id": "C2", "name": "Invoice",
                    "behaviors": [{ "id": "B3", "name": "Issue invoice", "type": "process" }]
                }]}
            ]
        }))
        .unwrap()
    }

    fn good_criteria() -> serde_json::Value {
        json!([{ "criterion": "Rejects malformed email", "verification": "cargo test email" }])
    }

    #[test]
    fn coverage_counts_referenced_behaviors() {
        let defs = vec![
            def(json!({ "id": "T1", "behaviors": ["B1", "B2"] })),
            def(json!({ "id": "T2", "behaviors": ["B1", "B99"] })),
        ];
        let map = capability_map();
        let coverage = check_spec_coverage(&defs, Some(&map), DEFAULT_COVERAGE_THRESHOLD);
        assert!(!coverage.passed);
        assert_eq!(coverage.total_behaviors, 3);
        assert_eq!(coverage.covered_behaviors, 2);
        assert_eq!(coverage.uncovered, vec!["B3 (Issue invoice)".to_string()]);
        assert_eq!(coverage.by_domain["D1"], 1.0);
        assert_eq!(coverage.by_domain["D2"], 0.0);

        let relaxed = check_spec_coverage(&defs, Some(&map), 0.6);
        assert!(relaxed.passed);
    }

    #[test]
    fn coverage_without_map_fails() {
        let coverage = check_spec_coverage(&[], None, 0.5);
        assert!(!coverage.passed);
        assert_eq!(coverage.ratio, 0.0);
    }

    #[test]
    fn acceptance_criteria_errors_and_warnings() {
        let defs = vec![
            def(json!({ "id": "T1" })),
            def(json!({ "id": "T2", "acceptance_criteria": [
                { "criterion": "short", "verification": "" },
                { "criterion": "Invoice totals are rounded", "verification": "check it by hand" }
            ]})),
            def(json!({ "id": "T3", "acceptance_criteria": good_criteria() })),
        ];
        let report = validate_acceptance_criteria(&defs);
        assert!(!report.passed);

        let summary: Vec<(&str, Option<usize>, Severity)> = report
            .issues
            .iter()
            .map(|i| (i.task_id.as_str(), i.criterion_index, i.severity))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("T1", None, Severity::Error),
                ("T2", Some(0), Severity::Error),
                ("T2", Some(0), Severity::Error),
                ("T2", Some(1), Severity::Warning),
            ]
        );
    }

    #[test]
    fn warnings_alone_pass() {
        let defs = vec![def(json!({ "id": "T1", "acceptance_criteria": [
            { "criterion": "Invoice totals are rounded", "verification": "inspect output" }
        ]}))];
        let report = validate_acceptance_criteria(&defs);
        assert!(report.passed);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn leakage_only_checks_current_phase() {
        let defs = vec![
            def(json!({ "id": "T1", "phase": 1, "name": "Prepare production deployment" })),
            def(json!({ "id": "T2", "phase": 2, "name": "Scale out workers" })),
            def(json!({ "id": "T3", "phase": 1, "name": "Add signup",
                        "acceptance_criteria": [{ "criterion": "Keeps backward compatibility",
                                                  "verification": "cargo test" }] })),
        ];
        let report = detect_phase_leakage(&defs, 1);
        assert!(!report.passed);
        let found: Vec<(&str, &str)> = report
            .violations
            .iter()
            .map(|v| (v.task_id.as_str(), v.keyword.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("T1", "deployment"),
                ("T1", "production"),
                ("T3", "backward compatibility"),
            ]
        );

        assert!(detect_phase_leakage(&defs, 3).passed);
    }

    #[test]
    fn run_gates_records_results() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init("/srv/app").unwrap();
        fs::create_dir_all(store.tasks_dir()).unwrap();
        fs::create_dir_all(store.artifacts_dir()).unwrap();
        fs::write(
            store.planning_dir().join(ArtifactKind::CapabilityMap.default_path()),
            serde_json::to_string(&capability_map()).unwrap(),
        )
        .unwrap();
        fs::write(
            store.tasks_dir().join("T1.json"),
            json!({ "id": "T1", "phase": 1, "behaviors": ["B1", "B2", "B3"],
                    "acceptance_criteria": good_criteria() })
            .to_string(),
        )
        .unwrap();

        let report = store.run_gates(1, DEFAULT_COVERAGE_THRESHOLD).unwrap();
        assert!(report.passed, "{:?}", report.failures());

        let state = store.load().unwrap();
        let results = state.artifacts.validation_results.unwrap();
        assert!(results.passed);
        assert!(results.failures.is_empty());
        assert_eq!(state.events.last().unwrap().kind, EventKind::GatesRecorded);
    }

    #[test]
    fn run_gates_without_tasks_or_map_fails() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.init("/srv/app").unwrap();

        let report = store.run_gates(1, DEFAULT_COVERAGE_THRESHOLD).unwrap();
        assert!(!report.passed);
        assert_eq!(report.gates[0].name, "load_tasks");

        fs::create_dir_all(store.tasks_dir()).unwrap();
        fs::write(
            store.tasks_dir().join("T1.json"),
            json!({ "id": "T1", "acceptance_criteria": good_criteria() }).to_string(),
        )
        .unwrap();
        let report = store.run_gates(1, DEFAULT_COVERAGE_THRESHOLD).unwrap();
        assert!(!report.passed);
        assert_eq!(report.gates[0].name, "load_capability_map");
        let recorded = store.load().unwrap().artifacts.validation_results.unwrap();
        assert!(!recorded.passed);
        assert!(recorded.failures.iter().any(|f| f.starts_with("load_capability_map")));
    }
}
