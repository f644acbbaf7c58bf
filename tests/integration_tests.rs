//! Integration tests for taskforge
//!
//! These tests drive the binary end to end against a temporary planning
//! directory.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const ENV_VARS: [&str; 5] = [
    "TASKFORGE_PLANNING_DIR",
    "TASKFORGE_TARGET_DIR",
    "TASKFORGE_SCHEMA_DIR",
    "TASKFORGE_LOG_LEVEL",
    "RUST_LOG",
];

struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn planning_dir(&self) -> PathBuf {
        self.dir.path().join("project-planning")
    }

    fn target_dir(&self) -> PathBuf {
        self.dir.path().join("app")
    }

    /// A command pinned to this project, isolated from the caller's env.
    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("taskforge");
        cmd.current_dir(self.dir.path());
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd.arg("--planning-dir").arg(self.planning_dir());
        cmd
    }

    fn init(&self) {
        self.cmd()
            .arg("init")
            .arg(self.target_dir())
            .assert()
            .success();
    }

    fn write_task(&self, task: Value) {
        let id = task["id"].as_str().unwrap().to_string();
        let tasks = self.planning_dir().join("tasks");
        fs::create_dir_all(&tasks).unwrap();
        fs::write(
            tasks.join(format!("{}.json", id)),
            serde_json::to_string_pretty(&task).unwrap(),
        )
        .unwrap();
    }

    /// T1 <- T2 <- T3, loaded into the store.
    fn with_chain(&self) {
        self.init();
        self.write_task(json!({ "id": "T1", "name": "Model", "phase": 1 }));
        self.write_task(json!({ "id": "T2", "name": "Service", "phase": 1, "depends_on": ["T1"] }));
        self.write_task(json!({ "id": "T3", "name": "Handler", "phase": 2, "depends_on": ["T2"] }));
        self.cmd().arg("load-tasks").assert().success();
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().arg("--json").args(args).output().unwrap();
        assert!(
            output.status.success(),
            "{:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        cargo_bin_cmd!("taskforge").arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("taskforge").arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_state() {
        let project = Project::new();
        project
            .cmd()
            .arg("init")
            .arg(project.target_dir())
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized task state"));

        assert!(project.planning_dir().join("state.json").exists());
        assert!(project.planning_dir().join("tasks").is_dir());
        assert!(project.planning_dir().join("bundles").is_dir());
    }

    #[test]
    fn test_init_twice_fails() {
        let project = Project::new();
        project.init();
        project
            .cmd()
            .arg("init")
            .arg(project.target_dir())
            .assert()
            .failure()
            .stderr(predicate::str::contains("ERROR [state:ALREADY_EXISTS]"));
    }

    #[test]
    fn test_init_without_target_dir() {
        let project = Project::new();
        project
            .cmd()
            .arg("init")
            .assert()
            .failure()
            .stderr(predicate::str::contains("ERROR [config:CONFIG_MISSING]"));
    }

    #[test]
    fn test_status_before_init() {
        let project = Project::new();
        project
            .cmd()
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("ERROR [state:NOT_FOUND]"));
    }

    #[test]
    fn test_status_json() {
        let project = Project::new();
        project.init();
        let status = project.json(&["status"]);
        assert_eq!(status["phase"], "ingestion");
        assert_eq!(status["total_tasks"], 0);
        assert_eq!(status["halted"], false);
    }
}

// =============================================================================
// Task Lifecycle Tests
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn test_ready_follows_dependencies() {
        let project = Project::new();
        project.with_chain();

        let ready = project.json(&["ready"]);
        let ids: Vec<&str> = ready
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["T1"]);

        project.cmd().args(["task", "start", "T1"]).assert().success();
        project
            .cmd()
            .args(["task", "complete", "T1", "--created", "src/model.rs"])
            .assert()
            .success()
            .stdout(predicate::str::contains("T1 (Model) is now complete"));

        let ready = project.json(&["ready"]);
        assert_eq!(ready[0]["id"], "T2");
    }

    #[test]
    fn test_load_tasks_is_idempotent() {
        let project = Project::new();
        project.with_chain();
        let report = project.json(&["load-tasks"]);
        assert_eq!(report["added"].as_array().unwrap().len(), 0);
        assert_eq!(report["existing"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_complete_without_start_is_rejected() {
        let project = Project::new();
        project.with_chain();
        project
            .cmd()
            .args(["task", "complete", "T1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ERROR [lifecycle:INVALID_TRANSITION]"))
            .stderr(predicate::str::contains("pending"));
    }

    #[test]
    fn test_unknown_task() {
        let project = Project::new();
        project.with_chain();
        project
            .cmd()
            .args(["task", "start", "T99"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ERROR [state:NOT_FOUND] task not found: T99"));
    }

    #[test]
    fn test_fail_then_retry() {
        let project = Project::new();
        project.with_chain();
        project.cmd().args(["task", "start", "T1"]).assert().success();
        project
            .cmd()
            .args(["task", "fail", "T1", "--category", "test", "--message", "assertion failed"])
            .assert()
            .success();

        let failures = project.json(&["failure-metrics"]);
        assert_eq!(failures["total_failures"], 1);
        assert_eq!(failures["by_category"]["test"], 1);

        project.cmd().args(["task", "retry", "T1"]).assert().success();
        let status = project.json(&["status"]);
        assert_eq!(status["by_status"]["pending"], 3);
        assert_eq!(status["failed_tasks"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_skip_unblocks_dependents() {
        let project = Project::new();
        project.with_chain();
        project
            .cmd()
            .args(["task", "skip", "T1", "--reason", "done by hand"])
            .assert()
            .success();
        let ready = project.json(&["ready"]);
        assert_eq!(ready[0]["id"], "T2");
    }

    #[test]
    fn test_invalid_category_is_a_usage_error() {
        let project = Project::new();
        project.with_chain();
        project
            .cmd()
            .args(["task", "fail", "T1", "--category", "cosmic-rays"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid"));
    }

    #[test]
    fn test_log_tokens_accumulates() {
        let project = Project::new();
        project.with_chain();
        project
            .cmd()
            .args(["log-tokens", "T1", "100", "50", "--cost", "0.25"])
            .assert()
            .success();
        let metrics = project.json(&["metrics"]);
        assert_eq!(metrics["total_tokens"], 150);
        assert_eq!(metrics["total_cost_usd"], 0.25);
    }

    #[test]
    fn test_complete_from_result_merges_without_duplicates() {
        let project = Project::new();
        project.with_chain();
        project.cmd().args(["task", "start", "T1"]).assert().success();
        fs::write(
            project.planning_dir().join("bundles/T1-result.json"),
            r#"{"task_id": "T1", "status": "success",
                "files": {"created": ["src/model.rs", "src/db.rs"], "modified": ["Cargo.toml"]}}"#,
        )
        .unwrap();

        let task = project.json(&[
            "task",
            "complete",
            "T1",
            "--created",
            "src/model.rs",
            "--from-result",
        ]);
        assert_eq!(task["status"], "complete");
        assert_eq!(task["files"]["created"], json!(["src/model.rs", "src/db.rs"]));
        assert_eq!(task["files"]["modified"], json!(["Cargo.toml"]));
    }
}

// =============================================================================
// Halt Tests
// =============================================================================

mod halt {
    use super::*;

    #[test]
    fn test_check_halt_exit_codes() {
        let project = Project::new();
        project.init();

        project
            .cmd()
            .arg("check-halt")
            .assert()
            .success()
            .stdout(predicate::str::contains("running"));

        project
            .cmd()
            .args(["halt", "maintenance window"])
            .assert()
            .success();
        project.cmd().arg("check-halt").assert().code(1);

        let status = project.json(&["halt-status"]);
        assert_eq!(status["halted"], true);
        assert_eq!(status["reason"], "maintenance window");
        assert_eq!(status["requested_by"], "user");

        project.cmd().arg("resume").assert().success();
        project.cmd().arg("check-halt").assert().success();
    }
}

// =============================================================================
// Validation Tests
// =============================================================================

mod validation {
    use super::*;

    #[test]
    fn test_validate_dag_orders_chain() {
        let project = Project::new();
        project.with_chain();
        let report = project.json(&["validate", "dag"]);
        assert_eq!(report["order"], json!(["T1", "T2", "T3"]));
    }

    #[test]
    fn test_validate_dag_reports_cycle() {
        let project = Project::new();
        project.init();
        project.write_task(json!({ "id": "T1", "name": "A", "phase": 1, "depends_on": ["T2"] }));
        project.write_task(json!({ "id": "T2", "name": "B", "phase": 1, "depends_on": ["T1"] }));

        project
            .cmd()
            .args(["validate", "dag", "--definitions"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ERROR [validation:VALIDATION_FAILED]"))
            .stderr(predicate::str::contains("Cycle detected"));
    }

    #[test]
    fn test_advance_check_in_ingestion() {
        let project = Project::new();
        project.init();
        project
            .cmd()
            .args(["advance", "--check"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("inputs/spec.md not found"));

        fs::write(project.planning_dir().join("inputs/spec.md"), "# Spec\n").unwrap();
        project.cmd().arg("advance").assert().success();
        let status = project.json(&["status"]);
        assert_eq!(status["phase"], "logical");
    }
}

// =============================================================================
// Checkpoint Tests
// =============================================================================

mod checkpoint {
    use super::*;

    #[test]
    fn test_checkpoint_tracks_lifecycle() {
        let project = Project::new();
        project.with_chain();

        project
            .cmd()
            .args(["checkpoint", "create", "T1"])
            .assert()
            .success();
        project.cmd().args(["task", "start", "T1"]).assert().success();
        project.cmd().args(["task", "complete", "T1"]).assert().success();

        let status = project.json(&["checkpoint", "status"]);
        assert_eq!(status["completed_count"], 1);
        assert_eq!(status["pending_count"], 0);

        project.cmd().args(["checkpoint", "complete"]).assert().success();
        project.cmd().args(["checkpoint", "clear"]).assert().success();
        let status = project.json(&["checkpoint", "status"]);
        assert!(status.is_null());
    }

    #[test]
    fn test_checkpoint_complete_with_pending() {
        let project = Project::new();
        project.with_chain();
        project
            .cmd()
            .args(["checkpoint", "create", "T1", "T2"])
            .assert()
            .success();
        project
            .cmd()
            .args(["checkpoint", "complete"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("still has pending tasks"));
    }

    #[test]
    fn test_checkpoint_recover_from_result() {
        let project = Project::new();
        project.with_chain();
        project
            .cmd()
            .args(["checkpoint", "create", "T1", "T2"])
            .assert()
            .success();
        project.cmd().args(["task", "start", "T1"]).assert().success();
        fs::write(
            project.planning_dir().join("bundles/T1-result.json"),
            r#"{"task_id": "T1", "status": "success", "files": {"created": ["src/model.rs"]}}"#,
        )
        .unwrap();

        let output = project
            .cmd()
            .args(["--json", "checkpoint", "recover"])
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));
        let report: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["recovered"][0]["task_id"], "T1");
        assert_eq!(report["orphaned"][0]["task_id"], "T2");
        assert_eq!(report["orphaned"][0]["reason"], "no result record");

        let status = project.json(&["status"]);
        assert_eq!(status["by_status"]["complete"], 1);
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_and_validate() {
        let project = Project::new();
        project
            .cmd()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created taskforge.toml"));
        assert!(project.planning_dir().join("taskforge.toml").exists());

        project
            .cmd()
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_target_dir_from_config_file() {
        let project = Project::new();
        fs::create_dir_all(project.planning_dir()).unwrap();
        fs::write(
            project.planning_dir().join("taskforge.toml"),
            "[paths]\ntarget_dir = \"/srv/app\"\n",
        )
        .unwrap();

        project.cmd().arg("init").assert().success();
        let status = project.json(&["status"]);
        assert_eq!(status["target_dir"], "/srv/app");
    }
}
