//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module       | Commands handled                                              |
//! |--------------|---------------------------------------------------------------|
//! | `state`      | `Init`, `Status`, `Ready`, `LoadTasks`, `RegisterArtifact`,   |
//! |              | `ValidateTasks`, `LogTokens`, `Advance`, `Replan`, `RecoverState` |
//! | `task`       | `Task`, `RecordVerification`, `RecordCalibration`, `Calibration` |
//! | `halt`       | `Halt`, `Resume`, `CheckHalt`, `ConfirmHalt`, `HaltStatus`    |
//! | `metrics`    | `Metrics`, `PlanningMetrics`, `FailureMetrics`                |
//! | `checkpoint` | `Checkpoint`                                                  |
//! | `bundle`     | `Bundle`                                                      |
//! | `validate`   | `Validate`                                                    |
//! | `config`     | `Config`                                                      |

pub mod bundle;
pub mod checkpoint;
pub mod config;
pub mod halt;
pub mod metrics;
pub mod state;
pub mod task;
pub mod validate;

use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;

use taskforge::config::Config;
use taskforge::schema::SchemaRegistry;
use taskforge::state::StateStore;

pub use bundle::cmd_bundle;
pub use checkpoint::cmd_checkpoint;
pub use config::cmd_config;
pub use halt::{cmd_check_halt, cmd_confirm_halt, cmd_halt, cmd_halt_status, cmd_resume};
pub use metrics::{cmd_failure_metrics, cmd_metrics, cmd_planning_metrics};
pub use state::{
    cmd_advance, cmd_init, cmd_load_tasks, cmd_log_tokens, cmd_ready, cmd_recover_state,
    cmd_register_artifact, cmd_replan, cmd_status, cmd_validate_tasks,
};
pub use task::{cmd_calibration, cmd_record_calibration, cmd_record_verification, cmd_task};
pub use validate::cmd_validate;

/// Shared per-invocation context.
pub struct Ctx {
    pub config: Config,
    pub json: bool,
}

impl Ctx {
    pub fn store(&self) -> StateStore {
        StateStore::from_config(&self.config)
    }

    /// Registry for the configured schema directory, if any.
    pub fn schemas(&self) -> Option<SchemaRegistry> {
        self.config.schema_dir.clone().map(SchemaRegistry::new)
    }

    /// Print `value` as pretty JSON under `--json`, otherwise run `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

/// `ExitCode::SUCCESS` when `ok`, otherwise 1.
pub fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

pub fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{}:", title);
    for item in items {
        println!("  - {}", item);
    }
}
